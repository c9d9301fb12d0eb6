mod support;

use std::sync::atomic::Ordering;
use std::time::Duration;

use site_monitor::{ConfigureOutcome, MonitorError, SupervisorRegistry};
use support::{context, site, wait_until, EventLog, LoggingOpener};
use tempfile::tempdir;

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn reconfigure_drains_prior_recording_before_replacement_starts() {
    let dir = tempdir().unwrap();
    let log = EventLog::default();
    let opener = LoggingOpener::new(log.clone());
    opener.motion.store(true, Ordering::SeqCst);
    let registry = SupervisorRegistry::new(context(&log, &opener, dir.path()), WAIT);

    assert_eq!(
        registry.reconfigure(site("store1", &["stub://old"])).unwrap(),
        ConfigureOutcome::Created
    );
    assert!(wait_until(WAIT, || log.count("spawn") == 1));

    assert_eq!(
        registry.reconfigure(site("store1", &["stub://new"])).unwrap(),
        ConfigureOutcome::Updated
    );
    assert_eq!(registry.running_supervisors(), 1);
    assert!(wait_until(WAIT, || log.count("open stub://new") == 1));

    let terminated = log
        .position(|e| e.starts_with("terminate") && e.ends_with("stub://old"))
        .expect("old recording terminated");
    let reopened = log
        .position(|e| e == "open stub://new")
        .expect("replacement opened its camera");
    assert!(terminated < reopened, "events: {:?}", log.events());

    registry.shutdown_all();
    assert_eq!(registry.running_supervisors(), 0);
    assert_eq!(log.count("spawn"), log.count("terminate"));
}

#[test]
fn removing_one_site_leaves_others_running() {
    let dir = tempdir().unwrap();
    let log = EventLog::default();
    let opener = LoggingOpener::new(log.clone());
    let registry = SupervisorRegistry::new(context(&log, &opener, dir.path()), WAIT);

    registry.reconfigure(site("store1", &["stub://s1"])).unwrap();
    registry.reconfigure(site("store2", &["stub://s2"])).unwrap();
    assert_eq!(registry.running_supervisors(), 2);

    let err = registry.remove("store3").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<MonitorError>(),
        Some(MonitorError::SiteNotFound(_))
    ));
    assert_eq!(registry.running_supervisors(), 2);

    registry.remove("store1").unwrap();
    assert!(registry.lookup("store1").is_none());
    assert!(registry.lookup("store2").is_some());
    assert_eq!(registry.running_supervisors(), 1);

    opener.motion.store(true, Ordering::SeqCst);
    assert!(wait_until(WAIT, || log.count("spawn") == 1));
    assert!(log.events().iter().any(|e| e.ends_with("stub://s2")));

    let summaries = registry.shutdown_all();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].site, "store2");
    assert_eq!(summaries[0].drained, 1);
}

#[test]
fn unreachable_camera_does_not_block_the_rest_of_the_site() {
    let dir = tempdir().unwrap();
    let log = EventLog::default();
    let opener = LoggingOpener::new(log.clone());
    opener.motion.store(true, Ordering::SeqCst);
    let registry = SupervisorRegistry::new(context(&log, &opener, dir.path()), WAIT);

    registry
        .reconfigure(site("store1", &["dead://cam1", "stub://cam2"]))
        .unwrap();
    assert!(wait_until(WAIT, || log.count("spawn") == 1));
    assert!(log.events().iter().any(|e| e.starts_with("spawn") && e.ends_with("stub://cam2")));

    registry.shutdown_all();
    let sessions: Vec<_> = std::fs::read_dir(dir.path().join("store1"))
        .unwrap()
        .collect();
    assert_eq!(sessions.len(), 1);
}
