#![allow(dead_code)]

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use site_monitor::detect::MaskPolicy;
use site_monitor::recording::{ExitKind, RecordCommand};
use site_monitor::{
    CameraConfig, FrameSource, LumaFrame, MonitorContext, ProcessSpawner, RecordingProcess,
    SiteConfig, SourceOpener, SupervisorSettings,
};

/// Ordered record of everything the fakes observed, across all threads.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, pred: impl Fn(&str) -> bool) -> Option<usize> {
        self.events().iter().position(|e| pred(e.as_str()))
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

pub struct LoggingSpawner {
    log: EventLog,
    next_pid: AtomicU32,
}

impl LoggingSpawner {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            next_pid: AtomicU32::new(500),
        }
    }
}

impl ProcessSpawner for LoggingSpawner {
    fn spawn(&self, command: &RecordCommand) -> Result<Box<dyn RecordingProcess>> {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("spawn {} {}", pid, command.source));
        Ok(Box::new(LoggingProcess {
            pid,
            source: command.source.clone(),
            log: self.log.clone(),
        }))
    }

    fn force_kill(&self, pid: u32) {
        self.log.push(format!("kill {}", pid));
    }
}

struct LoggingProcess {
    pid: u32,
    source: String,
    log: EventLog,
}

impl RecordingProcess for LoggingProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    fn terminate(&mut self) -> Result<()> {
        self.log
            .push(format!("terminate {} {}", self.pid, self.source));
        Ok(())
    }

    fn wait(&mut self, _grace: Duration) -> Result<ExitKind> {
        Ok(ExitKind::Clean)
    }
}

/// Every source shows a moving block while `motion` is set. `dead://` sources
/// fail to open and `panic://` sources panic on their first read.
#[derive(Clone)]
pub struct LoggingOpener {
    log: EventLog,
    pub motion: Arc<AtomicBool>,
}

impl LoggingOpener {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            motion: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl SourceOpener for LoggingOpener {
    fn open(&self, identifier: &str) -> Result<Box<dyn FrameSource>> {
        if identifier.starts_with("dead://") {
            return Err(anyhow!("camera unreachable"));
        }
        self.log.push(format!("open {}", identifier));
        Ok(Box::new(BlockSource {
            identifier: identifier.to_string(),
            motion: self.motion.clone(),
            count: 0,
        }))
    }
}

struct BlockSource {
    identifier: String,
    motion: Arc<AtomicBool>,
    count: u64,
}

impl FrameSource for BlockSource {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn read_frame(&mut self) -> Result<LumaFrame> {
        if self.identifier.starts_with("panic://") {
            panic!("decoder for {} crashed", self.identifier);
        }
        self.count += 1;
        let mut frame = LumaFrame::filled(96, 64, 10);
        if self.motion.load(Ordering::SeqCst) {
            let x = if self.count % 2 == 0 { 0 } else { 48 };
            frame.fill_rect(x, 0, 32, 32, 250);
        }
        Ok(frame)
    }
}

pub fn context(log: &EventLog, opener: &LoggingOpener, root: &std::path::Path) -> Arc<MonitorContext> {
    Arc::new(MonitorContext {
        settings: SupervisorSettings {
            recordings_root: root.to_path_buf(),
            poll_interval: Duration::from_millis(5),
            stop_grace: Duration::from_millis(10),
            ..SupervisorSettings::default()
        },
        sources: Arc::new(opener.clone()),
        spawner: Arc::new(LoggingSpawner::new(log.clone())),
        uploads: Arc::new(site_monitor::recording::DefaultUploadConnector),
    })
}

pub fn site(name: &str, sources: &[&str]) -> SiteConfig {
    SiteConfig {
        name: name.to_string(),
        cameras: sources
            .iter()
            .map(|s| CameraConfig {
                source: s.to_string(),
                mask: MaskPolicy::Disabled,
                sensitivity: 500,
            })
            .collect(),
        storage_target: None,
    }
}

pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
