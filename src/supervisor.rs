//! One site's monitoring loop.
//!
//! A `SiteSupervisor` runs on its own thread and polls its cameras sequentially, in
//! configuration order, until the cancellation flag is set. It then releases every
//! source and stops (and uploads) every active recording before returning, so a
//! joined supervisor owns no processes.

use anyhow::{Context, Result};
use chrono::Local;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::channel::{CameraChannel, StepContext, StepOutcome, DEFAULT_DEBOUNCE};
use crate::error::MonitorError;
use crate::ingest::{DecodeSettings, DefaultSourceOpener, SourceOpener};
use crate::recording::{
    DefaultUploadConnector, FfmpegSpawner, ProcessLedger, ProcessSpawner, RecordingController,
    SessionDirectory, UploadConnector, UploadSink,
};
use crate::site::SiteConfig;

const CANCEL_POLL: Duration = Duration::from_millis(20);

#[derive(Clone, Debug)]
pub struct SupervisorSettings {
    pub debounce: Duration,
    pub poll_interval: Duration,
    pub recordings_root: PathBuf,
    /// How long a recording process gets to exit after being signalled.
    pub stop_grace: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            poll_interval: Duration::from_millis(100),
            recordings_root: PathBuf::from("recordings"),
            stop_grace: Duration::from_secs(5),
        }
    }
}

/// Collaborators shared by every supervisor.
pub struct MonitorContext {
    pub settings: SupervisorSettings,
    pub sources: Arc<dyn SourceOpener>,
    pub spawner: Arc<dyn ProcessSpawner>,
    pub uploads: Arc<dyn UploadConnector>,
}

impl MonitorContext {
    /// ffmpeg for decoding and recording, directory/HTTP upload sinks.
    pub fn with_ffmpeg(settings: SupervisorSettings, decode: DecodeSettings) -> Self {
        let spawner = FfmpegSpawner::new(&decode.ffmpeg_path);
        Self {
            settings,
            sources: Arc::new(DefaultSourceOpener::new(decode)),
            spawner: Arc::new(spawner),
            uploads: Arc::new(DefaultUploadConnector),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub site: String,
    pub passes: u64,
    pub recordings_started: u64,
    pub recordings_stopped: u64,
    /// Recordings still active at cancellation and stopped while draining.
    pub drained: usize,
    pub panicked: bool,
}

pub struct SiteSupervisor {
    config: Arc<SiteConfig>,
    ctx: Arc<MonitorContext>,
    channels: Vec<CameraChannel>,
    controller: RecordingController,
    session: SessionDirectory,
    summary: RunSummary,
}

impl SiteSupervisor {
    pub fn new(config: Arc<SiteConfig>, ctx: Arc<MonitorContext>) -> Self {
        let uploader: Option<Arc<dyn UploadSink>> =
            config
                .storage_target
                .as_deref()
                .and_then(|target| match ctx.uploads.connect(target) {
                    Ok(sink) => Some(sink),
                    Err(e) => {
                        log::error!(
                            "site {}: storage target {} unavailable, recordings stay local: {:#}",
                            config.name,
                            target,
                            e
                        );
                        None
                    }
                });
        let controller = RecordingController::new(
            &config.name,
            ctx.spawner.clone(),
            uploader,
            ctx.settings.stop_grace,
        );
        let channels = config
            .cameras
            .iter()
            .enumerate()
            .map(|(i, camera)| CameraChannel::new(i + 1, camera.clone()))
            .collect();
        let session =
            SessionDirectory::new(&ctx.settings.recordings_root, &config.name, Local::now());
        Self {
            summary: RunSummary {
                site: config.name.clone(),
                ..RunSummary::default()
            },
            config,
            ctx,
            channels,
            controller,
            session,
        }
    }

    pub fn session(&self) -> &SessionDirectory {
        &self.session
    }

    pub fn ledger(&self) -> ProcessLedger {
        self.controller.ledger()
    }

    /// One pass over every camera in configuration order. Stops early, returning
    /// the outcomes so far, if `cancel` is set between cameras.
    pub fn run_pass(&mut self, now: Instant, cancel: &AtomicBool) -> Vec<StepOutcome> {
        let mut ctx = StepContext {
            site: &self.config.name,
            opener: self.ctx.sources.as_ref(),
            controller: &self.controller,
            session: &mut self.session,
            debounce: self.ctx.settings.debounce,
        };
        let mut outcomes = Vec::with_capacity(self.channels.len());
        for channel in &mut self.channels {
            if cancel.load(Ordering::SeqCst) {
                break;
            }
            let outcome = channel.step(&mut ctx, now);
            match outcome {
                StepOutcome::Started => self.summary.recordings_started += 1,
                StepOutcome::Stopped => self.summary.recordings_stopped += 1,
                _ => {}
            }
            outcomes.push(outcome);
        }
        self.summary.passes += 1;
        outcomes
    }

    pub fn run(mut self, cancel: Arc<AtomicBool>) -> RunSummary {
        log::info!(
            "site {}: supervising {} camera(s)",
            self.config.name,
            self.channels.len()
        );
        while !cancel.load(Ordering::SeqCst) {
            let started = Instant::now();
            self.run_pass(started, &cancel);
            let deadline = started + self.ctx.settings.poll_interval;
            while !cancel.load(Ordering::SeqCst) {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                std::thread::sleep((deadline - now).min(CANCEL_POLL));
            }
        }
        self.drain()
    }

    /// Releases every source and stops every active recording.
    pub fn drain(mut self) -> RunSummary {
        for channel in &mut self.channels {
            if channel.shutdown(&self.controller).is_some() {
                self.summary.drained += 1;
                self.summary.recordings_stopped += 1;
            }
        }
        log::info!(
            "site {}: stopped after {} passes ({} recordings, {} drained)",
            self.config.name,
            self.summary.passes,
            self.summary.recordings_started,
            self.summary.drained
        );
        self.summary
    }

    /// Starts a supervisor thread for `config`.
    pub fn spawn(config: Arc<SiteConfig>, ctx: Arc<MonitorContext>) -> Result<SupervisorHandle> {
        let supervisor = SiteSupervisor::new(config.clone(), ctx);
        let ledger = supervisor.ledger();
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_thread = cancel.clone();
        let join = std::thread::Builder::new()
            .name(format!("site-{}", config.name))
            .spawn(move || supervisor.run(cancel_thread))
            .with_context(|| format!("spawn supervisor thread for site {}", config.name))?;
        Ok(SupervisorHandle {
            config,
            cancel,
            ledger,
            join: Some(join),
        })
    }
}

/// Owner side of a running supervisor thread.
pub struct SupervisorHandle {
    config: Arc<SiteConfig>,
    cancel: Arc<AtomicBool>,
    ledger: ProcessLedger,
    join: Option<JoinHandle<RunSummary>>,
}

impl SupervisorHandle {
    pub fn is_running(&self) -> bool {
        self.join
            .as_ref()
            .map(|join| !join.is_finished())
            .unwrap_or(false)
    }

    /// Cancels the supervisor and waits up to `grace` for it to drain.
    ///
    /// On timeout the site's recording processes are force-killed, the ledger
    /// refuses new ones, and the thread is detached.
    pub fn shutdown(mut self, grace: Duration) -> Result<RunSummary, MonitorError> {
        let site = self.config.name.clone();
        self.cancel.store(true, Ordering::SeqCst);
        let Some(join) = self.join.take() else {
            return Ok(RunSummary {
                site,
                ..RunSummary::default()
            });
        };

        let deadline = Instant::now() + grace;
        while !join.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if !join.is_finished() {
            let killed = self.ledger.revoke();
            let err = MonitorError::ShutdownTimeout { site, grace };
            log::error!(
                "{}; force-killed {} recording process(es), thread detached",
                err,
                killed
            );
            return Err(err);
        }

        match join.join() {
            Ok(summary) => Ok(summary),
            Err(_) => {
                log::error!("site {}: supervisor thread panicked", site);
                let killed = self.ledger.revoke();
                if killed > 0 {
                    log::error!("site {}: force-killed {} orphaned recording(s)", site, killed);
                }
                Ok(RunSummary {
                    site,
                    panicked: true,
                    ..RunSummary::default()
                })
            }
        }
    }
}

impl Drop for SupervisorHandle {
    fn drop(&mut self) {
        // Never leave a supervisor running without an owner.
        self.cancel.store(true, Ordering::SeqCst);
    }
}
