//! Recording lifecycle for one site.
//!
//! `RecordingController::start` spawns a stream-copy process into the session
//! directory; `stop` terminates it, waits, and hands the file to the site's upload
//! sink if one is configured. Stop and upload failures are logged and reported,
//! never propagated: the camera must stay recordable afterwards.

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::MonitorError;

pub mod process;
pub mod upload;

pub use process::{
    ExitKind, FfmpegSpawner, ProcessLedger, ProcessSpawner, RecordCommand, RecordingProcess,
};
pub use upload::{DefaultUploadConnector, DirectorySink, UploadConnector, UploadSink};

/// Wall-clock format for session directories and recording files.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

pub fn recording_file_name(started_at: DateTime<Local>, camera_index: usize) -> String {
    format!(
        "{}_camera_{}.mp4",
        started_at.format(TIMESTAMP_FORMAT),
        camera_index
    )
}

/// First of `name`, `stem_2.ext`, `stem_3.ext`, ... that does not exist in `dir`.
fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = name.rsplit_once('.').unwrap_or((name, ""));
    (2u32..)
        .map(|n| {
            if ext.is_empty() {
                dir.join(format!("{}_{}", stem, n))
            } else {
                dir.join(format!("{}_{}.{}", stem, n, ext))
            }
        })
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

// ----------------------------------------------------------------------------
// Session directory
// ----------------------------------------------------------------------------

/// `<recordings>/<site>/<run start>/`, created on the first recording of a run.
#[derive(Debug)]
pub struct SessionDirectory {
    site_root: PathBuf,
    started_at: DateTime<Local>,
    path: Option<PathBuf>,
}

impl SessionDirectory {
    pub fn new(recordings_root: &Path, site: &str, started_at: DateTime<Local>) -> Self {
        Self {
            site_root: recordings_root.join(site),
            started_at,
            path: None,
        }
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// The directory, if this run has created it.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Creates the directory on first use and returns it. A directory left by an
    /// earlier run with the same timestamp is never reused.
    pub fn ensure(&mut self) -> std::io::Result<PathBuf> {
        if let Some(path) = &self.path {
            return Ok(path.clone());
        }
        std::fs::create_dir_all(&self.site_root)?;
        let name = self.started_at.format(TIMESTAMP_FORMAT).to_string();
        let path = unique_path(&self.site_root, &name);
        std::fs::create_dir(&path)?;
        log::info!("session directory {}", path.display());
        self.path = Some(path.clone());
        Ok(path)
    }
}

// ----------------------------------------------------------------------------
// RecordingHandle / StopReport
// ----------------------------------------------------------------------------

/// Logical identity of one recording.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordingKey {
    pub site: String,
    pub camera_index: usize,
    pub started_at: DateTime<Local>,
}

/// A recording in progress. Dropping it without `stop` kills the process.
pub struct RecordingHandle {
    process: Box<dyn RecordingProcess>,
    path: PathBuf,
    key: RecordingKey,
    started: Instant,
}

impl RecordingHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key(&self) -> &RecordingKey {
        &self.key
    }
}

impl std::fmt::Debug for RecordingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingHandle")
            .field("pid", &self.process.id())
            .field("path", &self.path)
            .field("key", &self.key)
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadOutcome {
    NotConfigured,
    Uploaded { target: String },
    Failed { target: String },
    /// The process never produced a file.
    NoOutput,
}

#[derive(Clone, Debug)]
pub struct StopReport {
    pub path: PathBuf,
    /// `None` when the process could not be waited on.
    pub exit: Option<ExitKind>,
    pub upload: UploadOutcome,
    pub local_retained: bool,
    pub duration: Duration,
}

// ----------------------------------------------------------------------------
// RecordingController
// ----------------------------------------------------------------------------

pub struct RecordingController {
    site: String,
    spawner: Arc<dyn ProcessSpawner>,
    uploader: Option<Arc<dyn UploadSink>>,
    ledger: ProcessLedger,
    stop_grace: Duration,
}

impl RecordingController {
    pub fn new(
        site: &str,
        spawner: Arc<dyn ProcessSpawner>,
        uploader: Option<Arc<dyn UploadSink>>,
        stop_grace: Duration,
    ) -> Self {
        let ledger = ProcessLedger::new(spawner.clone());
        Self {
            site: site.to_string(),
            spawner,
            uploader,
            ledger,
            stop_grace,
        }
    }

    pub fn ledger(&self) -> ProcessLedger {
        self.ledger.clone()
    }

    pub fn start(
        &self,
        source: &str,
        destination_dir: &Path,
        camera_index: usize,
        started_at: DateTime<Local>,
    ) -> Result<RecordingHandle, MonitorError> {
        let path = unique_path(
            destination_dir,
            &recording_file_name(started_at, camera_index),
        );
        let command = RecordCommand {
            source: source.to_string(),
            destination: path.clone(),
        };
        let mut process =
            self.spawner
                .spawn(&command)
                .map_err(|e| MonitorError::RecordingStart {
                    camera: camera_index,
                    reason: format!("{:#}", e),
                })?;

        if !self.ledger.track(process.id()) {
            let _ = process.terminate();
            let _ = process.wait(Duration::ZERO);
            return Err(MonitorError::RecordingStart {
                camera: camera_index,
                reason: "site is shutting down".to_string(),
            });
        }

        log::info!(
            "site {} camera {}: recording started (pid {}) -> {}",
            self.site,
            camera_index,
            process.id(),
            path.display()
        );
        Ok(RecordingHandle {
            process,
            path,
            key: RecordingKey {
                site: self.site.clone(),
                camera_index,
                started_at,
            },
            started: Instant::now(),
        })
    }

    pub fn stop(&self, mut handle: RecordingHandle) -> StopReport {
        let pid = handle.process.id();
        let camera = handle.key.camera_index;

        if let Err(e) = handle.process.terminate() {
            log::warn!(
                "{}",
                MonitorError::RecordingStop {
                    path: handle.path.clone(),
                    reason: format!("{:#}", e),
                }
            );
        }
        let exit = match handle.process.wait(self.stop_grace) {
            Ok(ExitKind::Clean) => Some(ExitKind::Clean),
            Ok(ExitKind::Forced) => {
                log::warn!(
                    "site {} camera {}: recording pid {} killed after {:?}",
                    self.site,
                    camera,
                    pid,
                    self.stop_grace
                );
                Some(ExitKind::Forced)
            }
            Err(e) => {
                log::error!(
                    "{}",
                    MonitorError::RecordingStop {
                        path: handle.path.clone(),
                        reason: format!("{:#}", e),
                    }
                );
                None
            }
        };
        self.ledger.release(pid);

        let upload = self.upload(&handle);
        let local_retained = handle.path.exists();
        let duration = handle.started.elapsed();
        log::info!(
            "site {} camera {}: recording stopped after {:.1}s ({:?})",
            self.site,
            camera,
            duration.as_secs_f32(),
            upload
        );

        StopReport {
            path: handle.path.clone(),
            exit,
            upload,
            local_retained,
            duration,
        }
    }

    fn upload(&self, handle: &RecordingHandle) -> UploadOutcome {
        let Some(sink) = &self.uploader else {
            return UploadOutcome::NotConfigured;
        };
        if !handle.path.exists() {
            log::warn!(
                "site {} camera {}: no output at {}, nothing to upload",
                self.site,
                handle.key.camera_index,
                handle.path.display()
            );
            return UploadOutcome::NoOutput;
        }

        let file_name = handle
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let key = format!("{}/{}/{}", self.site, handle.key.camera_index, file_name);
        let target = sink.target().to_string();

        match sink.put_file(&handle.path, &key) {
            Ok(()) => {
                if let Err(e) = std::fs::remove_file(&handle.path) {
                    log::warn!(
                        "uploaded {} but could not remove local copy: {}",
                        handle.path.display(),
                        e
                    );
                }
                UploadOutcome::Uploaded { target }
            }
            Err(e) => {
                log::error!(
                    "{}",
                    MonitorError::Upload {
                        path: handle.path.clone(),
                        target: target.clone(),
                        reason: format!("{:#}", e),
                    }
                );
                UploadOutcome::Failed { target }
            }
        }
    }
}
