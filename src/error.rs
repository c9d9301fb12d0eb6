//! Failure taxonomy for the monitor.
//!
//! Most functions return `anyhow::Result`; the variants here are the ones callers
//! need to tell apart (the control API downcasts to pick a status code, the channel
//! logs and contains the per-camera ones).

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Bad or missing request field. No state was changed.
    #[error("invalid {field}: {message}")]
    Configuration {
        field: &'static str,
        message: String,
    },

    #[error("site '{0}' is not configured")]
    SiteNotFound(String),

    #[error("camera {index} is outside 1..={count} for site '{site}'")]
    CameraNotFound {
        site: String,
        index: usize,
        count: usize,
    },

    /// A camera failed to produce a frame this pass.
    #[error("camera {camera} produced no frame: {reason}")]
    SourceRead { camera: usize, reason: String },

    /// The recording process could not be spawned.
    #[error("recording for camera {camera} did not start: {reason}")]
    RecordingStart { camera: usize, reason: String },

    #[error("recording {} did not stop cleanly: {reason}", path.display())]
    RecordingStop { path: PathBuf, reason: String },

    #[error("upload of {} to {target} failed: {reason}", path.display())]
    Upload {
        path: PathBuf,
        target: String,
        reason: String,
    },

    /// A supervisor did not drain within its grace period.
    #[error("supervisor for site '{site}' did not drain within {grace:?}")]
    ShutdownTimeout { site: String, grace: Duration },
}

impl MonitorError {
    pub fn configuration(field: &'static str, message: impl Into<String>) -> Self {
        Self::Configuration {
            field,
            message: message.into(),
        }
    }

    /// Field name for configuration failures, used in API error bodies.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Configuration { field, .. } => Some(field),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SiteNotFound(_) | Self::CameraNotFound { .. })
    }
}
