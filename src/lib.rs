//! Site Monitor
//!
//! Motion-triggered recording for camera fleets grouped by physical site.
//!
//! # Architecture
//!
//! Each configured site gets one supervisor thread. A supervisor polls its cameras in
//! order; every pass captures a frame per camera, masks it, compares it with the
//! previous frame, and drives a debounced start/stop state machine that spawns and
//! stops stream-copy recording processes.
//!
//! Sites are (re)configured at runtime through the control API. Replacing a site
//! always drains the old supervisor (stopping and uploading its recordings) before
//! the new one starts, so a site never has two supervisors.
//!
//! # Module Structure
//!
//! - `frame`: single-channel luminance frames
//! - `detect`: frame differencing (`motion`) and ignore regions (`mask`)
//! - `ingest`: frame sources (ffmpeg decode pipe, synthetic `stub://` feeds)
//! - `recording`: recording processes, session layout, uploads
//! - `channel`: per-camera debounce state machine
//! - `supervisor`: per-site polling loop and its thread handle
//! - `registry`: site name to supervisor, serialized per site
//! - `site`: site configuration and configure-request validation
//! - `api`: HTTP control surface
//! - `config`: daemon settings

pub mod api;
pub mod channel;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod recording;
pub mod registry;
pub mod site;
pub mod supervisor;
pub mod throttle;

#[cfg(test)]
pub(crate) mod test_support;

pub use channel::{CameraChannel, ChannelState, StepOutcome, DEFAULT_DEBOUNCE};
pub use detect::{MaskApplier, MaskPolicy, MotionDetector};
pub use error::MonitorError;
pub use frame::LumaFrame;
pub use ingest::{DecodeSettings, DefaultSourceOpener, FrameSource, SourceOpener};
pub use recording::{
    ProcessSpawner, RecordingController, RecordingHandle, RecordingProcess, UploadConnector,
    UploadSink,
};
pub use registry::{ConfigureOutcome, SupervisorRegistry};
pub use site::{parse_configure_request, CameraConfig, SiteConfig, SiteDefaults};
pub use supervisor::{
    MonitorContext, RunSummary, SiteSupervisor, SupervisorHandle, SupervisorSettings,
};
