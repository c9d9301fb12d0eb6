//! Frame sources.
//!
//! The supervisor only sees the `FrameSource` / `SourceOpener` pair:
//! - `stub://<name>` identifiers open a synthetic source (tests, demos)
//! - anything else is decoded by an `ffmpeg` child process into raw luma frames
//!
//! Opening a source never blocks. Connection work happens on the first read, so a
//! dead camera costs one failed read per pass rather than stalling configuration.

use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

use crate::frame::LumaFrame;

pub mod ffmpeg;
pub mod synthetic;

pub use ffmpeg::FfmpegSource;
pub use synthetic::SyntheticSource;

/// One camera's capture handle.
pub trait FrameSource: Send {
    fn identifier(&self) -> &str;

    /// Blocks until the next frame is available or the source fails.
    fn read_frame(&mut self) -> Result<LumaFrame>;

    /// Releases the underlying connection. Sources also release on drop.
    fn release(&mut self) {}
}

/// Opens capture handles by identifier.
pub trait SourceOpener: Send + Sync {
    fn open(&self, identifier: &str) -> Result<Box<dyn FrameSource>>;
}

/// Decoder parameters shared by every ffmpeg-backed source.
#[derive(Clone, Debug)]
pub struct DecodeSettings {
    pub ffmpeg_path: PathBuf,
    /// Frames are scaled to this size before detection.
    pub width: u32,
    pub height: u32,
    /// Decoder output rate; frames in between are dropped by ffmpeg.
    pub target_fps: u32,
    /// Minimum delay between decoder restarts after a failure.
    pub reconnect_backoff: Duration,
}

impl Default for DecodeSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            width: 320,
            height: 240,
            target_fps: 5,
            reconnect_backoff: Duration::from_secs(5),
        }
    }
}

/// Dispatches on the identifier scheme.
#[derive(Clone, Debug, Default)]
pub struct DefaultSourceOpener {
    settings: DecodeSettings,
}

impl DefaultSourceOpener {
    pub fn new(settings: DecodeSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &DecodeSettings {
        &self.settings
    }
}

impl SourceOpener for DefaultSourceOpener {
    fn open(&self, identifier: &str) -> Result<Box<dyn FrameSource>> {
        if identifier.starts_with(synthetic::STUB_SCHEME) {
            Ok(Box::new(SyntheticSource::new(
                identifier,
                self.settings.width,
                self.settings.height,
            )?))
        } else {
            Ok(Box::new(FfmpegSource::new(identifier, self.settings.clone())))
        }
    }
}
