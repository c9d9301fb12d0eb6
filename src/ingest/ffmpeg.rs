//! ffmpeg decode pipe.
//!
//! Runs `ffmpeg -i <source> ... -pix_fmt gray -f rawvideo pipe:1` and reads exactly
//! one `width * height` frame per call. The decoder is restarted after any read
//! failure, no sooner than the reconnect backoff.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Instant;

use super::{DecodeSettings, FrameSource};
use crate::frame::LumaFrame;

pub struct FfmpegSource {
    identifier: String,
    settings: DecodeSettings,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    frames_read: u64,
    last_failure: Option<Instant>,
}

impl FfmpegSource {
    pub fn new(identifier: &str, settings: DecodeSettings) -> Self {
        Self {
            identifier: identifier.to_string(),
            settings,
            child: None,
            stdout: None,
            frames_read: 0,
            last_failure: None,
        }
    }

    fn spawn(&mut self) -> Result<()> {
        let mut child = Command::new(&self.settings.ffmpeg_path)
            .args(decoder_args(&self.identifier, &self.settings))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| {
                format!(
                    "spawn decoder {} for {}",
                    self.settings.ffmpeg_path.display(),
                    self.identifier
                )
            })?;
        self.stdout = child.stdout.take();
        self.child = Some(child);
        log::debug!("decoder started for {}", self.identifier);
        Ok(())
    }

    fn stop_decoder(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    fn fail(&mut self, err: anyhow::Error) -> anyhow::Error {
        self.stop_decoder();
        self.last_failure = Some(Instant::now());
        err
    }
}

impl FrameSource for FfmpegSource {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn read_frame(&mut self) -> Result<LumaFrame> {
        if self.child.is_none() {
            if let Some(failed_at) = self.last_failure {
                let waited = failed_at.elapsed();
                if waited < self.settings.reconnect_backoff {
                    return Err(anyhow!(
                        "decoder restart deferred for {:?}",
                        self.settings.reconnect_backoff - waited
                    ));
                }
            }
            if let Err(err) = self.spawn() {
                return Err(self.fail(err));
            }
        }

        let len = self.settings.width as usize * self.settings.height as usize;
        let mut buf = vec![0u8; len];
        let read = match self.stdout.as_mut() {
            Some(stdout) => stdout.read_exact(&mut buf),
            None => return Err(self.fail(anyhow!("decoder has no output pipe"))),
        };
        if let Err(err) = read {
            return Err(self.fail(anyhow!("decoder stream ended: {}", err)));
        }

        self.frames_read += 1;
        LumaFrame::new(self.settings.width, self.settings.height, buf)
    }

    fn release(&mut self) {
        if self.child.is_some() {
            log::debug!(
                "{}: releasing decoder after {} frames",
                self.identifier,
                self.frames_read
            );
        }
        self.stop_decoder();
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.stop_decoder();
    }
}

pub(crate) fn decoder_args(identifier: &str, settings: &DecodeSettings) -> Vec<String> {
    let mut args: Vec<String> = ["-nostdin", "-hide_banner", "-loglevel", "error"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if identifier.starts_with("rtsp://") || identifier.starts_with("rtsps://") {
        args.extend(["-rtsp_transport".to_string(), "tcp".to_string()]);
    }
    let fps = settings.target_fps.max(1);
    args.extend([
        "-i".to_string(),
        identifier.to_string(),
        "-an".to_string(),
        "-vf".to_string(),
        format!("fps={},scale={}:{}", fps, settings.width, settings.height),
        "-pix_fmt".to_string(),
        "gray".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "pipe:1".to_string(),
    ]);
    args
}
