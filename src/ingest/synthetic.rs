//! Synthetic source for `stub://` identifiers.
//!
//! Produces a static gradient background. With the default `periodic` motion
//! setting a bright block sweeps across the scene for 20 frames of every 100;
//! `?motion=always` keeps it moving, `?motion=off` never shows it.

use anyhow::{anyhow, Result};

use super::FrameSource;
use crate::frame::LumaFrame;

pub const STUB_SCHEME: &str = "stub://";

const CYCLE_FRAMES: u64 = 100;
const ACTIVE_FROM: u64 = 50;
const ACTIVE_UNTIL: u64 = 70;
const BLOCK_SIDE: u32 = 32;
const BLOCK_STEP: u64 = 6;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MotionMode {
    Periodic,
    Always,
    Off,
}

pub struct SyntheticSource {
    identifier: String,
    width: u32,
    height: u32,
    mode: MotionMode,
    frame_count: u64,
    background: LumaFrame,
}

impl SyntheticSource {
    pub fn new(identifier: &str, width: u32, height: u32) -> Result<Self> {
        let rest = identifier
            .strip_prefix(STUB_SCHEME)
            .ok_or_else(|| anyhow!("synthetic source needs a {} identifier", STUB_SCHEME))?;
        let mode = match rest.split_once('?').map(|(_, query)| query) {
            None => MotionMode::Periodic,
            Some(query) => parse_mode(query)?,
        };

        let pixels = (0..height)
            .flat_map(|y| (0..width).map(move |x| (((x + y) % 256) / 2) as u8))
            .collect();
        let background = LumaFrame::new(width, height, pixels)?;
        log::info!("SyntheticSource: connected to {} ({:?})", identifier, mode);

        Ok(Self {
            identifier: identifier.to_string(),
            width,
            height,
            mode,
            frame_count: 0,
            background,
        })
    }

    fn block_visible(&self) -> bool {
        match self.mode {
            MotionMode::Always => true,
            MotionMode::Off => false,
            MotionMode::Periodic => {
                let phase = self.frame_count % CYCLE_FRAMES;
                (ACTIVE_FROM..ACTIVE_UNTIL).contains(&phase)
            }
        }
    }
}

fn parse_mode(query: &str) -> Result<MotionMode> {
    for pair in query.split('&') {
        if let Some(("motion", value)) = pair.split_once('=') {
            return match value {
                "periodic" => Ok(MotionMode::Periodic),
                "always" => Ok(MotionMode::Always),
                "off" => Ok(MotionMode::Off),
                other => Err(anyhow!("unknown stub motion mode '{}'", other)),
            };
        }
    }
    Ok(MotionMode::Periodic)
}

impl FrameSource for SyntheticSource {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn read_frame(&mut self) -> Result<LumaFrame> {
        self.frame_count += 1;
        let mut frame = self.background.clone();
        if self.block_visible() {
            let travel = self.width.saturating_sub(BLOCK_SIDE).max(1) as u64;
            let x = ((self.frame_count * BLOCK_STEP) % travel) as u32;
            frame.fill_rect(x, self.height / 3, BLOCK_SIDE, BLOCK_SIDE, 255);
        }
        Ok(frame)
    }
}
