//! Luminance frames.
//!
//! Every source hands the supervisor single-channel 8-bit frames. Masking and motion
//! detection operate on this representation only; colour never reaches the core.

use anyhow::{anyhow, Result};

// ----------------------------------------------------------------------------
// LumaFrame: owned single-channel pixel buffer
// ----------------------------------------------------------------------------

/// One decoded frame, row-major, one byte per pixel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LumaFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl LumaFrame {
    /// Wraps a pixel buffer. The buffer length must be `width * height`.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = (width as usize) * (height as usize);
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        if data.len() != expected {
            return Err(anyhow!(
                "frame buffer is {} bytes, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Uniform frame, mostly useful as a static background.
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; (width as usize) * (height as usize)],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    pub fn same_dimensions(&self, other: &LumaFrame) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Paints an axis-aligned block, clipped to the frame.
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, value: u8) {
        let x_end = x.saturating_add(width).min(self.width);
        let y_end = y.saturating_add(height).min(self.height);
        for row in y.min(self.height)..y_end {
            let start = row as usize * self.width as usize;
            self.data[start + x.min(x_end) as usize..start + x_end as usize].fill(value);
        }
    }
}
