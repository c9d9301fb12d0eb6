use anyhow::{anyhow, Result};

use crate::frame::LumaFrame;

/// Minimum changed-region area (pixels) that counts as motion when a camera does
/// not configure its own sensitivity.
pub const DEFAULT_SENSITIVITY: u32 = 500;

/// Blurred difference values above this are "changed".
pub const DIFF_CUTOFF: u8 = 20;

/// Side length of the box blur applied to the difference image.
pub const BLUR_KERNEL: usize = 5;

/// Frame-differencing motion detector.
///
/// Pipeline: absolute difference, box blur (noise suppression), binary threshold,
/// 8-connected components. Motion is reported iff some component's area is
/// strictly greater than the sensitivity.
#[derive(Clone, Copy, Debug)]
pub struct MotionDetector {
    cutoff: u8,
    blur_radius: usize,
}

impl MotionDetector {
    pub fn new() -> Self {
        Self {
            cutoff: DIFF_CUTOFF,
            blur_radius: BLUR_KERNEL / 2,
        }
    }

    pub fn detect(&self, previous: &LumaFrame, current: &LumaFrame, sensitivity: u32) -> Result<bool> {
        let areas = self.changed_regions(previous, current)?;
        Ok(areas.into_iter().any(|area| area > sensitivity as usize))
    }

    /// Areas of every connected changed region, in scan order.
    pub fn changed_regions(&self, previous: &LumaFrame, current: &LumaFrame) -> Result<Vec<usize>> {
        if !previous.same_dimensions(current) {
            return Err(anyhow!(
                "frame size changed from {}x{} to {}x{}",
                previous.width(),
                previous.height(),
                current.width(),
                current.height()
            ));
        }
        let width = current.width() as usize;
        let height = current.height() as usize;

        let diff: Vec<u8> = previous
            .pixels()
            .iter()
            .zip(current.pixels())
            .map(|(a, b)| a.abs_diff(*b))
            .collect();
        if diff.iter().all(|&d| d == 0) {
            return Ok(Vec::new());
        }

        let blurred = box_blur(&diff, width, height, self.blur_radius);
        let changed: Vec<bool> = blurred.iter().map(|&v| v > self.cutoff).collect();
        Ok(component_areas(&changed, width, height))
    }
}

impl Default for MotionDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Separable mean filter with replicated edges.
fn box_blur(src: &[u8], width: usize, height: usize, radius: usize) -> Vec<u8> {
    if radius == 0 {
        return src.to_vec();
    }
    let window = (2 * radius + 1) as u32;

    let mut horizontal = vec![0u8; src.len()];
    for y in 0..height {
        let row = &src[y * width..(y + 1) * width];
        for x in 0..width {
            let sum: u32 = (0..=2 * radius)
                .map(|k| row[(x + k).saturating_sub(radius).min(width - 1)] as u32)
                .sum();
            horizontal[y * width + x] = ((sum + window / 2) / window) as u8;
        }
    }

    let mut out = vec![0u8; src.len()];
    for y in 0..height {
        for x in 0..width {
            let sum: u32 = (0..=2 * radius)
                .map(|k| {
                    let sy = (y + k).saturating_sub(radius).min(height - 1);
                    horizontal[sy * width + x] as u32
                })
                .sum();
            out[y * width + x] = ((sum + window / 2) / window) as u8;
        }
    }
    out
}

fn component_areas(changed: &[bool], width: usize, height: usize) -> Vec<usize> {
    let mut visited = vec![false; changed.len()];
    let mut areas = Vec::new();
    let mut stack = Vec::new();

    for start in 0..changed.len() {
        if !changed[start] || visited[start] {
            continue;
        }
        visited[start] = true;
        stack.push(start);
        let mut area = 0usize;

        while let Some(idx) = stack.pop() {
            area += 1;
            let x = (idx % width) as i64;
            let y = (idx / width) as i64;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                        continue;
                    }
                    let n = ny as usize * width + nx as usize;
                    if changed[n] && !visited[n] {
                        visited[n] = true;
                        stack.push(n);
                    }
                }
            }
        }
        areas.push(area);
    }
    areas
}
