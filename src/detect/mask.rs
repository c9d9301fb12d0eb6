use serde::{Deserialize, Serialize};

use crate::frame::LumaFrame;

/// Default height of the blanked bottom strip (timestamp overlays).
pub const DEFAULT_BOTTOM_STRIP_PX: u32 = 60;
/// Default width of each blanked side strip.
pub const DEFAULT_SIDE_STRIP_PX: u32 = 40;

/// Rectangle excluded from motion comparison, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoreRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl IgnoreRegion {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Strip widths for the border heuristic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorderStrips {
    pub bottom: u32,
    pub sides: u32,
}

impl Default for BorderStrips {
    fn default() -> Self {
        Self {
            bottom: DEFAULT_BOTTOM_STRIP_PX,
            sides: DEFAULT_SIDE_STRIP_PX,
        }
    }
}

/// How a camera's frames are masked. Resolved once, at configure time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum MaskPolicy {
    /// Zero an explicit caller-supplied rectangle.
    Region(IgnoreRegion),
    /// Zero a bottom strip and both side strips.
    Border(BorderStrips),
    Disabled,
}

/// Zeroes ignored pixels in place before frames reach the detector.
#[derive(Clone, Copy, Debug)]
pub struct MaskApplier {
    policy: MaskPolicy,
}

impl MaskApplier {
    pub fn new(policy: MaskPolicy) -> Self {
        Self { policy }
    }

    pub fn apply(&self, frame: &mut LumaFrame) {
        match self.policy {
            MaskPolicy::Region(region) => {
                frame.fill_rect(region.x, region.y, region.width, region.height, 0);
            }
            MaskPolicy::Border(strips) => {
                let (width, height) = (frame.width(), frame.height());
                let bottom = strips.bottom.min(height);
                frame.fill_rect(0, height - bottom, width, bottom, 0);
                frame.fill_rect(0, 0, strips.sides, height, 0);
                let sides = strips.sides.min(width);
                frame.fill_rect(width - sides, 0, sides, height, 0);
            }
            MaskPolicy::Disabled => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bright() -> LumaFrame {
        LumaFrame::filled(100, 80, 200)
    }

    fn zeroed(frame: &LumaFrame) -> usize {
        frame.pixels().iter().filter(|&&p| p == 0).count()
    }

    #[test]
    fn region_policy_zeroes_only_the_rectangle() {
        let mut frame = bright();
        MaskApplier::new(MaskPolicy::Region(IgnoreRegion::new(10, 20, 30, 5))).apply(&mut frame);
        assert_eq!(zeroed(&frame), 150);
        assert_eq!(frame.get(10, 20), Some(0));
        assert_eq!(frame.get(39, 24), Some(0));
        assert_eq!(frame.get(40, 24), Some(200));
        assert_eq!(frame.get(10, 25), Some(200));
    }

    #[test]
    fn region_outside_frame_is_clipped() {
        let mut frame = bright();
        MaskApplier::new(MaskPolicy::Region(IgnoreRegion::new(90, 70, 500, 500))).apply(&mut frame);
        assert_eq!(zeroed(&frame), 100);
        let mut untouched = bright();
        MaskApplier::new(MaskPolicy::Region(IgnoreRegion::new(400, 400, 5, 5))).apply(&mut untouched);
        assert_eq!(untouched, bright());
    }

    #[test]
    fn border_policy_blanks_bottom_and_sides() {
        let mut frame = bright();
        let strips = BorderStrips {
            bottom: 10,
            sides: 5,
        };
        MaskApplier::new(MaskPolicy::Border(strips)).apply(&mut frame);
        assert_eq!(frame.get(0, 0), Some(0));
        assert_eq!(frame.get(99, 0), Some(0));
        assert_eq!(frame.get(50, 79), Some(0));
        assert_eq!(frame.get(50, 69), Some(200));
        assert_eq!(frame.get(5, 10), Some(200));
        // 10 rows of 100 plus two 5-wide columns over the remaining 70 rows.
        assert_eq!(zeroed(&frame), 1000 + 2 * 5 * 70);
    }

    #[test]
    fn oversized_border_blanks_everything() {
        let mut frame = bright();
        let strips = BorderStrips {
            bottom: 500,
            sides: 500,
        };
        MaskApplier::new(MaskPolicy::Border(strips)).apply(&mut frame);
        assert_eq!(zeroed(&frame), 8000);
    }

    #[test]
    fn masking_is_idempotent() {
        for policy in [
            MaskPolicy::Region(IgnoreRegion::new(3, 4, 50, 60)),
            MaskPolicy::Border(BorderStrips::default()),
            MaskPolicy::Disabled,
        ] {
            let applier = MaskApplier::new(policy);
            let mut once = bright();
            once.fill_rect(20, 20, 30, 30, 90);
            applier.apply(&mut once);
            let mut twice = once.clone();
            applier.apply(&mut twice);
            assert_eq!(once, twice, "{:?}", policy);
        }
    }
}
