//! Motion detection primitives.
//!
//! - `mask`: removes fixed overlay regions before comparison
//! - `motion`: frame-pair differencing into a yes/no motion decision
//!
//! Both are pure functions of their inputs; all state (previous frame, debounce)
//! lives in the camera channel.

pub mod mask;
pub mod motion;

pub use mask::{BorderStrips, IgnoreRegion, MaskApplier, MaskPolicy};
pub use motion::{MotionDetector, DEFAULT_SENSITIVITY};
