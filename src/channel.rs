//! Per-camera capture and debounce state.
//!
//! A `CameraChannel` owns one source handle, the last masked frame, and at most one
//! active recording. Each `step` captures a frame, compares it with the previous one,
//! and feeds the result through `transition`:
//!
//! ```text
//!   IDLE      --motion-------------------------> RECORDING   (start)
//!   RECORDING --motion-------------------------> RECORDING   (refresh last motion)
//!   RECORDING --quiet, now - last > window-----> IDLE        (stop)
//!   RECORDING --quiet, within window-----------> RECORDING   (hold)
//! ```

use chrono::Local;
use std::time::{Duration, Instant};

use crate::detect::{MaskApplier, MotionDetector};
use crate::error::MonitorError;
use crate::frame::LumaFrame;
use crate::ingest::{FrameSource, SourceOpener};
use crate::recording::{RecordingController, RecordingHandle, SessionDirectory, StopReport};
use crate::site::CameraConfig;
use crate::throttle::{FailureLog, LogThrottle};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(20);

/// Consecutive read failures after which the previous frame is discarded.
pub const STALE_BASELINE_FAILURES: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Recording,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    None,
    Start,
    Refresh,
    Stop,
    Hold,
}

/// Debounce decision for one observation. `since_last_motion` is only consulted
/// while recording.
pub fn transition(
    state: ChannelState,
    motion: bool,
    since_last_motion: Duration,
    window: Duration,
) -> Transition {
    match (state, motion) {
        (ChannelState::Idle, true) => Transition::Start,
        (ChannelState::Idle, false) => Transition::None,
        (ChannelState::Recording, true) => Transition::Refresh,
        (ChannelState::Recording, false) if since_last_motion > window => Transition::Stop,
        (ChannelState::Recording, false) => Transition::Hold,
    }
}

/// What one `step` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// No frame this pass; state untouched.
    Skipped,
    /// Frame stored as the comparison baseline; no decision.
    Baseline,
    Idle,
    Started,
    /// Motion detected but the recording could not start; still idle.
    StartFailed,
    Continued,
    Holding,
    Stopped,
}

/// Site-level collaborators a channel needs for one step.
pub struct StepContext<'a> {
    pub site: &'a str,
    pub opener: &'a dyn SourceOpener,
    pub controller: &'a RecordingController,
    pub session: &'a mut SessionDirectory,
    pub debounce: Duration,
}

struct ActiveRecording {
    handle: RecordingHandle,
    last_motion: Instant,
}

pub struct CameraChannel {
    index: usize,
    config: CameraConfig,
    detector: MotionDetector,
    mask: MaskApplier,
    source: Option<Box<dyn FrameSource>>,
    previous: Option<LumaFrame>,
    active: Option<ActiveRecording>,
    read_failures: u32,
    throttle: LogThrottle,
}

impl CameraChannel {
    /// `index` is 1-based, matching file names and the control API.
    pub fn new(index: usize, config: CameraConfig) -> Self {
        Self {
            index,
            mask: MaskApplier::new(config.mask),
            config,
            detector: MotionDetector::new(),
            source: None,
            previous: None,
            active: None,
            read_failures: 0,
            throttle: LogThrottle::default(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn config(&self) -> &CameraConfig {
        &self.config
    }

    pub fn state(&self) -> ChannelState {
        if self.active.is_some() {
            ChannelState::Recording
        } else {
            ChannelState::Idle
        }
    }

    pub fn has_baseline(&self) -> bool {
        self.previous.is_some()
    }

    pub fn step(&mut self, ctx: &mut StepContext<'_>, now: Instant) -> StepOutcome {
        let Some(mut frame) = self.capture(ctx, now) else {
            return StepOutcome::Skipped;
        };
        self.mask.apply(&mut frame);

        let motion = match &self.previous {
            None => None,
            Some(previous) => match self
                .detector
                .detect(previous, &frame, self.config.sensitivity)
            {
                Ok(motion) => Some(motion),
                Err(e) => {
                    log::warn!(
                        "site {} camera {}: {:#}; resetting baseline",
                        ctx.site,
                        self.index,
                        e
                    );
                    None
                }
            },
        };
        self.previous = Some(frame);
        let Some(motion) = motion else {
            return StepOutcome::Baseline;
        };

        let since_last_motion = self
            .active
            .as_ref()
            .map(|active| now.saturating_duration_since(active.last_motion))
            .unwrap_or_default();
        match transition(self.state(), motion, since_last_motion, ctx.debounce) {
            Transition::None => StepOutcome::Idle,
            Transition::Start => self.start_recording(ctx, now),
            Transition::Refresh => {
                if let Some(active) = self.active.as_mut() {
                    active.last_motion = now;
                }
                StepOutcome::Continued
            }
            Transition::Hold => StepOutcome::Holding,
            Transition::Stop => {
                if let Some(active) = self.active.take() {
                    ctx.controller.stop(active.handle);
                }
                StepOutcome::Stopped
            }
        }
    }

    /// Releases the source and stops any active recording.
    pub fn shutdown(&mut self, controller: &RecordingController) -> Option<StopReport> {
        if let Some(mut source) = self.source.take() {
            source.release();
        }
        self.previous = None;
        self.active
            .take()
            .map(|active| controller.stop(active.handle))
    }

    fn capture(&mut self, ctx: &StepContext<'_>, now: Instant) -> Option<LumaFrame> {
        if self.source.is_none() {
            match ctx.opener.open(&self.config.source) {
                Ok(source) => self.source = Some(source),
                Err(e) => {
                    self.read_failed(ctx.site, format!("{:#}", e), now);
                    return None;
                }
            }
        }
        let result = self.source.as_mut()?.read_frame();
        match result {
            Ok(frame) => {
                if let Some(failures) = self.throttle.on_success() {
                    log::info!(
                        "site {} camera {}: source recovered after {} failed reads",
                        ctx.site,
                        self.index,
                        failures
                    );
                }
                self.read_failures = 0;
                Some(frame)
            }
            Err(e) => {
                self.read_failed(ctx.site, format!("{:#}", e), now);
                None
            }
        }
    }

    fn read_failed(&mut self, site: &str, reason: String, now: Instant) {
        self.read_failures = self.read_failures.saturating_add(1);
        if self.read_failures == STALE_BASELINE_FAILURES {
            self.previous = None;
        }
        let err = MonitorError::SourceRead {
            camera: self.index,
            reason,
        };
        match self.throttle.on_failure(now) {
            FailureLog::First => log::warn!("site {}: {}", site, err),
            FailureLog::Summary { suppressed } => log::warn!(
                "site {}: {} ({} similar failures suppressed)",
                site,
                err,
                suppressed
            ),
            FailureLog::Quiet => {}
        }
    }

    fn start_recording(&mut self, ctx: &mut StepContext<'_>, now: Instant) -> StepOutcome {
        let dir = match ctx.session.ensure() {
            Ok(dir) => dir,
            Err(e) => {
                log::error!(
                    "site {} camera {}: cannot create session directory: {}",
                    ctx.site,
                    self.index,
                    e
                );
                return StepOutcome::StartFailed;
            }
        };
        match ctx
            .controller
            .start(&self.config.source, &dir, self.index, Local::now())
        {
            Ok(handle) => {
                self.active = Some(ActiveRecording {
                    handle,
                    last_motion: now,
                });
                StepOutcome::Started
            }
            Err(e) => {
                log::error!("site {}: {}", ctx.site, e);
                StepOutcome::StartFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::MaskPolicy;
    use crate::test_support::{FakeSpawner, SceneOpener};
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};

    const WINDOW: Duration = Duration::from_secs(20);

    struct Rig {
        opener: SceneOpener,
        spawner: Arc<FakeSpawner>,
        controller: RecordingController,
        session: SessionDirectory,
        _root: TempDir,
    }

    impl Rig {
        fn new(spawner: FakeSpawner) -> Self {
            let root = tempdir().unwrap();
            let spawner = Arc::new(spawner);
            Self {
                opener: SceneOpener::default(),
                controller: RecordingController::new(
                    "store1",
                    spawner.clone(),
                    None,
                    Duration::from_millis(10),
                ),
                spawner,
                session: SessionDirectory::new(root.path(), "store1", Local::now()),
                _root: root,
            }
        }

        fn step(&mut self, channel: &mut CameraChannel, now: Instant) -> StepOutcome {
            let mut ctx = StepContext {
                site: "store1",
                opener: &self.opener,
                controller: &self.controller,
                session: &mut self.session,
                debounce: WINDOW,
            };
            channel.step(&mut ctx, now)
        }
    }

    fn camera(source: &str) -> CameraChannel {
        camera_with_sensitivity(source, 500)
    }

    fn camera_with_sensitivity(source: &str, sensitivity: u32) -> CameraChannel {
        CameraChannel::new(
            1,
            CameraConfig {
                source: source.to_string(),
                mask: MaskPolicy::Disabled,
                sensitivity,
            },
        )
    }

    #[test]
    fn transition_table() {
        use ChannelState::*;
        let w = WINDOW;
        assert_eq!(transition(Idle, false, Duration::ZERO, w), Transition::None);
        assert_eq!(transition(Idle, true, Duration::ZERO, w), Transition::Start);
        assert_eq!(transition(Recording, true, w * 2, w), Transition::Refresh);
        assert_eq!(transition(Recording, false, w, w), Transition::Hold);
        assert_eq!(
            transition(Recording, false, w + Duration::from_millis(1), w),
            Transition::Stop
        );
    }

    #[test]
    fn first_frame_is_only_a_baseline() {
        let mut rig = Rig::new(FakeSpawner::default());
        rig.opener.scene.set_motion(true);
        let mut channel = camera("stub://a");
        assert_eq!(rig.step(&mut channel, Instant::now()), StepOutcome::Baseline);
        assert_eq!(channel.state(), ChannelState::Idle);
        assert_eq!(rig.spawner.spawned(), 0);
    }

    #[test]
    fn stops_exactly_after_the_window() {
        let mut rig = Rig::new(FakeSpawner::default());
        let mut channel = camera("stub://a");
        let t0 = Instant::now();

        rig.opener.scene.set_motion(true);
        assert_eq!(rig.step(&mut channel, t0), StepOutcome::Baseline);
        assert_eq!(rig.step(&mut channel, t0), StepOutcome::Started);

        rig.opener.scene.set_motion(false);
        // Block leaving the scene still differs from the last frame.
        assert_eq!(rig.step(&mut channel, t0), StepOutcome::Continued);
        assert_eq!(rig.step(&mut channel, t0 + WINDOW), StepOutcome::Holding);
        assert_eq!(channel.state(), ChannelState::Recording);
        assert_eq!(
            rig.step(&mut channel, t0 + WINDOW + Duration::from_millis(1)),
            StepOutcome::Stopped
        );
        assert_eq!(channel.state(), ChannelState::Idle);
        assert_eq!(rig.spawner.terminated(), 1);
    }

    #[test]
    fn store1_moving_region_on_passes_6_to_9() {
        let mut rig = Rig::new(FakeSpawner::default());
        let mut channel = camera_with_sensitivity("stub://store1-cam1", 100);
        rig.opener.scene.set_parked(true);
        let t0 = Instant::now();
        let pass = |n: u64| t0 + Duration::from_secs(n);

        assert_eq!(rig.step(&mut channel, pass(1)), StepOutcome::Baseline);
        for n in 2..=5 {
            assert_eq!(rig.step(&mut channel, pass(n)), StepOutcome::Idle, "pass {}", n);
        }
        assert_eq!(rig.spawner.spawned(), 0);
        assert!(rig.session.path().is_none());

        rig.opener.scene.set_motion(true);
        assert_eq!(rig.step(&mut channel, pass(6)), StepOutcome::Started);
        for n in 7..=9 {
            assert_eq!(rig.step(&mut channel, pass(n)), StepOutcome::Continued, "pass {}", n);
        }

        // The region stops moving: no detection from pass 10 on.
        rig.opener.scene.set_motion(false);
        for n in 10..=29 {
            assert_eq!(rig.step(&mut channel, pass(n)), StepOutcome::Holding, "pass {}", n);
        }
        assert_eq!(rig.step(&mut channel, pass(30)), StepOutcome::Stopped);
        assert_eq!(channel.state(), ChannelState::Idle);
        assert_eq!(rig.step(&mut channel, pass(31)), StepOutcome::Idle);

        assert_eq!(rig.spawner.spawned(), 1);
        assert_eq!(rig.spawner.terminated(), 1);
    }

    #[test]
    fn bursts_within_the_window_share_one_recording() {
        let mut rig = Rig::new(FakeSpawner::default());
        let mut channel = camera("stub://store1-cam1");
        let t0 = Instant::now();
        let secs = |s: u64| t0 + Duration::from_secs(s);

        rig.opener.scene.set_motion(true);
        rig.step(&mut channel, secs(0));
        assert_eq!(rig.step(&mut channel, secs(0)), StepOutcome::Started);

        // Quiet at t=10, motion again at t=15 refreshes the window.
        rig.opener.scene.set_motion(false);
        rig.step(&mut channel, secs(5));
        assert_eq!(rig.step(&mut channel, secs(10)), StepOutcome::Holding);
        rig.opener.scene.set_motion(true);
        assert_eq!(rig.step(&mut channel, secs(15)), StepOutcome::Continued);
        rig.opener.scene.set_motion(false);
        // Last motion observed here, when the block leaves.
        assert_eq!(rig.step(&mut channel, secs(16)), StepOutcome::Continued);

        assert_eq!(rig.step(&mut channel, secs(30)), StepOutcome::Holding);
        assert_eq!(rig.step(&mut channel, secs(36)), StepOutcome::Holding);
        assert_eq!(rig.step(&mut channel, secs(37)), StepOutcome::Stopped);

        assert_eq!(rig.spawner.spawned(), 1);
        assert_eq!(rig.spawner.terminated(), 1);
        assert!(rig.session.path().is_some());
    }

    #[test]
    fn read_failures_skip_without_transition() {
        let mut rig = Rig::new(FakeSpawner::default());
        let mut channel = camera("stub://a");
        let t0 = Instant::now();

        rig.opener.scene.set_motion(true);
        rig.step(&mut channel, t0);
        rig.step(&mut channel, t0);
        assert_eq!(channel.state(), ChannelState::Recording);

        rig.opener.scene.set_failing(true);
        let late = t0 + WINDOW * 3;
        assert_eq!(rig.step(&mut channel, late), StepOutcome::Skipped);
        assert_eq!(channel.state(), ChannelState::Recording);
        assert!(channel.has_baseline());

        rig.step(&mut channel, late);
        rig.step(&mut channel, late);
        assert!(!channel.has_baseline(), "stale baseline is dropped");

        rig.opener.scene.set_failing(false);
        rig.opener.scene.set_motion(false);
        assert_eq!(rig.step(&mut channel, late), StepOutcome::Baseline);
        assert_eq!(rig.step(&mut channel, late), StepOutcome::Stopped);
    }

    #[test]
    fn failed_start_stays_idle_and_retries() {
        let mut rig = Rig::new(FakeSpawner::failing());
        let mut channel = camera("stub://a");
        let t0 = Instant::now();

        rig.opener.scene.set_motion(true);
        rig.step(&mut channel, t0);
        assert_eq!(rig.step(&mut channel, t0), StepOutcome::StartFailed);
        assert_eq!(channel.state(), ChannelState::Idle);
        assert_eq!(rig.step(&mut channel, t0), StepOutcome::StartFailed);
    }

    #[test]
    fn shutdown_stops_active_recording() {
        let mut rig = Rig::new(FakeSpawner::default());
        let mut channel = camera("stub://a");
        rig.opener.scene.set_motion(true);
        rig.step(&mut channel, Instant::now());
        rig.step(&mut channel, Instant::now());

        let report = channel.shutdown(&rig.controller);
        assert!(report.is_some());
        assert_eq!(channel.state(), ChannelState::Idle);
        assert!(channel.shutdown(&rig.controller).is_none());
        assert_eq!(rig.controller.ledger().active(), 0);
    }
}
