//! Rate limiting for repeated failure logs.
//!
//! A camera that is down fails on every pass. The first failure of an episode is
//! logged, then at most one summary per interval, then one line on recovery.

use std::time::{Duration, Instant};

pub const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureLog {
    /// First failure after a success.
    First,
    /// Interval elapsed; `suppressed` failures were not logged since the last line.
    Summary { suppressed: u64 },
    Quiet,
}

#[derive(Clone, Debug)]
pub struct LogThrottle {
    interval: Duration,
    last_emitted: Option<Instant>,
    suppressed: u64,
    episode: u64,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emitted: None,
            suppressed: 0,
            episode: 0,
        }
    }

    pub fn on_failure(&mut self, now: Instant) -> FailureLog {
        self.episode += 1;
        match self.last_emitted {
            None => {
                self.last_emitted = Some(now);
                FailureLog::First
            }
            Some(at) if now.saturating_duration_since(at) >= self.interval => {
                let suppressed = self.suppressed;
                self.suppressed = 0;
                self.last_emitted = Some(now);
                FailureLog::Summary { suppressed }
            }
            Some(_) => {
                self.suppressed += 1;
                FailureLog::Quiet
            }
        }
    }

    /// Ends the episode. Returns how many failures it contained, if any.
    pub fn on_success(&mut self) -> Option<u64> {
        if self.episode == 0 {
            return None;
        }
        let failures = self.episode;
        self.episode = 0;
        self.suppressed = 0;
        self.last_emitted = None;
        Some(failures)
    }
}

impl Default for LogThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_INTERVAL)
    }
}
