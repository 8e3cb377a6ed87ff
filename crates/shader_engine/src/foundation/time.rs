//! Time measurement utilities

use std::time::{Duration, Instant};

/// Measures a single blocking span, such as a fence wait
pub struct Stopwatch {
    started: Instant,
}

impl Stopwatch {
    /// Start measuring now
    pub fn start() -> Self {
        Self { started: Instant::now() }
    }

    /// Time elapsed since `start`
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Rate limiter for progress reports
///
/// The first call to [`ProgressThrottle::ready`] always succeeds; after that
/// at most one report per `interval` goes through.
pub struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    /// Create a throttle that lets one report through per `interval`
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    /// Returns true (and records the time) if a report may be emitted now
    pub fn ready(&mut self) -> bool {
        self.ready_at(Instant::now())
    }

    fn ready_at(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_first_report_passes() {
        let mut throttle = ProgressThrottle::new(Duration::from_secs(60));
        assert!(throttle.ready());
        assert!(!throttle.ready());
    }

    #[test]
    fn test_throttle_releases_after_interval() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(100));
        let t0 = Instant::now();
        assert!(throttle.ready_at(t0));
        assert!(!throttle.ready_at(t0 + Duration::from_millis(50)));
        assert!(throttle.ready_at(t0 + Duration::from_millis(100)));
    }

    #[test]
    fn test_zero_interval_never_blocks() {
        let mut throttle = ProgressThrottle::new(Duration::ZERO);
        assert!(throttle.ready());
        assert!(throttle.ready());
    }
}
