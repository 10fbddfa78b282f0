//! Monotonic time source for cooldowns and stream pacing.

use std::sync::Mutex;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// `Instant::now()`; immune to wall-clock adjustments.
#[derive(Clone, Copy, Debug, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
    step: Duration,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::with_step(Duration::ZERO)
    }

    /// Every call to `now()` advances the clock by `step` afterwards, which
    /// lets a frame loop simulate a fixed frame rate.
    pub fn with_step(step: Duration) -> Self {
        Self {
            now: Mutex::new(Instant::now()),
            step,
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let mut guard = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = *guard;
        *guard += self.step;
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_steps_per_read() {
        let clock = ManualClock::with_step(Duration::from_millis(100));
        let a = clock.now();
        let b = clock.now();
        assert_eq!(b - a, Duration::from_millis(100));
        clock.advance(Duration::from_secs(2));
        assert_eq!(clock.now() - b, Duration::from_millis(2100));
    }

    #[test]
    fn monotonic_clock_never_goes_back() {
        let clock = MonotonicClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
