//! Monotonic millisecond time and non-blocking periodic checks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Device-local monotonic clock in milliseconds since boot
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Clock backed by `Instant`, starting at zero when created
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    boot: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock {
            boot: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.boot.elapsed().as_millis() as u64
    }
}

/// Hand-driven clock for tests and replays. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        ManualClock {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

/// Fires when at least `interval_ms` has passed since it last fired.
///
/// The first firing is measured from boot (time zero) unless created with
/// [`PeriodicTimer::immediate`].
#[derive(Debug, Clone)]
pub struct PeriodicTimer {
    interval_ms: u64,
    last_ms: Option<u64>,
}

impl PeriodicTimer {
    pub fn new(interval_ms: u64) -> Self {
        PeriodicTimer {
            interval_ms,
            last_ms: Some(0),
        }
    }

    /// Timer whose first check is due right away
    pub fn immediate(interval_ms: u64) -> Self {
        PeriodicTimer {
            interval_ms,
            last_ms: None,
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        match self.last_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.interval_ms,
        }
    }

    pub fn mark(&mut self, now_ms: u64) {
        self.last_ms = Some(now_ms);
    }

    /// Check and re-arm in one step
    pub fn fire(&mut self, now_ms: u64) -> bool {
        if self.is_due(now_ms) {
            self.mark(now_ms);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared() {
        let clock = ManualClock::new(100);
        let other = clock.clone();
        clock.advance(50);
        assert_eq!(other.now_ms(), 150);
        other.set(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[test]
    fn test_timer_from_boot() {
        let mut timer = PeriodicTimer::new(5_000);
        assert!(!timer.fire(4_999));
        assert!(timer.fire(5_000));
        assert!(!timer.fire(9_999));
        assert!(timer.fire(10_000));
    }

    #[test]
    fn test_immediate_timer() {
        let mut timer = PeriodicTimer::immediate(5_000);
        assert!(timer.fire(0));
        assert!(!timer.fire(1_000));
        assert!(timer.fire(5_000));
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let a = clock.now_ms();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(clock.now_ms() >= a + 5);
    }
}
