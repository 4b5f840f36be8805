//! Time source and stop signal for the sort worker
//!
//! All poll loops go through `Clock` so tests can run against virtual time
//! (see `io::sim::SimClock`). Durations are measured from the clock's own
//! epoch, never wall time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic time source with blocking sleep
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock was created
    fn now(&self) -> Duration;

    /// Block the calling thread
    fn sleep(&self, duration: Duration);

    /// One iteration of a busy-wait (sub-millisecond pulse timing)
    fn spin(&self) {
        std::hint::spin_loop();
    }
}

/// Real clock backed by `Instant` and `std::thread::sleep`
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Process-wide stop flag, checked at every poll iteration
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_signal_shared_between_clones() {
        let stop = StopSignal::new();
        let observer = stop.clone();
        assert!(!observer.is_stopped());
        stop.stop();
        assert!(observer.is_stopped());
        // Idempotent
        stop.stop();
        assert!(observer.is_stopped());
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        clock.sleep(Duration::from_millis(1));
        assert!(clock.now() > a);
    }
}
