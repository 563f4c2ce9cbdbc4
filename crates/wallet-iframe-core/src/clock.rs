//! An injectable clock so retry/backoff/deadline logic is testable
//! without real timers.
//!
//! Production code stamps state with wall-clock milliseconds directly;
//! routing it through a trait lets tests advance a fake clock
//! deterministically instead of sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Monotonic milliseconds since an arbitrary epoch, plus wall-clock
/// milliseconds for request-id generation (`{wallTime}-{monotonic}`).
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
    fn wall_millis(&self) -> u64;
}

#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        // On wasm32 this resolves through `Date.now()` via the host
        // environment's time source; kept monotonic-enough for deadline
        // math rather than requiring a true monotonic clock across the
        // origin boundary.
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn wall_millis(&self) -> u64 {
        self.now_millis()
    }
}

/// A fake clock for deterministic tests.
#[derive(Clone, Default)]
pub struct FakeClock {
    millis: Arc<AtomicU64>,
}

impl FakeClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: Arc::new(AtomicU64::new(start_millis)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }

    fn wall_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Monotonically-increasing counter used alongside wall-clock time to
/// generate collision-free request ids within a single millisecond.
#[derive(Default)]
pub struct MonotonicCounter(AtomicU64);

impl MonotonicCounter {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances_deterministically() {
        let clock = FakeClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now_millis(), 1_250);
    }

    #[test]
    fn monotonic_counter_never_repeats() {
        let counter = MonotonicCounter::default();
        let a = counter.next();
        let b = counter.next();
        assert_ne!(a, b);
        assert_eq!(b, a + 1);
    }
}
