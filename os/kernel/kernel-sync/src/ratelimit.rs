use core::sync::atomic::{AtomicU64, Ordering};

/// Event-count rate limiter for diagnostics.
///
/// The first `burst` events pass; afterwards one event out of every
/// `interval` passes. There is no clock involved, so sustained pressure
/// produces a bounded fraction of messages regardless of timing.
pub struct RateLimit {
    burst: u64,
    interval: u64,
    events: AtomicU64,
}

impl RateLimit {
    /// `interval` is clamped to at least one.
    #[must_use]
    pub const fn new(burst: u32, interval: u32) -> Self {
        let interval = if interval == 0 { 1 } else { interval };
        Self {
            burst: burst as u64,
            interval: interval as u64,
            events: AtomicU64::new(0),
        }
    }

    /// Record one event.
    ///
    /// Returns `Some(suppressed)` if the caller should emit its message, where
    /// `suppressed` is the number of events swallowed since the previous
    /// emitted one, or `None` if this event is suppressed.
    pub fn check(&self) -> Option<u64> {
        let n = self.events.fetch_add(1, Ordering::Relaxed);
        if n < self.burst {
            return Some(0);
        }
        let past = n - self.burst;
        if !past.is_multiple_of(self.interval) {
            return None;
        }
        Some(if past == 0 { 0 } else { self.interval - 1 })
    }

    /// Total number of recorded events.
    #[must_use]
    pub fn events(&self) -> u64 {
        self.events.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_then_one_in_interval() {
        let rl = RateLimit::new(2, 3);
        let verdicts: Vec<_> = (0..9).map(|_| rl.check()).collect();
        assert_eq!(
            verdicts,
            [
                Some(0),
                Some(0),
                Some(0),
                None,
                None,
                Some(2),
                None,
                None,
                Some(2)
            ]
        );
        assert_eq!(rl.events(), 9);
    }

    #[test]
    fn zero_interval_passes_everything_after_burst() {
        let rl = RateLimit::new(0, 0);
        assert!((0..5).all(|_| rl.check() == Some(0)));
    }
}
