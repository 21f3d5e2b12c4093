//! Grace periods for lock-free readers.
//!
//! A [`GracePeriod`] lets readers traverse shared data without taking a lock
//! while writers defer releasing memory until every reader that could still
//! see it has finished. Readers enter a read-side section with
//! [`GracePeriod::read`]; a writer that has unpublished some data calls
//! [`GracePeriod::synchronize`] and may free the data once it returns.
//!
//! The implementation keeps two reader counters selected by the parity of a
//! global epoch. A reader registers in the counter of the epoch it observed
//! and re-checks the epoch afterwards; `synchronize` advances the epoch and
//! waits for the previous counter to drain. Readers that started after the
//! advance land in the other counter and are never waited for, so a steady
//! stream of new readers cannot starve the writer.

use crate::SpinLock;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicUsize, Ordering};

pub struct GracePeriod {
    epoch: AtomicUsize,
    readers: [AtomicUsize; 2],
    /// Serializes writers so each waits on exactly one counter.
    writer: SpinLock<()>,
}

impl Default for GracePeriod {
    fn default() -> Self {
        Self::new()
    }
}

impl GracePeriod {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            epoch: AtomicUsize::new(0),
            readers: [AtomicUsize::new(0), AtomicUsize::new(0)],
            writer: SpinLock::new(()),
        }
    }

    /// Enter a read-side section.
    ///
    /// Data unpublished before a later [`synchronize`](Self::synchronize)
    /// returns stays valid for as long as the guard lives. Sections may nest.
    #[inline]
    pub fn read(&self) -> ReadGuard<'_> {
        loop {
            let epoch = self.epoch.load(Ordering::SeqCst);
            let slot = epoch & 1;
            self.readers[slot].fetch_add(1, Ordering::SeqCst);
            if self.epoch.load(Ordering::SeqCst) == epoch {
                return ReadGuard { domain: self, slot };
            }
            // A writer advanced the epoch in between; it may already have
            // sampled our counter, so register again under the new epoch.
            self.readers[slot].fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Wait until every read-side section that was active when this call
    /// started has ended.
    pub fn synchronize(&self) {
        let _writer = self.writer.lock();
        let previous = self.epoch.fetch_add(1, Ordering::SeqCst) & 1;
        while self.readers[previous].load(Ordering::SeqCst) != 0 {
            spin_loop();
        }
    }

    /// Number of read-side sections currently registered.
    #[must_use]
    pub fn active_readers(&self) -> usize {
        self.readers[0].load(Ordering::Relaxed) + self.readers[1].load(Ordering::Relaxed)
    }
}

/// Proof of an active read-side section.
#[must_use = "dropping the guard ends the read-side section"]
pub struct ReadGuard<'a> {
    domain: &'a GracePeriod,
    slot: usize,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.domain.readers[self.slot].fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synchronize_without_readers_returns() {
        let gp = GracePeriod::new();
        gp.synchronize();
        gp.synchronize();
        assert_eq!(gp.active_readers(), 0);
    }

    #[test]
    fn guards_are_counted_and_released() {
        let gp = GracePeriod::new();
        let a = gp.read();
        let b = gp.read();
        assert_eq!(gp.active_readers(), 2);
        drop(a);
        assert_eq!(gp.active_readers(), 1);
        drop(b);
        assert_eq!(gp.active_readers(), 0);
    }

    #[test]
    fn readers_after_synchronize_use_the_other_slot() {
        let gp = GracePeriod::new();
        let before = gp.read();
        assert_eq!(before.slot, 0);
        drop(before);
        gp.synchronize();
        let after = gp.read();
        assert_eq!(after.slot, 1);
    }
}
