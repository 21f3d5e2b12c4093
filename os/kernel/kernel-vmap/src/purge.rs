//! Lazy reclamation.
//!
//! Freed ranges stay in the interval store, flagged `lazy_free`, until a
//! purge flushes stale translations for all of them with a single shootdown
//! and removes them. Purges are serialized; the shootdown runs without the
//! allocator lock held.

use crate::addresses::VirtualAddress;
use crate::allocator::{AllocState, RangeAllocator};
use crate::collab::TlbShootdown;
use crate::error::VmapError;
use crate::range::{RangeFlags, RangeHandle};
use alloc::vec::Vec;
use core::fmt;
use core::mem;
use log::{debug, trace};

/// Ranges freed but not yet purged.
#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    ranges: Vec<RangeHandle>,
    bytes: u64,
}

impl PendingQueue {
    pub(crate) const fn new() -> Self {
        Self {
            ranges: Vec::new(),
            bytes: 0,
        }
    }

    pub(crate) fn push(&mut self, handle: RangeHandle) {
        self.bytes += handle.len();
        self.ranges.push(handle);
    }

    pub(crate) fn len(&self) -> usize {
        self.ranges.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub(crate) const fn bytes(&self) -> u64 {
        self.bytes
    }

    pub(crate) fn take(&mut self) -> Vec<RangeHandle> {
        self.bytes = 0;
        mem::take(&mut self.ranges)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Periodic,
    Opportunistic,
    Eager,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Periodic => "periodic",
            Self::Opportunistic => "opportunistic",
            Self::Eager => "eager",
        })
    }
}

impl<T: TlbShootdown> RangeAllocator<T> {
    /// Release `handle` lazily.
    ///
    /// The range keeps occupying address space, invisible to
    /// [`lookup`](Self::lookup), until the next purge. Crossing the
    /// configured lazy byte limit starts a purge unless one is running.
    ///
    /// # Panics
    /// If `handle` was already freed or is a reservation.
    pub fn free(&self, handle: RangeHandle) {
        let over_limit = {
            let mut st = self.state.lock();
            self.queue_locked(&mut st, handle)
        };
        if over_limit {
            self.try_purge();
        }
    }

    /// Release `handle` and purge before returning, so the range is
    /// reusable immediately.
    ///
    /// # Panics
    /// As [`free`](Self::free).
    pub fn free_now(&self, handle: RangeHandle) {
        self.free(handle);
        self.purge();
    }

    /// Lazily release the live range starting at `start`.
    ///
    /// # Errors
    /// [`VmapError::NotFound`] if no allocated, not yet freed range starts
    /// at `start`.
    pub fn release(&self, start: VirtualAddress) -> Result<(), VmapError> {
        let over_limit = {
            let mut st = self.state.lock();
            let handle = st
                .store
                .get(start)
                .filter(|h| !h.is_pending_free() && !h.is_hole())
                .cloned()
                .ok_or(VmapError::NotFound(start))?;
            self.queue_locked(&mut st, handle)
        };
        if over_limit {
            self.try_purge();
        }
        Ok(())
    }

    /// Mark `handle` lazily freed and queue it; returns whether the pending
    /// total now exceeds the lazy limit.
    fn queue_locked(&self, st: &mut AllocState, handle: RangeHandle) -> bool {
        assert!(
            !handle.is_hole(),
            "vmap: reservation {} freed as an allocation",
            handle.range()
        );
        let before = handle.insert_flags(RangeFlags::new().with_lazy_free(true));
        assert!(
            !before.lazy_free(),
            "vmap: double free of {} (allocated at {})",
            handle.range(),
            handle.caller()
        );
        trace!("vmap: lazily freeing {}", handle.range());
        st.pending.push(handle);
        st.pending.bytes() > self.config().lazy_max_bytes
    }

    /// Purge every pending range, waiting for a purge already in progress.
    ///
    /// Returns the number of ranges removed.
    pub fn purge(&self) -> usize {
        let _serial = self.purge_lock.lock();
        self.purge_pending(Trigger::Periodic)
    }

    /// Purge unless another purge is already running; `None` in that case.
    pub fn try_purge(&self) -> Option<usize> {
        let _serial = self.purge_lock.try_lock()?;
        Some(self.purge_pending(Trigger::Opportunistic))
    }

    /// Purge on behalf of an allocation that found no space.
    pub(crate) fn purge_eager(&self) -> usize {
        let _serial = self.purge_lock.lock();
        self.purge_pending(Trigger::Eager)
    }

    fn purge_pending(&self, trigger: Trigger) -> usize {
        // Every pass counts, including those that find the queue empty.
        let batch = {
            let mut st = self.state.lock();
            st.counters.purges += 1;
            if trigger == Trigger::Eager {
                st.counters.eager_purges += 1;
            }
            st.pending.take()
        };
        let Some(span) = batch
            .iter()
            .map(RangeHandle::range)
            .reduce(|a, b| a.union(&b))
        else {
            self.reclaim_retired();
            return 0;
        };

        self.shootdown.flush_kernel_range(span);

        let (bytes, retired) = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let mut bytes = 0;
            for handle in &batch {
                if let Err(e) = st.store.remove(handle.start()) {
                    panic!("vmap: purge of {}: {e}", handle.range());
                }
                bytes += handle.len();
                if st.cache.on_remove(&handle.range()) {
                    trace!("vmap: placement cache reset by purge of {}", handle.range());
                }
            }
            st.counters.purged_ranges += batch.len() as u64;
            self.commit(st);
            (bytes, mem::take(&mut st.retired))
        };

        debug!(
            "vmap: {trigger} purge of {} ranges, {bytes:#x} bytes in {}",
            batch.len(),
            span
        );

        // Readers may still be walking a tree that contains these ranges.
        self.grace.synchronize();
        drop(retired);
        batch.len()
    }
}
