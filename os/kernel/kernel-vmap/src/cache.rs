//! Placement cache.
//!
//! Remembers the most recently placed range together with the largest hole
//! the searches that led to it walked past. A later request with the same
//! start bound and alignment that is larger than that hole cannot fit
//! anywhere below the remembered range, so the search may start at its end.
//!
//! The cache is advisory: any doubt resets it, and a reset only costs a
//! longer walk.

use crate::addresses::VirtualRange;
use crate::range::{RangeDescriptor, RangeHandle};
use alloc::sync::Weak;

pub(crate) struct PlacementCache {
    node: Option<Weak<RangeDescriptor>>,
    /// Start address of `node`, kept so removals can be compared without
    /// upgrading the weak reference.
    node_start: u64,
    /// Largest aligned hole known below `node`.
    hole: u64,
    /// Constraints under which `hole` was measured.
    bound: u64,
    align: u64,
}

impl PlacementCache {
    pub(crate) const fn new() -> Self {
        Self {
            node: None,
            node_start: 0,
            hole: 0,
            bound: 0,
            align: 0,
        }
    }

    #[cfg(test)]
    pub(crate) const fn is_valid(&self) -> bool {
        self.node.is_some()
    }

    /// Where a search for `(size, bound, align)` may begin, or `None` if the
    /// cached hint does not apply. In the latter case the cache is reset and
    /// re-armed for the new constraints.
    pub(crate) fn scan_start(&mut self, size: u64, bound: u64, align: u64) -> Option<u64> {
        if self.bound == bound
            && self.align == align
            && size > self.hole
            && let Some(end) = self
                .node
                .as_ref()
                .and_then(Weak::upgrade)
                .map(|d| d.range().end().as_u64())
            && end >= bound
        {
            return Some(end);
        }
        self.reset(bound, align);
        None
    }

    /// Accumulated hole size to seed the next search with.
    pub(crate) const fn hole(&self) -> u64 {
        self.hole
    }

    /// Point the cache at a freshly placed range.
    pub(crate) fn remember(&mut self, handle: &RangeHandle, hole: u64) {
        self.node = Some(handle.downgrade());
        self.node_start = handle.start().as_u64();
        self.hole = hole;
    }

    pub(crate) fn invalidate(&mut self) {
        self.node = None;
        self.hole = 0;
    }

    /// React to `removed` leaving the store. Returns whether the cache was
    /// dropped.
    ///
    /// Removing anything at or below the cached range may open a hole the
    /// hint does not know about.
    pub(crate) fn on_remove(&mut self, removed: &VirtualRange) -> bool {
        if self.node.is_some() && removed.start().as_u64() <= self.node_start {
            self.invalidate();
            return true;
        }
        false
    }

    fn reset(&mut self, bound: u64, align: u64) {
        self.invalidate();
        self.bound = bound;
        self.align = align;
    }
}
