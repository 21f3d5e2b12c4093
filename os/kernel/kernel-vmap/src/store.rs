//! Ordered interval store.
//!
//! Every live [`RangeHandle`] is kept twice, always in lockstep:
//!
//! - `list`, a `BTreeMap` keyed by start address, for neighbor walks and gap
//!   searches performed under the allocator lock;
//! - `tree`, the writer's copy of the persistent lookup tree that is
//!   published to lock-free readers.

use crate::addresses::{VirtualAddress, VirtualRange, align_up};
use crate::error::{GapError, VmapError};
use crate::range::RangeHandle;
use crate::tree::{self, Link};
use alloc::collections::BTreeMap;

pub(crate) struct IntervalStore {
    list: BTreeMap<u64, RangeHandle>,
    tree: Link,
    bytes: u64,
}

impl IntervalStore {
    pub(crate) const fn new() -> Self {
        Self {
            list: BTreeMap::new(),
            tree: None,
            bytes: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.list.len()
    }

    /// Total bytes covered by live ranges.
    pub(crate) const fn bytes(&self) -> u64 {
        self.bytes
    }

    pub(crate) const fn tree(&self) -> &Link {
        &self.tree
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &RangeHandle> {
        self.list.values()
    }

    /// The range starting exactly at `start`.
    pub(crate) fn get(&self, start: VirtualAddress) -> Option<&RangeHandle> {
        self.list.get(&start.as_u64())
    }

    /// The range containing `va`.
    #[cfg(test)]
    pub(crate) fn lookup(&self, va: VirtualAddress) -> Option<&RangeHandle> {
        let (_, h) = self.list.range(..=va.as_u64()).next_back()?;
        h.range().contains(va).then_some(h)
    }

    /// Lowest range whose end lies above `addr`: the one containing `addr`,
    /// or else the first one starting after it.
    fn first_ending_after(&self, addr: u64) -> Option<&RangeHandle> {
        if let Some((_, h)) = self.list.range(..=addr).next_back()
            && h.end().as_u64() > addr
        {
            return Some(h);
        }
        self.list
            .range((core::ops::Bound::Excluded(addr), core::ops::Bound::Unbounded))
            .next()
            .map(|(_, h)| h)
    }

    /// Lowest live range overlapping `range`.
    pub(crate) fn conflict(&self, range: &VirtualRange) -> Option<&RangeHandle> {
        self.first_ending_after(range.start().as_u64())
            .filter(|h| h.start() < range.end())
    }

    /// Insert a range that overlaps nothing.
    ///
    /// # Panics
    /// If `handle` overlaps a live range; callers establish disjointness with
    /// a gap search under the same lock.
    pub(crate) fn insert(&mut self, handle: RangeHandle) {
        if let Some(other) = self.conflict(&handle.range()) {
            panic!(
                "interval store: {:?} overlaps live range {:?}",
                handle.range(),
                other.range()
            );
        }
        self.bytes += handle.len();
        self.tree = Some(tree::insert(&self.tree, handle.clone()));
        self.list.insert(handle.start().as_u64(), handle);
    }

    /// Remove the range starting at `start`.
    ///
    /// # Errors
    /// [`VmapError::NotFound`] if no live range starts there.
    pub(crate) fn remove(&mut self, start: VirtualAddress) -> Result<RangeHandle, VmapError> {
        let handle = self
            .list
            .remove(&start.as_u64())
            .ok_or(VmapError::NotFound(start))?;
        let Some(tree) = tree::remove(&self.tree, start.as_u64()) else {
            panic!("interval store: lookup tree lost range {:?}", handle.range());
        };
        self.tree = tree;
        self.bytes -= handle.len();
        Ok(handle)
    }

    /// Lowest `a >= from`, `a` a multiple of `align`, such that
    /// `[a, a + size)` overlaps no live range and ends at or below `limit`.
    ///
    /// Every gap that is walked past because the request does not fit is
    /// folded into `hole`, which ends up as the largest aligned hole below
    /// the returned address.
    pub(crate) fn find_gap(
        &self,
        from: u64,
        size: u64,
        align: u64,
        limit: u64,
        hole: &mut u64,
    ) -> Result<u64, GapError> {
        let mut addr = align_up(from, align).ok_or(GapError::Overflow)?;
        if let Some(first) = self.first_ending_after(addr) {
            for h in self.list.range(first.start().as_u64()..).map(|(_, h)| h) {
                let (start, end) = (h.start().as_u64(), h.end().as_u64());
                if end <= addr {
                    continue;
                }
                let tail = addr.checked_add(size).ok_or(GapError::Overflow)?;
                if tail > limit {
                    return Err(GapError::Exhausted);
                }
                if tail <= start {
                    return Ok(addr);
                }
                if start > addr {
                    *hole = (*hole).max(start - addr);
                }
                addr = align_up(end, align).ok_or(GapError::Overflow)?;
            }
        }
        let tail = addr.checked_add(size).ok_or(GapError::Overflow)?;
        if tail > limit {
            return Err(GapError::Exhausted);
        }
        Ok(addr)
    }

    /// Lowest `base >= window.start`, aligned to `align`, such that every
    /// `(offset, size)` in `plan` shifted by `base` is free and inside
    /// `window`. `plan` must be sorted by offset and free of self-overlap.
    pub(crate) fn place_batch(
        &self,
        plan: &[(u64, u64)],
        align: u64,
        window: &VirtualRange,
    ) -> Result<u64, GapError> {
        let mut base = align_up(window.start().as_u64(), align).ok_or(GapError::Overflow)?;
        'search: loop {
            for &(offset, size) in plan {
                let start = base.checked_add(offset).ok_or(GapError::Overflow)?;
                let end = start.checked_add(size).ok_or(GapError::Overflow)?;
                if end > window.end().as_u64() {
                    return Err(GapError::Exhausted);
                }
                if let Some(h) = self.first_ending_after(start)
                    && h.start().as_u64() < end
                {
                    // Slide so this member starts right after the conflict;
                    // `h.end() > start` keeps the base strictly increasing.
                    base = align_up(h.end().as_u64() - offset, align).ok_or(GapError::Overflow)?;
                    continue 'search;
                }
            }
            return Ok(base);
        }
    }
}
