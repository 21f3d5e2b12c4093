//! Allocator core: request validation, placement, lookups and bookkeeping.

use crate::addresses::{VirtualAddress, VirtualRange};
use crate::batch::{BatchAllocation, BatchPlan, BatchRequest};
use crate::cache::PlacementCache;
use crate::collab::TlbShootdown;
use crate::config::VmapConfig;
use crate::error::{GapError, VmapError};
use crate::purge::PendingQueue;
use crate::range::{RangeDescriptor, RangeFlags, RangeHandle, RangeInfo};
use crate::store::IntervalStore;
use crate::tree::{self, Node, PublishedTree};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::mem;
use core::panic::Location;
use kernel_sync::{GracePeriod, RateLimit, SpinLock};
use log::{debug, info, trace, warn};

/// Everything guarded by the allocator lock.
pub(crate) struct AllocState {
    pub(crate) store: IntervalStore,
    pub(crate) cache: PlacementCache,
    pub(crate) pending: PendingQueue,
    /// Lookup-tree versions replaced since the last grace period.
    pub(crate) retired: Vec<Arc<Node>>,
    pub(crate) counters: Counters,
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Counters {
    pub(crate) allocations: u64,
    pub(crate) failures: u64,
    pub(crate) cache_hits: u64,
    pub(crate) cache_misses: u64,
    pub(crate) purges: u64,
    pub(crate) eager_purges: u64,
    pub(crate) purged_ranges: u64,
}

/// Snapshot of allocator statistics.
///
/// Lazily freed ranges still occupy address space until purged, so they are
/// included in `live_*` as well as in `pending_*`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VmapStats {
    pub live_ranges: usize,
    pub live_bytes: u64,
    pub pending_ranges: usize,
    pub pending_bytes: u64,
    pub allocations: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub purges: u64,
    pub eager_purges: u64,
    pub purged_ranges: u64,
}

/// Concurrent allocator of non-overlapping virtual address ranges.
///
/// All mutation happens under one spin lock. [`lookup`](Self::lookup) takes
/// no lock; it walks a published snapshot of the interval tree inside a
/// grace-period read section.
pub struct RangeAllocator<T> {
    config: VmapConfig,
    pub(crate) state: SpinLock<AllocState>,
    published: PublishedTree,
    pub(crate) grace: GracePeriod,
    pub(crate) purge_lock: SpinLock<()>,
    pub(crate) shootdown: T,
    exhaustion: RateLimit,
}

impl<T: TlbShootdown> RangeAllocator<T> {
    /// Create an allocator managing `config.space`.
    ///
    /// `shootdown` is invoked by every purge before lazily freed ranges
    /// become reusable.
    ///
    /// # Errors
    /// [`VmapError::InvalidArgument`] if the configuration is inconsistent.
    pub fn new(config: VmapConfig, shootdown: T) -> Result<Self, VmapError> {
        config.validate()?;
        info!(
            "vmap: managing {} (vmalloc {}, modules {}), page size {:#x}, lazy limit {:#x}",
            config.space, config.vmalloc, config.modules, config.page_size, config.lazy_max_bytes
        );
        Ok(Self {
            config,
            state: SpinLock::new(AllocState {
                store: IntervalStore::new(),
                cache: PlacementCache::new(),
                pending: PendingQueue::new(),
                retired: Vec::new(),
                counters: Counters::default(),
            }),
            published: PublishedTree::new(),
            grace: GracePeriod::new(),
            purge_lock: SpinLock::new(()),
            shootdown,
            exhaustion: RateLimit::new(config.ratelimit_burst, config.ratelimit_interval),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &VmapConfig {
        &self.config
    }

    #[must_use]
    pub const fn shootdown(&self) -> &T {
        &self.shootdown
    }

    /// Allocate `size` bytes aligned to `align` inside `bounds`.
    ///
    /// Placement is first fit from the low end of `bounds`. If nothing fits,
    /// lazily freed ranges are purged once and the search is repeated.
    ///
    /// # Errors
    /// - [`VmapError::InvalidArgument`] if `size` is zero or not a page
    ///   multiple, `align` is not a power of two, or `bounds` is empty,
    ///   unaligned or outside the managed space.
    /// - [`VmapError::ExhaustedRange`] if no gap fits, even after a purge.
    /// - [`VmapError::Overflow`] if the search ran off the top of the
    ///   address space.
    #[track_caller]
    pub fn allocate(
        &self,
        size: u64,
        align: u64,
        bounds: VirtualRange,
    ) -> Result<RangeHandle, VmapError> {
        self.allocate_with(size, size, align, bounds, Location::caller())
    }

    pub(crate) fn allocate_with(
        &self,
        size: u64,
        requested: u64,
        align: u64,
        bounds: VirtualRange,
        caller: &'static Location<'static>,
    ) -> Result<RangeHandle, VmapError> {
        let align = self.check_request(size, align, &bounds)?;

        let mut last = GapError::Exhausted;
        for attempt in 0..2 {
            match self.try_place(size, requested, align, &bounds, caller) {
                Ok(handle) => return Ok(handle),
                Err(e) => last = e,
            }
            if attempt == 0 {
                self.purge_eager();
            }
        }

        let err = last.into_vmap(size, align);
        self.report_failure(&err);
        Err(err)
    }

    /// Validate a request; returns the effective alignment.
    fn check_request(&self, size: u64, align: u64, bounds: &VirtualRange) -> Result<u64, VmapError> {
        let page = self.config.page_size;
        if size == 0 {
            return Err(VmapError::InvalidArgument("zero-sized allocation"));
        }
        if size % page != 0 {
            return Err(VmapError::InvalidArgument("size is not a page multiple"));
        }
        if !align.is_power_of_two() {
            return Err(VmapError::InvalidArgument("alignment is not a power of two"));
        }
        self.check_window(bounds)?;
        Ok(align.max(page))
    }

    fn check_window(&self, window: &VirtualRange) -> Result<(), VmapError> {
        let page = self.config.page_size;
        if window.is_empty() {
            return Err(VmapError::InvalidArgument("empty bounds"));
        }
        if !window.start().is_aligned(page) || !window.end().is_aligned(page) {
            return Err(VmapError::InvalidArgument("bounds are not page aligned"));
        }
        if !self.config.space.contains_range(window) {
            return Err(VmapError::InvalidArgument(
                "bounds lie outside the managed space",
            ));
        }
        Ok(())
    }

    /// One locked search-and-insert pass.
    fn try_place(
        &self,
        size: u64,
        requested: u64,
        align: u64,
        bounds: &VirtualRange,
        caller: &'static Location<'static>,
    ) -> Result<RangeHandle, GapError> {
        let lower = bounds.start().as_u64();
        let (result, reclaim) = {
            let mut guard = self.state.lock();
            let st = &mut *guard;

            let from = if let Some(from) = st.cache.scan_start(size, lower, align) {
                st.counters.cache_hits += 1;
                from
            } else {
                st.counters.cache_misses += 1;
                lower
            };

            let mut hole = st.cache.hole();
            match st
                .store
                .find_gap(from, size, align, bounds.end().as_u64(), &mut hole)
            {
                Ok(addr) => {
                    let start = VirtualAddress::new(addr);
                    let range = VirtualRange::new(start, VirtualAddress::new(addr + size));
                    let handle = RangeHandle::new(RangeDescriptor::new(
                        range,
                        requested,
                        RangeFlags::new(),
                        caller,
                    ));
                    st.store.insert(handle.clone());
                    st.cache.remember(&handle, hole);
                    st.counters.allocations += 1;
                    self.commit(st);
                    (Ok(handle), self.should_reclaim(st))
                }
                Err(e) => {
                    st.cache.invalidate();
                    (Err(e), false)
                }
            }
        };

        if reclaim {
            self.reclaim_retired();
        }
        if let Ok(h) = &result {
            trace!("vmap: placed {} for {}", h.range(), h.caller());
        }
        result
    }

    /// Place several ranges at fixed offsets from one common base.
    ///
    /// The base is the lowest address in the vmalloc window, aligned to
    /// `align`, at which every member fits. All members become visible to
    /// [`lookup`](Self::lookup) at once. Ranges are returned in request
    /// order.
    ///
    /// # Errors
    /// - [`VmapError::InvalidArgument`] for an empty batch, a non
    ///   page-aligned or non power-of-two `align`, empty or unaligned
    ///   members, or members that overlap each other.
    /// - [`VmapError::ExhaustedRange`] if no base works, even after a purge.
    /// - [`VmapError::Overflow`] on address arithmetic overflow.
    #[track_caller]
    pub fn allocate_batch(
        &self,
        requests: &[BatchRequest],
        align: u64,
    ) -> Result<BatchAllocation, VmapError> {
        let caller = Location::caller();
        let plan = BatchPlan::new(requests, align, self.config.page_size)?;
        let window = self.config.vmalloc;

        let mut last = GapError::Exhausted;
        if plan.span <= window.len() {
            for attempt in 0..2 {
                match self.try_place_batch(&plan, align, &window, caller) {
                    Ok(batch) => return Ok(batch),
                    Err(e) => last = e,
                }
                if attempt == 0 {
                    self.purge_eager();
                }
            }
        }

        let err = last.into_vmap(plan.span, align);
        self.report_failure(&err);
        Err(err)
    }

    fn try_place_batch(
        &self,
        plan: &BatchPlan,
        align: u64,
        window: &VirtualRange,
        caller: &'static Location<'static>,
    ) -> Result<BatchAllocation, GapError> {
        let (batch, reclaim) = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let base = st.store.place_batch(&plan.members, align, window)?;

            let mut slots: Vec<Option<RangeHandle>> = vec![None; plan.members.len()];
            for (&(offset, size), &index) in plan.members.iter().zip(&plan.order) {
                let start = VirtualAddress::new(base + offset);
                let range = VirtualRange::new(start, VirtualAddress::new(base + offset + size));
                let handle = RangeHandle::new(RangeDescriptor::new(
                    range,
                    size,
                    RangeFlags::new().with_batch(true),
                    caller,
                ));
                st.store.insert(handle.clone());
                slots[index] = Some(handle);
            }
            st.cache.invalidate();
            st.counters.allocations += plan.members.len() as u64;
            self.commit(st);

            let ranges = slots.into_iter().flatten().collect();
            (
                BatchAllocation::new(VirtualAddress::new(base), ranges),
                self.should_reclaim(st),
            )
        };

        if reclaim {
            self.reclaim_retired();
        }
        debug!(
            "vmap: batch of {} placed at base {} for {}",
            batch.ranges().len(),
            batch.base(),
            caller
        );
        Ok(batch)
    }

    /// Release every range of a batch.
    pub fn free_batch(&self, ranges: impl IntoIterator<Item = RangeHandle>) {
        for handle in ranges {
            self.free(handle);
        }
    }

    /// Reserve `range` as a hole: it occupies address space but is never
    /// handed out. Used for fixed early mappings.
    ///
    /// # Errors
    /// [`VmapError::InvalidArgument`] if `range` is empty, unaligned, outside
    /// the managed space or overlaps a live range.
    #[track_caller]
    pub fn reserve(&self, range: VirtualRange) -> Result<RangeHandle, VmapError> {
        let caller = Location::caller();
        self.check_window(&range)?;
        let handle = RangeHandle::new(RangeDescriptor::new(
            range,
            range.len(),
            RangeFlags::new().with_hole(true),
            caller,
        ));

        let reclaim = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            if st.store.conflict(&range).is_some() {
                return Err(VmapError::InvalidArgument(
                    "reservation overlaps a live range",
                ));
            }
            st.store.insert(handle.clone());
            self.commit(st);
            self.should_reclaim(st)
        };

        if reclaim {
            self.reclaim_retired();
        }
        Ok(handle)
    }

    /// Remove a reservation made by [`reserve`](Self::reserve).
    ///
    /// Holes are never mapped, so no translation flush is needed and the
    /// removal is immediate.
    ///
    /// # Errors
    /// - [`VmapError::InvalidArgument`] if `handle` is not a reservation.
    /// - [`VmapError::NotFound`] if it is no longer in the store.
    pub fn unreserve(&self, handle: &RangeHandle) -> Result<(), VmapError> {
        if !handle.is_hole() {
            return Err(VmapError::InvalidArgument("range is not a reservation"));
        }
        let reclaim = {
            let mut guard = self.state.lock();
            let st = &mut *guard;
            let live = st
                .store
                .get(handle.start())
                .is_some_and(|h| h.ptr_eq(handle));
            if !live {
                return Err(VmapError::NotFound(handle.start()));
            }
            st.store.remove(handle.start())?;
            st.cache.on_remove(&handle.range());
            self.commit(st);
            self.should_reclaim(st)
        };

        if reclaim {
            self.reclaim_retired();
        }
        Ok(())
    }

    /// The live range containing `va`.
    ///
    /// Takes no lock. Ranges that have been freed but not yet purged are not
    /// reported; reservations are, with [`RangeFlags::hole`] set.
    #[must_use]
    pub fn lookup(&self, va: VirtualAddress) -> Option<RangeHandle> {
        let guard = self.grace.read();
        let root = self.published.load(&guard)?;
        tree::find(root, va)
            .filter(|h| !h.is_pending_free())
            .cloned()
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> VmapStats {
        let st = self.state.lock();
        VmapStats {
            live_ranges: st.store.len(),
            live_bytes: st.store.bytes(),
            pending_ranges: st.pending.len(),
            pending_bytes: st.pending.bytes(),
            allocations: st.counters.allocations,
            failures: st.counters.failures,
            cache_hits: st.counters.cache_hits,
            cache_misses: st.counters.cache_misses,
            purges: st.counters.purges,
            eager_purges: st.counters.eager_purges,
            purged_ranges: st.counters.purged_ranges,
        }
    }

    /// Every range in the store, in address order.
    #[must_use]
    pub fn ranges(&self) -> Vec<RangeInfo> {
        self.state.lock().store.iter().map(RangeInfo::from).collect()
    }

    /// Publish the store's current tree and retire the previous version.
    pub(crate) fn commit(&self, st: &mut AllocState) {
        if let Some(old) = self.published.publish(st.store.tree()) {
            st.retired.push(old);
        }
    }

    pub(crate) fn should_reclaim(&self, st: &AllocState) -> bool {
        st.retired.len() >= self.config.retire_batch
    }

    /// Drop retired tree versions once no reader can still be walking them.
    pub(crate) fn reclaim_retired(&self) {
        let retired = mem::take(&mut self.state.lock().retired);
        if retired.is_empty() {
            return;
        }
        self.grace.synchronize();
        drop(retired);
    }

    fn report_failure(&self, err: &VmapError) {
        self.state.lock().counters.failures += 1;
        match self.exhaustion.check() {
            Some(0) => warn!("vmap: allocation failed: {err}"),
            Some(suppressed) => warn!(
                "vmap: allocation failed: {err} ({suppressed} similar failures suppressed)"
            ),
            None => {}
        }
    }
}

impl<T> Drop for RangeAllocator<T> {
    fn drop(&mut self) {
        let st = self.state.get_mut();
        if !st.pending.is_empty() {
            debug!(
                "vmap: dropping allocator with {} unpurged ranges",
                st.pending.len()
            );
        }
    }
}
