use kernel_vmap::{
    BatchRequest, RangeAllocator, TlbShootdown, VirtualAddress, VirtualRange, VmapConfig,
    VmapError,
};
use std::sync::Mutex;

const PAGE: u64 = 0x1000;

#[derive(Default)]
struct Flushes(Mutex<Vec<VirtualRange>>);

impl Flushes {
    fn taken(&self) -> Vec<VirtualRange> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

impl TlbShootdown for Flushes {
    fn flush_kernel_range(&self, range: VirtualRange) {
        self.0.lock().unwrap().push(range);
    }
}

fn r(start: u64, end: u64) -> VirtualRange {
    VirtualRange::from(start..end)
}

fn va(v: u64) -> VirtualAddress {
    VirtualAddress::new(v)
}

fn space() -> VirtualRange {
    r(0, 0x10000)
}

fn allocator_with(config: VmapConfig) -> RangeAllocator<Flushes> {
    RangeAllocator::new(config, Flushes::default()).unwrap()
}

fn allocator() -> RangeAllocator<Flushes> {
    allocator_with(VmapConfig::new(space()).with_lazy_max_bytes(u64::MAX))
}

#[test]
fn first_fit_free_purge_and_batch_sequence() {
    let vmap = allocator();

    let a = vmap.allocate(0x2000, PAGE, space()).unwrap();
    assert_eq!(a.range(), r(0, 0x2000));

    let b = vmap.allocate(0x1000, PAGE, space()).unwrap();
    assert_eq!(b.range(), r(0x2000, 0x3000));

    vmap.free(a);
    assert_eq!(vmap.purge(), 1);
    let a = vmap.allocate(0x2000, PAGE, space()).unwrap();
    assert_eq!(a.range(), r(0, 0x2000));

    let batch = vmap
        .allocate_batch(
            &[BatchRequest::new(0, 0x1000), BatchRequest::new(0x3000, 0x1000)],
            PAGE,
        )
        .unwrap();
    assert_eq!(batch.base(), va(0x3000));
    for h in batch.ranges() {
        assert!(!h.range().overlaps(&b.range()));
        assert!(!h.range().overlaps(&a.range()));
        assert!(h.flags().batch());
    }
    assert_eq!(batch.ranges()[1].range(), r(0x6000, 0x7000));
}

#[test]
fn batch_on_otherwise_empty_store_uses_the_low_end() {
    let vmap = allocator();
    let hole = vmap.reserve(r(0x2000, 0x3000)).unwrap();

    let batch = vmap
        .allocate_batch(&[(0, 0x1000).into(), (0x3000, 0x1000).into()], PAGE)
        .unwrap();
    assert_eq!(batch.base(), va(0));
    let ranges: Vec<_> = batch.ranges().iter().map(|h| h.range()).collect();
    assert_eq!(ranges, [r(0, 0x1000), r(0x3000, 0x4000)]);
    assert!(ranges.iter().all(|x| !x.overlaps(&hole.range())));
}

#[test]
fn request_larger_than_the_window_is_exhausted() {
    let vmap = allocator();
    assert_eq!(
        vmap.allocate(0x20000, PAGE, space()).unwrap_err(),
        VmapError::ExhaustedRange {
            size: 0x20000,
            align: PAGE
        }
    );
    let stats = vmap.stats();
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.eager_purges, 1);
    assert_eq!(stats.live_ranges, 0);
}

#[test]
fn empty_purges_are_counted() {
    let vmap = allocator();
    assert_eq!(vmap.purge(), 0);
    assert_eq!(vmap.try_purge(), Some(0));

    let _ = vmap.allocate(0x20000, PAGE, space());
    let stats = vmap.stats();
    assert_eq!(stats.purges, 3);
    assert_eq!(stats.eager_purges, 1);
    assert_eq!(stats.purged_ranges, 0);
    assert!(vmap.shootdown().taken().is_empty());
}

#[test]
fn malformed_requests_are_invalid() {
    let vmap = allocator();
    let invalid = |res: Result<_, VmapError>| matches!(res, Err(VmapError::InvalidArgument(_)));

    assert!(invalid(vmap.allocate(0x1000, 0x3, space())));
    assert!(invalid(vmap.allocate(0, PAGE, space())));
    assert!(invalid(vmap.allocate(0x1800, PAGE, space())));
    assert!(invalid(vmap.allocate(0x1000, PAGE, r(0x1000, 0x1000))));
    assert!(invalid(vmap.allocate(0x1000, PAGE, r(0x800, 0x2000))));
    assert!(invalid(vmap.allocate(0x1000, PAGE, r(0x8000, 0x20000))));

    // Never retried through a purge.
    assert_eq!(vmap.stats().eager_purges, 0);
}

#[test]
fn small_alignments_are_raised_to_the_page_size() {
    let vmap = allocator();
    let a = vmap.allocate(PAGE, 1, space()).unwrap();
    let b = vmap.allocate(PAGE, 8, space()).unwrap();
    assert_eq!(a.start(), va(0));
    assert_eq!(b.start(), va(PAGE));
}

#[test]
fn alignment_and_bounds_are_honored() {
    let vmap = allocator();
    let _low = vmap.allocate(PAGE, PAGE, space()).unwrap();

    let aligned = vmap.allocate(PAGE, 0x4000, space()).unwrap();
    assert_eq!(aligned.start(), va(0x4000));

    let bounded = vmap.allocate(0x2000, PAGE, r(0x8000, 0xa000)).unwrap();
    assert_eq!(bounded.range(), r(0x8000, 0xa000));
    assert!(matches!(
        vmap.allocate(PAGE, PAGE, r(0x8000, 0xa000)),
        Err(VmapError::ExhaustedRange { .. })
    ));
}

#[test]
fn wrapping_search_reports_overflow() {
    let top = r(0xFFFF_FFFF_FFFF_0000, 0xFFFF_FFFF_FFFF_F000);
    let vmap = allocator_with(VmapConfig::new(top));
    assert_eq!(
        vmap.allocate(PAGE, 1 << 63, top).unwrap_err(),
        VmapError::Overflow
    );
    assert_eq!(vmap.stats().eager_purges, 1);
}

#[test]
fn exhaustion_purges_lazily_freed_ranges_once() {
    let vmap = allocator();
    let mut pages: Vec<_> = (0..16)
        .map(|_| vmap.allocate(PAGE, PAGE, space()).unwrap())
        .collect();
    let victim = pages.remove(5);
    let victim_range = victim.range();
    vmap.free(victim);
    assert!(vmap.shootdown().taken().is_empty());

    let again = vmap.allocate(PAGE, PAGE, space()).unwrap();
    assert_eq!(again.range(), victim_range);
    assert_eq!(vmap.shootdown().taken(), [victim_range]);

    let stats = vmap.stats();
    assert_eq!(stats.eager_purges, 1);
    assert_eq!(stats.purged_ranges, 1);
    assert_eq!(stats.failures, 0);
}

#[test]
fn purge_flushes_the_union_once() {
    let vmap = allocator();
    let a = vmap.allocate(PAGE, PAGE, space()).unwrap();
    let _b = vmap.allocate(0x4000, PAGE, space()).unwrap();
    let c = vmap.allocate(PAGE, PAGE, space()).unwrap();
    assert_eq!(c.range(), r(0x5000, 0x6000));

    vmap.free(a);
    vmap.free(c);
    let stats = vmap.stats();
    assert_eq!((stats.pending_ranges, stats.pending_bytes), (2, 0x2000));
    assert_eq!(stats.live_ranges, 3);

    assert_eq!(vmap.purge(), 2);
    assert_eq!(vmap.shootdown().taken(), [r(0, 0x6000)]);
    assert_eq!(vmap.stats().live_ranges, 1);

    assert_eq!(vmap.purge(), 0);
    assert!(vmap.shootdown().taken().is_empty());
}

#[test]
fn lookup_hides_freed_ranges_and_flags_holes() {
    let vmap = allocator();
    let hole = vmap.reserve(r(0x8000, 0xa000)).unwrap();
    let a = vmap.allocate(0x2000, PAGE, space()).unwrap();

    assert!(vmap.lookup(va(0x1fff)).is_some_and(|h| h.ptr_eq(&a)));
    assert!(vmap.lookup(va(0x2000)).is_none());
    assert!(vmap.lookup(va(0x9000)).is_some_and(|h| h.is_hole() && h.ptr_eq(&hole)));

    let start = a.start();
    vmap.free(a);
    assert!(vmap.lookup(start).is_none());
    vmap.purge();
    assert!(vmap.lookup(start).is_none());
}

#[test]
fn release_by_address() {
    let vmap = allocator();
    let a = vmap.allocate(0x2000, PAGE, space()).unwrap();
    let hole = vmap.reserve(r(0x4000, 0x5000)).unwrap();

    assert_eq!(vmap.release(va(0x1000)), Err(VmapError::NotFound(va(0x1000))));
    assert_eq!(vmap.release(hole.start()), Err(VmapError::NotFound(va(0x4000))));

    assert_eq!(vmap.release(a.start()), Ok(()));
    assert!(a.is_pending_free());
    assert_eq!(vmap.release(a.start()), Err(VmapError::NotFound(va(0))));

    assert_eq!(vmap.purge(), 1);
    assert_eq!(vmap.release(va(0)), Err(VmapError::NotFound(va(0))));
}

#[test]
fn reservations_block_placement_until_removed() {
    let vmap = allocator();
    let hole = vmap.reserve(r(0, 0x4000)).unwrap();
    assert!(hole.is_hole());

    let a = vmap.allocate(PAGE, PAGE, space()).unwrap();
    assert_eq!(a.start(), va(0x4000));

    assert!(matches!(
        vmap.reserve(r(0x3000, 0x5000)),
        Err(VmapError::InvalidArgument(_))
    ));
    assert!(matches!(vmap.unreserve(&a), Err(VmapError::InvalidArgument(_))));

    vmap.unreserve(&hole).unwrap();
    assert_eq!(vmap.unreserve(&hole), Err(VmapError::NotFound(va(0))));

    let b = vmap.allocate(0x4000, PAGE, space()).unwrap();
    assert_eq!(b.range(), r(0, 0x4000));
}

#[test]
fn crossing_the_lazy_limit_purges() {
    let vmap = allocator_with(VmapConfig::new(space()).with_lazy_max_bytes(0x2000));
    let ranges: Vec<_> = (0..3)
        .map(|_| vmap.allocate(PAGE, PAGE, space()).unwrap())
        .collect();
    let mut ranges = ranges.into_iter();

    vmap.free(ranges.next().unwrap());
    vmap.free(ranges.next().unwrap());
    assert_eq!(vmap.stats().pending_bytes, 0x2000);
    assert_eq!(vmap.stats().purges, 0);

    vmap.free(ranges.next().unwrap());
    let stats = vmap.stats();
    assert_eq!(stats.purges, 1);
    assert_eq!(stats.pending_ranges, 0);
    assert_eq!(stats.live_ranges, 0);
}

#[test]
fn free_now_makes_the_range_reusable() {
    let vmap = allocator();
    let a = vmap.allocate(0x3000, PAGE, space()).unwrap();
    let range = a.range();
    vmap.free_now(a);

    assert_eq!(vmap.stats().pending_ranges, 0);
    assert_eq!(vmap.shootdown().taken(), [range]);
    assert_eq!(vmap.allocate(0x3000, PAGE, space()).unwrap().range(), range);
}

#[test]
fn batch_preserves_request_order() {
    let vmap = allocator();
    let batch = vmap
        .allocate_batch(&[(0x3000, 0x1000).into(), (0, 0x2000).into()], 0x4000)
        .unwrap();
    assert_eq!(batch.base(), va(0));
    assert_eq!(batch.ranges()[0].range(), r(0x3000, 0x4000));
    assert_eq!(batch.ranges()[1].range(), r(0, 0x2000));
    assert_eq!(vmap.stats().allocations, 2);
}

#[test]
fn batch_rejects_malformed_requests() {
    let vmap = allocator();
    let invalid =
        |res: Result<_, VmapError>| matches!(res, Err(VmapError::InvalidArgument(_)));

    assert!(invalid(vmap.allocate_batch(&[], PAGE)));
    assert!(invalid(vmap.allocate_batch(&[(0, 0).into()], PAGE)));
    assert!(invalid(vmap.allocate_batch(&[(0, 0x1000).into()], 0x800)));
    assert!(invalid(vmap.allocate_batch(&[(0, 0x1000).into()], 0x3000)));
    assert!(invalid(
        vmap.allocate_batch(&[(0, 0x2000).into(), (0x1000, 0x1000).into()], PAGE)
    ));
    assert_eq!(vmap.stats().live_ranges, 0);
}

#[test]
fn batch_exhaustion_leaves_the_store_untouched() {
    let vmap = allocator();
    let _a = vmap.allocate(0x8000, PAGE, r(0x4000, 0x10000)).unwrap();

    assert!(matches!(
        vmap.allocate_batch(&[(0, PAGE).into(), (0x8000, PAGE).into()], PAGE),
        Err(VmapError::ExhaustedRange { .. })
    ));
    assert!(matches!(
        vmap.allocate_batch(&[(0, 0x20000).into()], PAGE),
        Err(VmapError::ExhaustedRange { .. })
    ));
    assert_eq!(vmap.stats().live_ranges, 1);
    assert_eq!(vmap.stats().failures, 2);
}

#[test]
fn free_batch_releases_every_member() {
    let vmap = allocator();
    let batch = vmap
        .allocate_batch(&[(0, PAGE).into(), (0x2000, PAGE).into()], PAGE)
        .unwrap();
    vmap.free_batch(batch.into_ranges());
    assert_eq!(vmap.stats().pending_ranges, 2);
    assert_eq!(vmap.purge(), 2);
    assert!(vmap.ranges().is_empty());
}

#[test]
fn repeated_requests_hit_the_placement_cache() {
    let vmap = allocator();
    for i in 0..4 {
        let h = vmap.allocate(PAGE, PAGE, space()).unwrap();
        assert_eq!(h.start(), va(i * PAGE));
    }
    let stats = vmap.stats();
    assert_eq!(stats.cache_misses, 1);
    assert_eq!(stats.cache_hits, 3);
}

#[test]
fn ranges_snapshot_lists_everything_in_order() {
    let vmap = allocator();
    let _hole = vmap.reserve(r(0x8000, 0x9000)).unwrap();
    let a = vmap.allocate(PAGE, PAGE, space()).unwrap();
    let b = vmap.allocate(PAGE, PAGE, space()).unwrap();
    vmap.free(b);

    let ranges = vmap.ranges();
    let starts: Vec<_> = ranges.iter().map(|i| i.range.start()).collect();
    assert_eq!(starts, [va(0), va(0x1000), va(0x8000)]);
    assert!(!ranges[0].flags.lazy_free());
    assert!(ranges[1].flags.lazy_free());
    assert!(ranges[2].flags.hole());
    assert_eq!(ranges[0].caller, a.caller());
    assert!(ranges[2].to_string().contains("hole"));
    assert!(ranges[0].caller.file().ends_with("scenarios.rs"));

    let stats = vmap.stats();
    assert_eq!(stats.live_bytes, 0x3000);
    assert_eq!(stats.pending_bytes, 0x1000);
}

#[test]
fn closures_serve_as_shootdown() {
    let vmap = RangeAllocator::new(VmapConfig::new(space()), |_: VirtualRange| {}).unwrap();
    let a = vmap.allocate(PAGE, PAGE, space()).unwrap();
    vmap.free_now(a);
    assert!(vmap.ranges().is_empty());
}

#[test]
fn inconsistent_configuration_is_rejected() {
    let config = VmapConfig::new(space()).with_module_window(r(0x8000, 0x18000));
    assert!(matches!(
        RangeAllocator::new(config, Flushes::default()),
        Err(VmapError::InvalidArgument(_))
    ));
}
