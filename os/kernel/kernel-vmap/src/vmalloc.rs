//! Backed allocations: a range from the allocator, frames from a
//! [`FrameProvider`] and page-table entries from a [`PageMapper`], set up
//! and torn down as one unit.

use crate::addresses::{PhysicalAddress, VirtualAddress, VirtualRange, align_up};
use crate::allocator::RangeAllocator;
use crate::collab::{FrameProvider, MapAttributes, PageMapper, TlbShootdown};
use crate::error::{VmallocError, VmapError};
use crate::range::{RangeFlags, RangeHandle};
use alloc::vec::Vec;
use core::panic::Location;
use log::debug;

/// A mapped, frame-backed range.
#[derive(Debug)]
pub struct VmArea {
    handle: RangeHandle,
    frames: Vec<PhysicalAddress>,
}

impl VmArea {
    #[must_use]
    pub fn start(&self) -> VirtualAddress {
        self.handle.start()
    }

    #[must_use]
    pub fn range(&self) -> VirtualRange {
        self.handle.range()
    }

    /// Size the caller asked for, before page rounding.
    #[must_use]
    pub fn requested(&self) -> u64 {
        self.handle.requested()
    }

    #[must_use]
    pub fn frames(&self) -> &[PhysicalAddress] {
        &self.frames
    }

    #[must_use]
    pub const fn handle(&self) -> &RangeHandle {
        &self.handle
    }
}

pub struct Vmalloc<'a, T, F, M> {
    ranges: &'a RangeAllocator<T>,
    frames: &'a F,
    mapper: &'a M,
}

impl<'a, T, F, M> Vmalloc<'a, T, F, M>
where
    T: TlbShootdown,
    F: FrameProvider,
    M: PageMapper,
{
    pub const fn new(ranges: &'a RangeAllocator<T>, frames: &'a F, mapper: &'a M) -> Self {
        Self {
            ranges,
            frames,
            mapper,
        }
    }

    /// Allocate `size` bytes (rounded up to whole pages) from the vmalloc
    /// window as writable kernel data.
    ///
    /// # Errors
    /// See [`alloc`](Self::alloc).
    #[track_caller]
    pub fn vmalloc(&self, size: u64) -> Result<VmArea, VmallocError> {
        let config = self.ranges.config();
        self.alloc_at(
            size,
            config.page_size,
            config.vmalloc,
            MapAttributes::kernel_data(),
            Location::caller(),
        )
    }

    /// Allocate executable memory from the module window.
    ///
    /// # Errors
    /// See [`alloc`](Self::alloc).
    #[track_caller]
    pub fn module_alloc(&self, size: u64) -> Result<VmArea, VmallocError> {
        let config = self.ranges.config();
        self.alloc_at(
            size,
            config.page_size,
            config.modules,
            MapAttributes::module(),
            Location::caller(),
        )
    }

    /// Reserve a range inside `window`, back every page with a fresh frame
    /// and map it with `attrs`. On failure everything done so far is undone.
    ///
    /// # Errors
    /// - [`VmallocError::Range`] if no range could be placed.
    /// - [`VmallocError::OutOfMemory`] if frames ran out.
    /// - [`VmallocError::Map`] if the mapper refused a page.
    #[track_caller]
    pub fn alloc(
        &self,
        size: u64,
        align: u64,
        window: VirtualRange,
        attrs: MapAttributes,
    ) -> Result<VmArea, VmallocError> {
        self.alloc_at(size, align, window, attrs, Location::caller())
    }

    fn alloc_at(
        &self,
        size: u64,
        align: u64,
        window: VirtualRange,
        attrs: MapAttributes,
        caller: &'static Location<'static>,
    ) -> Result<VmArea, VmallocError> {
        let page = self.ranges.config().page_size;
        if size == 0 {
            return Err(VmapError::InvalidArgument("zero-sized allocation").into());
        }
        let rounded = align_up(size, page).ok_or(VmapError::Overflow)?;
        let handle = self
            .ranges
            .allocate_with(rounded, size, align, window, caller)?;

        let pages = rounded / page;
        let mut frames = Vec::with_capacity(usize::try_from(pages).unwrap_or(0));
        for _ in 0..pages {
            let Some(frame) = self.frames.alloc_frame() else {
                self.roll_back(handle, &frames, 0);
                return Err(VmallocError::OutOfMemory { pages });
            };
            frames.push(frame);
        }

        let mut va = handle.start();
        for (mapped, &frame) in frames.iter().enumerate() {
            if let Err(e) = self.mapper.map_page(va, frame, attrs) {
                self.roll_back(handle, &frames, mapped as u64 * page);
                return Err(e.into());
            }
            va = VirtualAddress::new(va.as_u64() + page);
        }

        handle.insert_flags(RangeFlags::new().with_mapped(true));
        debug!("vmalloc: {} backed by {pages} frames", handle.range());
        Ok(VmArea { handle, frames })
    }

    /// Undo a partially built area: the first `mapped_bytes` are mapped,
    /// every frame in `frames` is owned.
    fn roll_back(&self, handle: RangeHandle, frames: &[PhysicalAddress], mapped_bytes: u64) {
        if mapped_bytes > 0 {
            let start = handle.start();
            self.mapper.unmap_range(VirtualRange::new(
                start,
                VirtualAddress::new(start.as_u64() + mapped_bytes),
            ));
        }
        for &frame in frames {
            self.frames.free_frame(frame);
        }
        self.ranges.free(handle);
    }

    /// Unmap `area`, return its frames and lazily free its range.
    pub fn free(&self, area: VmArea) {
        self.mapper.unmap_range(area.range());
        for &frame in &area.frames {
            self.frames.free_frame(frame);
        }
        self.ranges.free(area.handle);
    }
}
