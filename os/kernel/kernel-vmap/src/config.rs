//! Runtime configuration of a [`RangeAllocator`](crate::RangeAllocator).

use crate::addresses::{VirtualAddress, VirtualRange};
use crate::error::VmapError;
use kernel_info::memory::{
    LAZY_MAX_BYTES, MODULES_END, MODULES_VADDR, PAGE_SIZE, RETIRE_BATCH, VMALLOC_END,
    VMALLOC_START,
};

/// Allocator configuration.
///
/// `space` is the whole interval the allocator manages; the `vmalloc` and
/// `modules` windows are sub-windows used by the convenience entry points
/// and by batch placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmapConfig {
    pub space: VirtualRange,
    pub vmalloc: VirtualRange,
    pub modules: VirtualRange,
    /// Allocation granularity; every size and window edge is a multiple of it.
    pub page_size: u64,
    /// Pending lazily freed bytes that trigger an opportunistic purge.
    pub lazy_max_bytes: u64,
    /// Retired lookup snapshots tolerated before a grace period is forced.
    pub retire_batch: usize,
    /// Exhaustion warnings logged before rate limiting kicks in.
    pub ratelimit_burst: u32,
    /// After the burst, one exhaustion warning out of this many is logged.
    pub ratelimit_interval: u32,
}

impl Default for VmapConfig {
    fn default() -> Self {
        Self::new(VirtualRange::new(
            VirtualAddress::new(VMALLOC_START),
            VirtualAddress::new(MODULES_END),
        ))
        .with_vmalloc_window(VirtualRange::new(
            VirtualAddress::new(VMALLOC_START),
            VirtualAddress::new(VMALLOC_END),
        ))
        .with_module_window(VirtualRange::new(
            VirtualAddress::new(MODULES_VADDR),
            VirtualAddress::new(MODULES_END),
        ))
    }
}

impl VmapConfig {
    /// Manage `space`, using it for both the vmalloc and module windows.
    #[must_use]
    pub const fn new(space: VirtualRange) -> Self {
        Self {
            space,
            vmalloc: space,
            modules: space,
            page_size: PAGE_SIZE,
            lazy_max_bytes: LAZY_MAX_BYTES,
            retire_batch: RETIRE_BATCH,
            ratelimit_burst: 10,
            ratelimit_interval: 100,
        }
    }

    #[must_use]
    pub const fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub const fn with_vmalloc_window(mut self, window: VirtualRange) -> Self {
        self.vmalloc = window;
        self
    }

    #[must_use]
    pub const fn with_module_window(mut self, window: VirtualRange) -> Self {
        self.modules = window;
        self
    }

    /// `u64::MAX` disables threshold-driven purging entirely.
    #[must_use]
    pub const fn with_lazy_max_bytes(mut self, bytes: u64) -> Self {
        self.lazy_max_bytes = bytes;
        self
    }

    #[must_use]
    pub const fn with_retire_batch(mut self, snapshots: usize) -> Self {
        self.retire_batch = snapshots;
        self
    }

    #[must_use]
    pub const fn with_ratelimit(mut self, burst: u32, interval: u32) -> Self {
        self.ratelimit_burst = burst;
        self.ratelimit_interval = interval;
        self
    }

    /// Check the internal consistency of the configuration.
    ///
    /// # Errors
    /// [`VmapError::InvalidArgument`] naming the first violated constraint.
    pub fn validate(&self) -> Result<(), VmapError> {
        if !self.page_size.is_power_of_two() {
            return Err(VmapError::InvalidArgument("page size is not a power of two"));
        }
        if self.space.is_empty() {
            return Err(VmapError::InvalidArgument("managed space is empty"));
        }
        for window in [&self.space, &self.vmalloc, &self.modules] {
            if !window.start().is_aligned(self.page_size)
                || !window.end().is_aligned(self.page_size)
            {
                return Err(VmapError::InvalidArgument("window is not page aligned"));
            }
        }
        if !self.space.contains_range(&self.vmalloc) || !self.space.contains_range(&self.modules)
        {
            return Err(VmapError::InvalidArgument(
                "window lies outside the managed space",
            ));
        }
        Ok(())
    }
}
