//! Batch requests for mutually placed ranges (per-CPU layouts).

use crate::addresses::VirtualAddress;
use crate::error::VmapError;
use crate::range::RangeHandle;
use alloc::vec::Vec;

/// One member of a batch: `size` bytes at `offset` from the common base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchRequest {
    pub offset: u64,
    pub size: u64,
}

impl BatchRequest {
    #[must_use]
    pub const fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }
}

impl From<(u64, u64)> for BatchRequest {
    fn from((offset, size): (u64, u64)) -> Self {
        Self::new(offset, size)
    }
}

/// Result of a successful batch placement.
#[derive(Debug)]
pub struct BatchAllocation {
    base: VirtualAddress,
    ranges: Vec<RangeHandle>,
}

impl BatchAllocation {
    pub(crate) const fn new(base: VirtualAddress, ranges: Vec<RangeHandle>) -> Self {
        Self { base, ranges }
    }

    /// The common base all offsets were shifted by.
    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    /// One range per request, in request order.
    #[must_use]
    pub fn ranges(&self) -> &[RangeHandle] {
        &self.ranges
    }

    #[must_use]
    pub fn into_ranges(self) -> Vec<RangeHandle> {
        self.ranges
    }
}

/// Validated, offset-sorted form of a batch.
#[derive(Debug)]
pub(crate) struct BatchPlan {
    /// `(offset, size)` sorted by offset.
    pub(crate) members: Vec<(u64, u64)>,
    /// `order[i]` is the request index of `members[i]`.
    pub(crate) order: Vec<usize>,
    /// Distance from the base to the end of the last member.
    pub(crate) span: u64,
}

impl BatchPlan {
    /// # Errors
    /// - [`VmapError::InvalidArgument`] for an empty batch, a bad alignment,
    ///   unaligned or empty members, or members overlapping each other.
    /// - [`VmapError::Overflow`] if a member's end does not fit in 64 bits.
    pub(crate) fn new(requests: &[BatchRequest], align: u64, page: u64) -> Result<Self, VmapError> {
        if requests.is_empty() {
            return Err(VmapError::InvalidArgument("empty batch"));
        }
        if !align.is_power_of_two() || !align.is_multiple_of(page) {
            return Err(VmapError::InvalidArgument(
                "batch alignment must be a page-aligned power of two",
            ));
        }

        let mut order: Vec<usize> = (0..requests.len()).collect();
        order.sort_by_key(|&i| requests[i].offset);

        let mut members = Vec::with_capacity(requests.len());
        let mut span = 0u64;
        for &i in &order {
            let BatchRequest { offset, size } = requests[i];
            if size == 0 {
                return Err(VmapError::InvalidArgument("zero-sized batch member"));
            }
            if !offset.is_multiple_of(page) || !size.is_multiple_of(page) {
                return Err(VmapError::InvalidArgument("batch member is not page aligned"));
            }
            if offset < span {
                return Err(VmapError::InvalidArgument("batch members overlap"));
            }
            span = offset.checked_add(size).ok_or(VmapError::Overflow)?;
            members.push((offset, size));
        }

        Ok(Self {
            members,
            order,
            span,
        })
    }
}
