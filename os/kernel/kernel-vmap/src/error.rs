use crate::addresses::VirtualAddress;

/// Failure of a range allocator operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VmapError {
    /// Malformed size, alignment, bounds or batch request. Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// Address arithmetic would wrap around the top of the address space.
    #[error("address arithmetic overflow")]
    Overflow,
    /// No fitting gap, even after purging lazily freed ranges.
    #[error("no free range of {size:#x} bytes aligned to {align:#x}")]
    ExhaustedRange { size: u64, align: u64 },
    /// The address does not name a live range.
    #[error("no live range at {0}")]
    NotFound(VirtualAddress),
}

/// Outcome of a failed gap search inside the interval store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GapError {
    Exhausted,
    Overflow,
}

impl GapError {
    pub(crate) const fn into_vmap(self, size: u64, align: u64) -> VmapError {
        match self {
            Self::Exhausted => VmapError::ExhaustedRange { size, align },
            Self::Overflow => VmapError::Overflow,
        }
    }
}

/// Failure reported by a [`PageMapper`](crate::PageMapper).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("{0} is already mapped")]
    AlreadyMapped(VirtualAddress),
    #[error("out of memory for page tables")]
    OutOfTables,
}

/// Failure of a backed allocation through [`Vmalloc`](crate::Vmalloc).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum VmallocError {
    #[error(transparent)]
    Range(#[from] VmapError),
    #[error("out of memory backing {pages} pages")]
    OutOfMemory { pages: u64 },
    #[error("mapping failed: {0}")]
    Map(#[from] MapError),
}
