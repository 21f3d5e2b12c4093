//! Range descriptors and the handles callers hold on to them.

use crate::addresses::{VirtualAddress, VirtualRange};
use alloc::sync::{Arc, Weak};
use bitfield_struct::bitfield;
use core::fmt;
use core::panic::Location;
use core::sync::atomic::{AtomicU8, Ordering};

/// Per-range state bits.
#[bitfield(u8)]
#[derive(Eq, PartialEq)]
pub struct RangeFlags {
    /// Pseudo-reservation: occupies address space but is never handed out.
    pub hole: bool,
    /// Freed by its owner and queued for the next purge.
    pub lazy_free: bool,
    /// Placed as part of a batch (per-CPU layout).
    pub batch: bool,
    /// Backed and mapped by the vmalloc layer.
    pub mapped: bool,
    #[bits(4)]
    __: u8,
}

/// Record of one live `[start, end)` interval.
///
/// Descriptors are shared between the interval store, the lock-free lookup
/// snapshots and the caller's [`RangeHandle`]s; the memory is released when
/// the last of them lets go, which for snapshots happens only after a grace
/// period.
pub struct RangeDescriptor {
    range: VirtualRange,
    /// Size the caller asked for, before any rounding.
    requested: u64,
    flags: AtomicU8,
    caller: &'static Location<'static>,
}

impl RangeDescriptor {
    pub(crate) fn new(
        range: VirtualRange,
        requested: u64,
        flags: RangeFlags,
        caller: &'static Location<'static>,
    ) -> Self {
        debug_assert!(!range.is_empty());
        Self {
            range,
            requested,
            flags: AtomicU8::new(flags.into_bits()),
            caller,
        }
    }

    pub(crate) const fn range(&self) -> VirtualRange {
        self.range
    }
}

/// Shared handle to a [`RangeDescriptor`].
///
/// Cloning is cheap. Holding a handle keeps the descriptor's memory alive,
/// not the address range: once freed and purged, the addresses may be handed
/// out again.
#[derive(Clone)]
pub struct RangeHandle(Arc<RangeDescriptor>);

impl RangeHandle {
    pub(crate) fn new(descriptor: RangeDescriptor) -> Self {
        Self(Arc::new(descriptor))
    }

    #[inline]
    #[must_use]
    pub fn range(&self) -> VirtualRange {
        self.0.range
    }

    #[inline]
    #[must_use]
    pub fn start(&self) -> VirtualAddress {
        self.0.range.start()
    }

    #[inline]
    #[must_use]
    pub fn end(&self) -> VirtualAddress {
        self.0.range.end()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> u64 {
        self.0.range.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.range.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn requested(&self) -> u64 {
        self.0.requested
    }

    /// Source location of the allocation call.
    #[inline]
    #[must_use]
    pub fn caller(&self) -> &'static Location<'static> {
        self.0.caller
    }

    #[inline]
    #[must_use]
    pub fn flags(&self) -> RangeFlags {
        RangeFlags::from_bits(self.0.flags.load(Ordering::Acquire))
    }

    #[inline]
    #[must_use]
    pub fn is_pending_free(&self) -> bool {
        self.flags().lazy_free()
    }

    #[inline]
    #[must_use]
    pub fn is_hole(&self) -> bool {
        self.flags().hole()
    }

    /// Whether both handles refer to the same descriptor.
    #[inline]
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Set the bits in `set`; returns the flags as they were before.
    pub(crate) fn insert_flags(&self, set: RangeFlags) -> RangeFlags {
        RangeFlags::from_bits(self.0.flags.fetch_or(set.into_bits(), Ordering::AcqRel))
    }

    pub(crate) fn downgrade(&self) -> Weak<RangeDescriptor> {
        Arc::downgrade(&self.0)
    }
}

impl fmt::Debug for RangeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeHandle")
            .field("range", &self.0.range)
            .field("flags", &self.flags())
            .field("caller", &format_args!("{}", self.0.caller))
            .finish()
    }
}

/// Point-in-time view of one range, as listed by
/// [`RangeAllocator::ranges`](crate::RangeAllocator::ranges).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeInfo {
    pub range: VirtualRange,
    pub requested: u64,
    pub flags: RangeFlags,
    pub caller: &'static Location<'static>,
}

impl From<&RangeHandle> for RangeInfo {
    fn from(h: &RangeHandle) -> Self {
        Self {
            range: h.range(),
            requested: h.requested(),
            flags: h.flags(),
            caller: h.caller(),
        }
    }
}

impl fmt::Display for RangeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:>10}", self.range, self.range.len())?;
        for (set, name) in [
            (self.flags.hole(), "hole"),
            (self.flags.lazy_free(), "lazy"),
            (self.flags.batch(), "batch"),
            (self.flags.mapped(), "mapped"),
        ] {
            if set {
                write!(f, " {name}")?;
            }
        }
        write!(f, " {}", self.caller)
    }
}
