//! Virtual and physical address newtypes used by the range allocator.

use core::fmt;
use core::ops::Range;

/// Virtual memory address.
///
/// Carries only the *kind* of address at the type level; canonicality is not
/// validated.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_aligned(self, align: u64) -> bool {
        self.0 & (align - 1) == 0
    }

    /// `self + rhs`, or `None` on wrap-around.
    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Round up to `align` (a power of two), or `None` on wrap-around.
    #[inline]
    #[must_use]
    pub const fn align_up(self, align: u64) -> Option<Self> {
        match align_up(self.0, align) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:016X})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for VirtualAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

/// Physical memory address of a backing frame.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u64);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:016X})", self.0)
    }
}

/// Half-open virtual address interval `[start, end)`.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct VirtualRange {
    start: VirtualAddress,
    end: VirtualAddress,
}

impl VirtualRange {
    /// # Panics
    /// If `end < start`.
    #[inline]
    #[must_use]
    pub const fn new(start: VirtualAddress, end: VirtualAddress) -> Self {
        assert!(start.0 <= end.0, "range end precedes its start");
        Self { start, end }
    }

    /// `[start, start + len)`, or `None` if the end wraps.
    #[inline]
    #[must_use]
    pub const fn from_len(start: VirtualAddress, len: u64) -> Option<Self> {
        match start.checked_add(len) {
            Some(end) => Some(Self { start, end }),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.start
    }

    #[inline]
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        self.end
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end.0 - self.start.0
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end.0 == self.start.0
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, va: VirtualAddress) -> bool {
        self.start.0 <= va.0 && va.0 < self.end.0
    }

    /// Whether `other` lies entirely inside `self`.
    #[inline]
    #[must_use]
    pub const fn contains_range(&self, other: &Self) -> bool {
        self.start.0 <= other.start.0 && other.end.0 <= self.end.0
    }

    #[inline]
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start.0 < other.end.0 && other.start.0 < self.end.0
    }

    /// Smallest range covering both `self` and `other`.
    #[inline]
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Debug for VirtualRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0x{:X}, 0x{:X})", self.start.0, self.end.0)
    }
}

impl fmt::Display for VirtualRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl From<Range<u64>> for VirtualRange {
    fn from(r: Range<u64>) -> Self {
        Self::new(VirtualAddress::new(r.start), VirtualAddress::new(r.end))
    }
}

/// Round `value` up to `align` (a power of two), or `None` on wrap-around.
#[inline]
#[must_use]
pub const fn align_up(value: u64, align: u64) -> Option<u64> {
    debug_assert!(align.is_power_of_two());
    match value.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_and_detects_wrap() {
        assert_eq!(align_up(0, 0x1000), Some(0));
        assert_eq!(align_up(1, 0x1000), Some(0x1000));
        assert_eq!(align_up(0x1000, 0x1000), Some(0x1000));
        assert_eq!(align_up(u64::MAX - 5, 0x1000), None);
    }

    #[test]
    fn range_relations() {
        let a = VirtualRange::from(0x1000..0x3000);
        let b = VirtualRange::from(0x2000..0x4000);
        let c = VirtualRange::from(0x3000..0x4000);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c), "half-open ranges touching at 0x3000");
        assert!(a.contains(VirtualAddress::new(0x2FFF)));
        assert!(!a.contains(VirtualAddress::new(0x3000)));
        assert_eq!(a.union(&c), VirtualRange::from(0x1000..0x4000));
        assert!(VirtualRange::from(0..0x10000).contains_range(&b));
        assert_eq!(b.len(), 0x2000);
    }

    #[test]
    fn from_len_rejects_wrap() {
        assert!(VirtualRange::from_len(VirtualAddress::new(u64::MAX - 0xFFF), 0x2000).is_none());
        let r = VirtualRange::from_len(VirtualAddress::new(0x4000), 0x1000).unwrap();
        assert_eq!(r.end().as_u64(), 0x5000);
    }
}
