use core::fmt;
use core::ops::{Add, Sub};

/// Opaque address inside one of the heap windows.
///
/// This is a plain integer handle, not a pointer: the windows may not be
/// backed by addressable memory at all. Only the physical backing turns an
/// address into something dereferenceable (see
/// [`PhysicalBacking::resolve`](crate::PhysicalBacking::resolve)).
///
/// ```rust
/// # use heap_alloc::HeapAddress;
/// let a = HeapAddress::new(0x1_0000_4000);
/// assert!(a.is_aligned(0x4000));
/// assert_eq!((a + 0x10).as_u64(), 0x1_0000_4010);
/// assert_eq!(format!("{a:?}"), "HA(0x0000000100004000)");
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct HeapAddress(u64);

impl HeapAddress {
    /// The "no allocation" address.
    pub const NULL: Self = Self(0);

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

    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// `alignment` must be a power of two.
    #[inline]
    #[must_use]
    pub const fn is_aligned(self, alignment: u64) -> bool {
        debug_assert!(alignment.is_power_of_two());
        self.0 & (alignment - 1) == 0
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, bytes: u64) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Byte distance from `base`, if `self` is not below it.
    #[inline]
    #[must_use]
    pub const fn offset_from(self, base: Self) -> Option<u64> {
        self.0.checked_sub(base.0)
    }
}

impl fmt::Debug for HeapAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HA(0x{:016X})", self.0)
    }
}

impl fmt::Display for HeapAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl From<u64> for HeapAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl From<HeapAddress> for u64 {
    #[inline]
    fn from(a: HeapAddress) -> Self {
        a.0
    }
}

impl Add<u64> for HeapAddress {
    type Output = Self;

    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Sub<Self> for HeapAddress {
    type Output = u64;

    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}

/// Half-open byte range `[start, start + length)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AddressRange {
    pub start: HeapAddress,
    pub length: u64,
}

impl AddressRange {
    #[inline]
    #[must_use]
    pub const fn new(start: HeapAddress, length: u64) -> Self {
        Self { start, length }
    }

    /// One past the last byte. Saturates for ranges ending at the top of the space.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.start.as_u64().saturating_add(self.length)
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, address: HeapAddress) -> bool {
        address.as_u64() >= self.start.as_u64() && address.as_u64() < self.end()
    }

    /// `true` if `[address, address + length)` lies entirely inside.
    #[inline]
    #[must_use]
    pub const fn contains_range(&self, address: HeapAddress, length: u64) -> bool {
        match address.as_u64().checked_add(length) {
            Some(end) => address.as_u64() >= self.start.as_u64() && end <= self.end(),
            None => false,
        }
    }

    #[inline]
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start.as_u64() < other.end() && other.start.as_u64() < self.end()
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..0x{:016X}", self.start, self.end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatting() {
        let a = HeapAddress::new(0xDEAD_B000);
        assert_eq!(format!("{a:?}"), "HA(0x00000000DEADB000)");
        assert_eq!(format!("{a}"), "0x00000000DEADB000");
        let r = AddressRange::new(a, 0x1000);
        assert_eq!(format!("{r}"), "0x00000000DEADB000..0x00000000DEADC000");
    }

    #[test]
    fn alignment_and_offsets() {
        let base = HeapAddress::new(0x4000_0000);
        let a = base + 0x3000;
        assert!(a.is_aligned(0x1000));
        assert!(!a.is_aligned(0x2000));
        assert_eq!(a.offset_from(base), Some(0x3000));
        assert_eq!(base.offset_from(a), None);
        assert_eq!(a - base, 0x3000);
        assert_eq!(HeapAddress::new(u64::MAX).checked_add(1), None);
        assert!(HeapAddress::NULL.is_null());
    }

    #[test]
    fn range_containment() {
        let r = AddressRange::new(HeapAddress::new(0x1000), 0x1000);
        assert!(r.contains(HeapAddress::new(0x1000)));
        assert!(r.contains(HeapAddress::new(0x1FFF)));
        assert!(!r.contains(HeapAddress::new(0x2000)));
        assert!(r.contains_range(HeapAddress::new(0x1800), 0x800));
        assert!(!r.contains_range(HeapAddress::new(0x1800), 0x801));
        assert!(!r.contains_range(HeapAddress::new(u64::MAX), 2));

        let s = AddressRange::new(HeapAddress::new(0x2000), 0x10);
        assert!(!r.overlaps(&s));
        assert!(AddressRange::new(HeapAddress::new(0x1FF0), 0x20).overlaps(&s));
    }
}
