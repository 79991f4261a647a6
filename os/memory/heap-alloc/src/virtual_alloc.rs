//! Page-granular address reservation within one heap's window.

use crate::{AddressRange, ConfigError, HeapAddress, HeapError, HeapKind, HeapKindConfig};
use heap_buddy::BuddyPageAllocator;
use log::trace;

/// Page allocator bound to one heap's address window.
///
/// Sizes are in bytes and must be whole pages. Every region is reserved as a
/// power-of-two number of pages, aligned to that size within the window; a
/// 3-page request occupies 4 pages until it is freed.
#[derive(Debug)]
pub struct VirtualAddressAllocator {
    kind: HeapKind,
    window: AddressRange,
    page_shift: u32,
    pages: BuddyPageAllocator,
}

impl VirtualAddressAllocator {
    /// # Errors
    /// The window or page size is unusable; see [`HeapConfig::validate`](crate::HeapConfig::validate).
    pub fn new(kind: HeapKind, config: &HeapKindConfig) -> Result<Self, ConfigError> {
        if !config.window_size.is_power_of_two() {
            return Err(ConfigError::WindowNotPowerOfTwo(kind));
        }
        if !config.page_size.is_power_of_two() || config.page_size > config.window_size {
            return Err(ConfigError::PageSizeInvalid(kind));
        }
        let num_pages =
            u32::try_from(config.num_pages()).map_err(|_| ConfigError::PageSizeInvalid(kind))?;
        let pages = BuddyPageAllocator::new(num_pages).map_err(|_| ConfigError::PageSizeInvalid(kind))?;

        Ok(Self {
            kind,
            window: config.window(),
            page_shift: config.page_size.trailing_zeros(),
            pages,
        })
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> HeapKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub const fn window(&self) -> AddressRange {
        self.window
    }

    #[inline]
    #[must_use]
    pub const fn page_size(&self) -> u64 {
        1 << self.page_shift
    }

    #[inline]
    #[must_use]
    pub const fn pages(&self) -> &BuddyPageAllocator {
        &self.pages
    }

    /// Bytes of window currently handed out, including power-of-two padding.
    #[must_use]
    pub fn reserved_bytes(&self) -> u64 {
        u64::from(self.pages.allocated_count()) << self.page_shift
    }

    #[must_use]
    pub fn free_bytes(&self) -> u64 {
        u64::from(self.pages.free_count()) << self.page_shift
    }

    /// Window bytes a `size`-byte allocation occupies.
    #[must_use]
    pub const fn footprint(&self, size: u64) -> u64 {
        let pages = size.div_ceil(self.page_size());
        pages.next_power_of_two() << self.page_shift
    }

    /// Reserves `size` bytes of window aligned to `alignment`.
    ///
    /// `alignment` must be zero or a power of two; anything at or below the
    /// page size is satisfied by page alignment alone.
    ///
    /// # Errors
    /// - [`HeapError::InvalidSize`] for zero or non-page-multiple sizes.
    /// - [`HeapError::InvalidAlignment`] for non-power-of-two alignments or
    ///   alignments larger than the window.
    /// - [`HeapError::OutOfVirtualAddressSpace`] if no free aligned region is
    ///   large enough.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Result<HeapAddress, HeapError> {
        let pages = self.size_to_pages(size)?;
        if alignment != 0 && !alignment.is_power_of_two() {
            return Err(HeapError::InvalidAlignment(alignment));
        }
        if alignment > self.window.length {
            return Err(HeapError::InvalidAlignment(alignment));
        }
        let out_of_space = HeapError::OutOfVirtualAddressSpace {
            kind: self.kind,
            requested: size,
        };

        let pages = pages.checked_next_power_of_two().ok_or(out_of_space)?;
        let align_pages = u32::try_from((alignment >> self.page_shift).max(1)).map_err(|_| out_of_space)?;
        let index = self.pages.allocate_pages(pages, align_pages).ok_or(out_of_space)?;

        let address = self.window.start + (u64::from(index) << self.page_shift);
        trace!("{} window: reserved {pages} pages at {address}", self.kind);
        Ok(address)
    }

    /// Returns a region reserved by [`allocate`](Self::allocate) with the same size.
    ///
    /// # Errors
    /// [`HeapError::UnknownAddress`] if the region is not page-aligned inside
    /// this window or is not wholly reserved, [`HeapError::InvalidSize`] for
    /// sizes `allocate` would reject.
    pub fn free(&mut self, address: HeapAddress, size: u64) -> Result<(), HeapError> {
        if !self.pages_allocated(address, size)? {
            return Err(HeapError::UnknownAddress(address));
        }
        let pages = self.size_to_pages(size)?;
        let index = self.page_index(address, size)?;
        let pages = pages
            .checked_next_power_of_two()
            .ok_or(HeapError::InvalidSize(size))?;

        self.pages.free_pages(index, pages);
        trace!("{} window: released {pages} pages at {address}", self.kind);
        Ok(())
    }

    /// `true` if the whole region an allocation of `size` at `address` would
    /// occupy is currently reserved.
    ///
    /// # Errors
    /// As for [`free`](Self::free).
    pub fn pages_allocated(&self, address: HeapAddress, size: u64) -> Result<bool, HeapError> {
        let pages = self.size_to_pages(size)?;
        let index = self.page_index(address, size)?;
        let Some(pages) = pages.checked_next_power_of_two() else {
            return Err(HeapError::InvalidSize(size));
        };
        let in_window = index
            .checked_add(pages)
            .is_some_and(|end| end <= self.pages.num_pages());
        Ok(in_window && self.pages.is_range_allocated(index, pages))
    }

    /// Marks a range as used without searching, e.g. memory in use before
    /// the heap manager existed. Returns `false` if any page is taken.
    ///
    /// The rounded footprint is claimed, so the range can later be released
    /// with [`free`](Self::free) and the same size.
    ///
    /// # Errors
    /// As for [`free`](Self::free).
    pub fn claim(&mut self, address: HeapAddress, size: u64) -> Result<bool, HeapError> {
        let pages = self.size_to_pages(size)?;
        let pages = pages
            .checked_next_power_of_two()
            .ok_or(HeapError::InvalidSize(size))?;
        let index = self.page_index(address, u64::from(pages) << self.page_shift)?;
        Ok(self.pages.claim_pages(index, pages))
    }

    fn size_to_pages(&self, size: u64) -> Result<u32, HeapError> {
        if size == 0 || !size.is_multiple_of(self.page_size()) {
            return Err(HeapError::InvalidSize(size));
        }
        if size > self.window.length {
            return Err(HeapError::OutOfVirtualAddressSpace {
                kind: self.kind,
                requested: size,
            });
        }
        u32::try_from(size >> self.page_shift).map_err(|_| HeapError::InvalidSize(size))
    }

    fn page_index(&self, address: HeapAddress, size: u64) -> Result<u32, HeapError> {
        if !self.window.contains_range(address, size) || !address.is_aligned(self.page_size()) {
            return Err(HeapError::UnknownAddress(address));
        }
        let offset = address - self.window.start;
        u32::try_from(offset >> self.page_shift).map_err(|_| HeapError::UnknownAddress(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: u64 = 4096;
    const BASE: u64 = 0x10_0000;

    fn window(pages: u64) -> VirtualAddressAllocator {
        VirtualAddressAllocator::new(
            HeapKind::Cpu,
            &HeapKindConfig::new(BASE, pages * PAGE, PAGE, None),
        )
        .unwrap()
    }

    fn page(n: u64) -> HeapAddress {
        HeapAddress::new(BASE + n * PAGE)
    }

    #[test]
    fn eight_page_window_rounds_to_powers_of_two() {
        let mut v = window(8);
        let a = v.allocate(3 * PAGE, PAGE).unwrap();
        assert_eq!(a, page(0));
        assert_eq!(v.allocate(2 * PAGE, PAGE).unwrap(), page(4));
        assert_eq!(v.allocate(2 * PAGE, PAGE).unwrap(), page(6));
        assert_eq!(v.free_bytes(), 0);

        assert_eq!(
            v.allocate(PAGE, PAGE),
            Err(HeapError::OutOfVirtualAddressSpace {
                kind: HeapKind::Cpu,
                requested: PAGE
            })
        );

        v.free(a, 3 * PAGE).unwrap();
        assert_eq!(v.allocate(4 * PAGE, PAGE).unwrap(), page(0));
    }

    #[test]
    fn alignment_is_honored() {
        let mut v = window(64);
        v.allocate(PAGE, 0).unwrap();
        for alignment in [PAGE, 2 * PAGE, 8 * PAGE, 32 * PAGE] {
            let a = v.allocate(PAGE, alignment).unwrap();
            assert!(a.is_aligned(alignment), "{a} not aligned to {alignment:#x}");
        }
        // Sub-page alignment is implied by page alignment.
        assert!(v.allocate(PAGE, 64).unwrap().is_aligned(PAGE));
    }

    #[test]
    fn rejects_invalid_requests() {
        let mut v = window(8);
        assert_eq!(v.allocate(0, PAGE), Err(HeapError::InvalidSize(0)));
        assert_eq!(v.allocate(100, PAGE), Err(HeapError::InvalidSize(100)));
        assert_eq!(v.allocate(PAGE, 3 * PAGE), Err(HeapError::InvalidAlignment(3 * PAGE)));
        assert_eq!(v.allocate(PAGE, 16 * PAGE), Err(HeapError::InvalidAlignment(16 * PAGE)));
        assert!(matches!(
            v.allocate(16 * PAGE, PAGE),
            Err(HeapError::OutOfVirtualAddressSpace { .. })
        ));

        let outside = HeapAddress::new(BASE + 8 * PAGE);
        assert_eq!(v.free(outside, PAGE), Err(HeapError::UnknownAddress(outside)));
        let misaligned = HeapAddress::new(BASE + 16);
        assert_eq!(v.free(misaligned, PAGE), Err(HeapError::UnknownAddress(misaligned)));
    }

    #[test]
    fn footprint_and_accounting() {
        let mut v = window(16);
        assert_eq!(v.footprint(3 * PAGE), 4 * PAGE);
        assert_eq!(v.footprint(PAGE), PAGE);
        let a = v.allocate(5 * PAGE, PAGE).unwrap();
        assert_eq!(v.reserved_bytes(), 8 * PAGE);
        v.free(a, 5 * PAGE).unwrap();
        assert!(v.pages().is_empty());
    }

    #[test]
    fn pages_allocated_tracks_reservations() {
        let mut v = window(8);
        let a = v.allocate(3 * PAGE, PAGE).unwrap();
        assert_eq!(v.pages_allocated(a, 3 * PAGE), Ok(true));
        assert_eq!(v.pages_allocated(page(4), PAGE), Ok(false));
        // The padded page belongs to the 3-page allocation.
        assert_eq!(v.pages_allocated(page(3), PAGE), Ok(true));
        // Rounded size runs past the window end.
        assert_eq!(v.pages_allocated(page(5), 3 * PAGE), Ok(false));
    }

    #[test]
    fn claim_blocks_later_allocations() {
        let mut v = window(4);
        assert_eq!(v.claim(page(0), 2 * PAGE), Ok(true));
        assert_eq!(v.claim(page(1), PAGE), Ok(false));
        assert_eq!(v.allocate(2 * PAGE, PAGE).unwrap(), page(2));
    }

    #[test]
    fn claimed_ranges_can_be_freed() {
        let mut v = window(8);
        assert_eq!(v.claim(page(4), 3 * PAGE), Ok(true));
        assert_eq!(v.reserved_bytes(), 4 * PAGE);
        assert_eq!(v.pages_allocated(page(7), PAGE), Ok(true));

        v.free(page(4), 3 * PAGE).unwrap();
        assert!(v.pages().is_empty());
    }

    #[test]
    fn freeing_unreserved_pages_is_rejected() {
        let mut v = window(8);
        let a = v.allocate(PAGE, PAGE).unwrap();
        assert_eq!(a, page(0));

        assert_eq!(v.free(page(2), PAGE), Err(HeapError::UnknownAddress(page(2))));
        // Only part of the range is reserved.
        assert_eq!(v.free(a, 2 * PAGE), Err(HeapError::UnknownAddress(a)));
        assert_eq!(v.reserved_bytes(), PAGE);

        v.free(a, PAGE).unwrap();
        assert_eq!(v.free(a, PAGE), Err(HeapError::UnknownAddress(a)));
        assert_eq!(v.reserved_bytes(), 0);
        assert!(v.pages().is_empty());
    }
}
