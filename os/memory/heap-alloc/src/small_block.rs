//! Pooled sub-page allocator for small blocks.
//!
//! Requests are rounded up to a power-of-two size class. Each class keeps a
//! list of whole heap pages, and each page tracks its blocks with its own
//! [`BuddyPageAllocator`](heap_buddy::BuddyPageAllocator) where one slot is
//! one block. Pages stay with their class until the pool is dropped.
//! Requests larger than the biggest class are served as whole pages.

use crate::{
    ConfigError, HeapAddress, HeapError, HeapKind, HeapManager, PhysicalBacking, SmallBlockConfig,
};
use core::ptr::NonNull;
use heap_buddy::BuddyPageAllocator;
use heap_sync::SpinMutex;
use log::{debug, trace, warn};
use std::collections::VecDeque;

/// Handle to a sub-page (or whole-page) allocation.
///
/// A block with `padded_size == 0` is the "no allocation" sentinel returned
/// for zero-sized requests; freeing it does nothing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Block {
    address: HeapAddress,
    requested_size: u64,
    padded_size: u64,
    page: Option<PageRef>,
    kind: HeapKind,
}

/// Back-reference from a block to the pool page it was carved from.
///
/// Not ownership: the page belongs to its size class for the pool's lifetime.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct PageRef {
    class: u32,
    index: u32,
}

impl Block {
    #[must_use]
    pub const fn null(kind: HeapKind) -> Self {
        Self {
            address: HeapAddress::NULL,
            requested_size: 0,
            padded_size: 0,
            page: None,
            kind,
        }
    }

    /// Wraps a whole-page allocation made directly on the [`HeapManager`],
    /// so it can go through the same free paths as pool blocks.
    #[must_use]
    pub const fn whole_pages(address: HeapAddress, size: u64, kind: HeapKind) -> Self {
        Self {
            address,
            requested_size: size,
            padded_size: size,
            page: None,
            kind,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_null(&self) -> bool {
        self.padded_size == 0
    }

    #[inline]
    #[must_use]
    pub const fn address(&self) -> HeapAddress {
        self.address
    }

    #[inline]
    #[must_use]
    pub const fn requested_size(&self) -> u64 {
        self.requested_size
    }

    /// The size class, or the page-rounded size for whole-page blocks.
    #[inline]
    #[must_use]
    pub const fn padded_size(&self) -> u64 {
        self.padded_size
    }

    #[inline]
    #[must_use]
    pub const fn page(&self) -> Option<PageRef> {
        self.page
    }

    /// The heap the block was requested from.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> HeapKind {
        self.kind
    }
}

struct SmallBlockPage {
    base: HeapAddress,
    blocks: BuddyPageAllocator,
    linked: bool,
}

struct SizeClass {
    block_size: u64,
    /// Every page ever created for this class; [`PageRef::index`] points here.
    pages: Vec<SmallBlockPage>,
    /// Pages with spare capacity, most recently refilled first.
    free: VecDeque<u32>,
}

impl SizeClass {
    const fn new(block_size: u64) -> Self {
        Self {
            block_size,
            pages: Vec::new(),
            free: VecDeque::new(),
        }
    }

    fn live_blocks(&self) -> u64 {
        self.pages
            .iter()
            .map(|p| u64::from(p.blocks.allocated_count()))
            .sum()
    }
}

/// Occupancy of one `(heap kind, size class)` list.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ClassStats {
    pub kind: HeapKind,
    pub block_size: u64,
    pub pages: usize,
    /// Pages currently linked as having spare capacity.
    pub pages_with_space: usize,
    pub live_blocks: u64,
}

/// Fixed-size block sub-allocator on top of whole heap pages.
///
/// Requests up to [`SmallBlockConfig::max_block_size`] are rounded to a
/// power-of-two size class and carved from pool pages; each page tracks its
/// blocks in its own [`BuddyPageAllocator`] with one block per slot. Larger
/// requests are served as whole pages by the [`HeapManager`].
///
/// Every `(heap kind, size class)` has its own lock and free list. A page is
/// linked while it has spare blocks; a page that fills up is unlinked, and is
/// relinked at the head when one of its blocks is freed.
///
/// Pool pages are kept for the pool's lifetime even when they become empty.
/// This caps the waste at roughly one idle page per size class ever used per
/// heap kind. Pages go back to the heap manager only when the pool is dropped.
pub struct SmallBlockPool<'h, B: PhysicalBacking> {
    heaps: &'h HeapManager<B>,
    config: SmallBlockConfig,
    /// `kind.index() * class_count + class`
    classes: Vec<SpinMutex<SizeClass>>,
}

impl<'h, B: PhysicalBacking> SmallBlockPool<'h, B> {
    /// # Errors
    /// The pool geometry is invalid, or its page size is not a multiple of
    /// some heap's page size.
    pub fn new(heaps: &'h HeapManager<B>, config: SmallBlockConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        if HeapKind::ALL
            .iter()
            .any(|kind| !config.page_size.is_multiple_of(heaps.page_size(*kind)))
        {
            return Err(ConfigError::PoolPageTooSmall);
        }

        let class_count = config.class_count();
        let classes = HeapKind::ALL
            .iter()
            .flat_map(|_| 0..class_count)
            .map(|class| SpinMutex::new(SizeClass::new(SmallBlockConfig::MIN_BLOCK_SIZE << class)))
            .collect();

        Ok(Self {
            heaps,
            config,
            classes,
        })
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> &SmallBlockConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub const fn heaps(&self) -> &'h HeapManager<B> {
        self.heaps
    }

    /// The class a request of `size` bytes lands in, or `None` above the ceiling.
    #[must_use]
    pub const fn size_class(&self, size: u64) -> Option<u64> {
        if size > self.config.max_block_size {
            return None;
        }
        let size = if size < SmallBlockConfig::MIN_BLOCK_SIZE {
            SmallBlockConfig::MIN_BLOCK_SIZE
        } else {
            size
        };
        Some(size.next_power_of_two())
    }

    const fn class_index(block_size: u64) -> u32 {
        block_size.trailing_zeros() - SmallBlockConfig::MIN_BLOCK_SIZE.trailing_zeros()
    }

    fn class(&self, kind: HeapKind, class: u32) -> Option<&SpinMutex<SizeClass>> {
        let class = usize::try_from(class).ok()?;
        if class >= self.config.class_count() {
            return None;
        }
        self.classes
            .get(kind.index() * self.config.class_count() + class)
    }

    /// Allocates `size` bytes visible to `kind`.
    ///
    /// # Errors
    /// Whatever [`HeapManager::allocate`] reports when a new pool page (or a
    /// whole-page block) cannot be obtained.
    pub fn allocate(&self, size: u64, kind: HeapKind) -> Result<Block, HeapError> {
        if size == 0 {
            return Ok(Block::null(kind));
        }

        let Some(block_size) = self.size_class(size) else {
            let address = self.heaps.allocate(kind, size, 0)?;
            let owner = self.heaps.kind_of(address).unwrap_or(kind);
            let padded = size.next_multiple_of(self.heaps.page_size(owner));
            trace!("{kind} pool: {size} bytes as whole pages at {address}");
            return Ok(Block {
                address,
                requested_size: size,
                padded_size: padded,
                page: None,
                kind,
            });
        };

        let class = Self::class_index(block_size);
        let list = self.class(kind, class).ok_or(HeapError::InvalidSize(size))?;
        let mut list = list.lock();

        let (index, slot) = loop {
            let Some(&index) = list.free.front() else {
                break self.grow(&mut list, kind)?;
            };
            let page = &mut list.pages[index as usize];
            match page.blocks.allocate_pages(1, 1) {
                Some(slot) => {
                    if page.blocks.is_full() {
                        page.linked = false;
                        list.free.pop_front();
                    }
                    break (index, slot);
                }
                None => {
                    // Full but still linked; drop it from the list and retry.
                    page.linked = false;
                    list.free.pop_front();
                }
            }
        };

        let address = list.pages[index as usize].base + u64::from(slot) * block_size;
        trace!("{kind} pool: {size} bytes in {block_size}-byte class at {address}");
        Ok(Block {
            address,
            requested_size: size,
            padded_size: block_size,
            page: Some(PageRef { class, index }),
            kind,
        })
    }

    /// Creates a page for the class and takes its first block.
    fn grow(&self, list: &mut SizeClass, kind: HeapKind) -> Result<(u32, u32), HeapError> {
        let page_size = self.config.page_size;
        let index = u32::try_from(list.pages.len()).map_err(|_| HeapError::InvalidSize(page_size))?;
        let slots = u32::try_from(page_size / list.block_size)
            .map_err(|_| HeapError::InvalidSize(list.block_size))?;
        let mut blocks = BuddyPageAllocator::new(slots).map_err(|_| HeapError::InvalidSize(list.block_size))?;

        let base = self.heaps.allocate(kind, page_size, page_size)?;
        let slot = blocks.allocate_pages(1, 1).ok_or(HeapError::InvalidBlock)?;
        let linked = !blocks.is_full();
        debug!(
            "{kind} pool: page {index} for {}-byte blocks at {base} ({slots} blocks)",
            list.block_size
        );

        list.pages.push(SmallBlockPage {
            base,
            blocks,
            linked,
        });
        if linked {
            list.free.push_front(index);
        }
        Ok((index, slot))
    }

    /// Returns a block to its page, or whole-page blocks to the heap manager.
    ///
    /// # Errors
    /// - [`HeapError::InvalidBlock`] if the block's page reference or address
    ///   does not match a live block of this pool.
    /// - Whatever [`HeapManager::free`] reports for whole-page blocks.
    pub fn free(&self, block: Block) -> Result<(), HeapError> {
        if block.is_null() {
            return Ok(());
        }
        let Some(page_ref) = block.page else {
            return self.heaps.free(block.address, block.padded_size);
        };

        let list = self
            .class(block.kind, page_ref.class)
            .ok_or(HeapError::InvalidBlock)?;
        let mut list = list.lock();
        let block_size = list.block_size;
        if block.padded_size != block_size {
            return Err(HeapError::InvalidBlock);
        }

        let page_size = self.config.page_size;
        let page = list
            .pages
            .get_mut(page_ref.index as usize)
            .ok_or(HeapError::InvalidBlock)?;
        let slot = block
            .address
            .offset_from(page.base)
            .filter(|off| *off < page_size && off.is_multiple_of(block_size))
            .and_then(|off| u32::try_from(off / block_size).ok())
            .ok_or(HeapError::InvalidBlock)?;
        if !page.blocks.is_range_allocated(slot, 1) {
            return Err(HeapError::InvalidBlock);
        }

        page.blocks.free_pages(slot, 1);
        let relink = !page.linked;
        page.linked = true;
        if relink {
            list.free.push_front(page_ref.index);
        }
        trace!("{} pool: freed {block_size}-byte block at {}", block.kind, block.address);
        Ok(())
    }

    /// Host pointer to the block's memory, if the backing has one.
    #[must_use]
    pub fn resolve(&self, block: &Block) -> Option<NonNull<u8>> {
        if block.is_null() {
            return None;
        }
        self.heaps.resolve(block.address)
    }

    /// Occupancy of every class that has at least one page.
    #[must_use]
    pub fn stats(&self) -> Vec<ClassStats> {
        let class_count = self.config.class_count();
        self.classes
            .iter()
            .enumerate()
            .filter_map(|(i, list)| {
                let list = list.lock();
                if list.pages.is_empty() {
                    return None;
                }
                Some(ClassStats {
                    kind: HeapKind::ALL[i / class_count],
                    block_size: list.block_size,
                    pages: list.pages.len(),
                    pages_with_space: list.free.len(),
                    live_blocks: list.live_blocks(),
                })
            })
            .collect()
    }

    /// Pages retained for the class serving `size` bytes in `kind`.
    #[must_use]
    pub fn page_count(&self, kind: HeapKind, size: u64) -> usize {
        self.size_class(size)
            .and_then(|block_size| self.class(kind, Self::class_index(block_size)))
            .map_or(0, |list| list.lock().pages.len())
    }
}

impl<B: PhysicalBacking> Drop for SmallBlockPool<'_, B> {
    fn drop(&mut self) {
        let page_size = self.config.page_size;
        for list in &mut self.classes {
            let list = list.get_mut();
            let live = list.live_blocks();
            if live > 0 {
                warn!(
                    "pool teardown with {live} live {}-byte blocks; their memory goes away with the page",
                    list.block_size
                );
            }
            for page in list.pages.drain(..) {
                if let Err(err) = self.heaps.free(page.base, page_size) {
                    warn!("pool teardown: returning page {} failed: {err}", page.base);
                }
            }
            list.free.clear();
        }
    }
}
