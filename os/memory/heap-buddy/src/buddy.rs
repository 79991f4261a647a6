//! Page allocator over a [`BitTree`].
//!
//! Searches descend from the root and skip subtrees that are already fully
//! allocated. Frees and claims mark arbitrary page ranges by splitting them
//! into the largest aligned chunks and fixing the parents of each.

use crate::{BitTree, BuddyError, SlotState};

/// A maximal run of pages sharing one allocation state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct RegionBounds {
    pub first: u32,
    pub count: u32,
    pub allocated: bool,
}

impl RegionBounds {
    /// One past the last page of the run.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u32 {
        self.first + self.count
    }
}

/// Page allocator over a [`BitTree`].
///
/// Requests are served from naturally aligned power-of-two blocks: the search
/// looks for a completely free block of `next_pow2(max(count, alignment))`
/// pages, preferring the left (lower) half at every level. Only the `count`
/// requested pages are marked; the remainder of the block stays available.
///
/// Arbitrary `(first, count)` ranges are marked by splitting them into maximal
/// power-of-two chunks, each bounded by the alignment of its start page, and
/// assigning each chunk's subtree directly.
#[derive(Debug, Clone)]
pub struct BuddyPageAllocator {
    tree: BitTree,
    allocated: u32,
}

impl BuddyPageAllocator {
    /// Creates an allocator with every page free.
    ///
    /// # Errors
    /// See [`BitTree::new`].
    pub fn new(num_pages: u32) -> Result<Self, BuddyError> {
        Ok(Self {
            tree: BitTree::new(num_pages)?,
            allocated: 0,
        })
    }

    #[inline]
    #[must_use]
    pub const fn num_pages(&self) -> u32 {
        self.tree.num_slots()
    }

    #[inline]
    #[must_use]
    pub const fn allocated_count(&self) -> u32 {
        self.allocated
    }

    #[inline]
    #[must_use]
    pub const fn free_count(&self) -> u32 {
        self.num_pages() - self.allocated
    }

    #[inline]
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.tree.state(0, 0).all_allocated()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.tree.state(0, 0).some_allocated()
    }

    /// Read-only view of the underlying tree.
    #[inline]
    #[must_use]
    pub const fn tree(&self) -> &BitTree {
        &self.tree
    }

    /// Finds and marks `count` pages starting on a multiple of `alignment`.
    ///
    /// Returns the first page index, or `None` if no free block of
    /// `next_pow2(max(count, alignment))` pages exists. `alignment` is
    /// rounded up to a power of two; zero counts never succeed.
    pub fn allocate_pages(&mut self, count: u32, alignment: u32) -> Option<u32> {
        if count == 0 || count > self.num_pages() {
            return None;
        }

        let block = count.max(alignment).checked_next_power_of_two()?;
        if block > self.num_pages() {
            return None;
        }

        let target_level = self.tree.leaf_level() - block.trailing_zeros();
        let slot = self.find_free(0, 0, target_level)?;
        let first = slot << block.trailing_zeros();

        self.mark(first, count, true);
        self.allocated += count;
        Some(first)
    }

    /// Marks `[first, first + count)` free again.
    ///
    /// The range must be exactly a currently allocated range; this is checked
    /// in debug builds only.
    pub fn free_pages(&mut self, first: u32, count: u32) {
        if count == 0 {
            return;
        }
        let in_range = first
            .checked_add(count)
            .is_some_and(|end| end <= self.num_pages());
        debug_assert!(in_range, "free of pages {first}+{count} outside the tree");
        if !in_range {
            return;
        }
        let allocated = self.is_range_allocated(first, count);
        debug_assert!(
            allocated,
            "free of pages {first}+{count} that are not fully allocated"
        );
        if !allocated {
            return;
        }

        self.mark(first, count, false);
        self.allocated -= count;
    }

    /// Marks `[first, first + count)` allocated without searching.
    ///
    /// Used for ranges that are in use before the allocator takes over, such
    /// as pre-mapped memory. Returns `false` if any page is already taken.
    pub fn claim_pages(&mut self, first: u32, count: u32) -> bool {
        let in_range = first
            .checked_add(count)
            .is_some_and(|end| end <= self.num_pages());
        if count == 0 || !in_range || !self.is_range_free(first, count) {
            return false;
        }
        self.mark(first, count, true);
        self.allocated += count;
        true
    }

    /// `true` if every page in the range is allocated.
    #[must_use]
    pub fn is_range_allocated(&self, first: u32, count: u32) -> bool {
        Chunks::new(self.tree.leaf_level(), first, count)
            .all(|(level, slot)| self.tree.state(level, slot).all_allocated())
    }

    /// `true` if every page in the range is free.
    #[must_use]
    pub fn is_range_free(&self, first: u32, count: u32) -> bool {
        Chunks::new(self.tree.leaf_level(), first, count)
            .all(|(level, slot)| !self.tree.state(level, slot).some_allocated())
    }

    /// The maximal run of same-state pages containing `page`.
    ///
    /// # Panics
    /// If `page` is outside the tree.
    #[must_use]
    pub fn region_bounds(&self, page: u32) -> RegionBounds {
        assert!(page < self.num_pages(), "page {page} outside the tree");

        let leaf = self.tree.leaf_level();
        let allocated = self.tree.state(leaf, page).all_allocated();

        let (mut first, mut end) = self.uniform_block(page, allocated);
        while first > 0 && self.page_is(first - 1, allocated) {
            first = self.uniform_block(first - 1, allocated).0;
        }
        while end < self.num_pages() && self.page_is(end, allocated) {
            end = self.uniform_block(end, allocated).1;
        }

        RegionBounds {
            first,
            count: end - first,
            allocated,
        }
    }

    /// Iterates the alternating free / allocated runs from page 0 upward.
    #[must_use]
    pub const fn runs(&self) -> Runs<'_> {
        Runs {
            pages: self,
            next: 0,
        }
    }

    /// Number of disjoint free runs; `0` when full, `1` when empty.
    #[must_use]
    pub fn free_run_count(&self) -> usize {
        if self.is_full() {
            return 0;
        }
        if self.is_empty() {
            return 1;
        }
        self.runs().filter(|r| !r.allocated).count()
    }

    /// Largest free run in pages.
    #[must_use]
    pub fn largest_free_run(&self) -> u32 {
        if self.is_empty() {
            return self.num_pages();
        }
        self.runs()
            .filter(|r| !r.allocated)
            .map(|r| r.count)
            .max()
            .unwrap_or(0)
    }

    /// Left-first descent towards `target_level`, backing out of subtrees
    /// that are partially used but hold no fully free block of the needed size.
    fn find_free(&self, level: u32, slot: u32, target_level: u32) -> Option<u32> {
        let state = self.tree.state(level, slot);
        if state.all_allocated() {
            return None;
        }
        if !state.some_allocated() {
            return Some(slot << (target_level - level));
        }
        if level == target_level {
            return None;
        }

        self.find_free(level + 1, slot * 2, target_level)
            .or_else(|| self.find_free(level + 1, slot * 2 + 1, target_level))
    }

    fn mark(&mut self, first: u32, count: u32, allocated: bool) {
        for (level, slot) in Chunks::new(self.tree.leaf_level(), first, count) {
            self.assign_subtree(level, slot, allocated);
            self.fix_parents(level, slot);
        }
    }

    /// Sets every node below and including `(level, slot)`.
    fn assign_subtree(&mut self, level: u32, slot: u32, allocated: bool) {
        for depth in 0..self.tree.num_levels() - level {
            self.tree
                .fill(level + depth, slot << depth, 1 << depth, allocated);
        }
    }

    /// Recomputes ancestors from their children, stopping at the first
    /// ancestor whose state does not change.
    fn fix_parents(&mut self, mut level: u32, mut slot: u32) {
        while level > 0 {
            let parent = slot >> 1;
            let merged = SlotState::merge(
                self.tree.state(level, parent * 2),
                self.tree.state(level, parent * 2 + 1),
            );

            level -= 1;
            slot = parent;
            if self.tree.state(level, slot) == merged {
                break;
            }
            self.tree.set_state(level, slot, merged);
        }
    }

    #[inline]
    fn page_is(&self, page: u32, allocated: bool) -> bool {
        self.tree.state(self.tree.leaf_level(), page).all_allocated() == allocated
    }

    /// Largest aligned uniform block containing `page`, found by climbing
    /// while the sibling subtree is in the same state. Returns `[first, end)`.
    fn uniform_block(&self, page: u32, allocated: bool) -> (u32, u32) {
        let mut level = self.tree.leaf_level();
        let mut slot = page;
        while level > 0 && self.tree.state(level, slot ^ 1).is_uniform(allocated) {
            level -= 1;
            slot >>= 1;
        }

        let order = self.tree.leaf_level() - level;
        let first = slot << order;
        (first, first + (1 << order))
    }
}

/// Splits `[first, first + count)` into maximal naturally aligned
/// power-of-two chunks, yielding the `(level, slot)` node of each.
struct Chunks {
    leaf_level: u32,
    page: u32,
    remaining: u32,
}

impl Chunks {
    const fn new(leaf_level: u32, first: u32, count: u32) -> Self {
        Self {
            leaf_level,
            page: first,
            remaining: count,
        }
    }
}

impl Iterator for Chunks {
    type Item = (u32, u32);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let align_order = self.page.trailing_zeros();
        let size_order = u32::BITS - 1 - self.remaining.leading_zeros();
        let order = align_order.min(size_order).min(self.leaf_level);

        let item = (self.leaf_level - order, self.page >> order);
        self.page += 1 << order;
        self.remaining -= 1 << order;
        Some(item)
    }
}

/// Iterator returned by [`BuddyPageAllocator::runs`].
pub struct Runs<'a> {
    pages: &'a BuddyPageAllocator,
    next: u32,
}

impl Iterator for Runs<'_> {
    type Item = RegionBounds;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.pages.num_pages() {
            return None;
        }
        let run = self.pages.region_bounds(self.next);
        self.next = run.end();
        Some(run)
    }
}
