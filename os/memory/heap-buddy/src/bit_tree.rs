//! Complete binary tree of two-bit slot states, stored level by level.
//!
//! Level 0 is the root; the leaf level holds one slot per page. Each node
//! records whether some, and whether all, of the pages below it are allocated.

use crate::{BuddyError, MAX_SLOTS};
use alloc::vec;
use alloc::vec::Vec;
use bitfield_struct::bitfield;

const WORD_BITS: usize = u64::BITS as usize;

/// Selects one of the two state bits stored per slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TreeBit {
    /// At least one page in the subtree is allocated.
    SomeAllocated = 0,
    /// Every page in the subtree is allocated.
    AllAllocated = 1,
}

/// Both state bits of a slot, decoded.
///
/// For a leaf (a single page) the two bits are always equal.
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct SlotState {
    /// **Some allocated** (bit 0).
    pub some_allocated: bool,
    /// **All allocated** (bit 1).
    pub all_allocated: bool,
    #[bits(6)]
    __: u8,
}

impl SlotState {
    /// Neither bit set: the whole subtree is free.
    pub const FREE: Self = Self::new();
    /// Both bits set: the whole subtree is allocated.
    pub const ALLOCATED: Self = Self::from_bits(0b11);

    /// Combines two sibling states into their parent's state.
    #[inline]
    #[must_use]
    pub const fn merge(left: Self, right: Self) -> Self {
        Self::new()
            .with_some_allocated(left.some_allocated() || right.some_allocated())
            .with_all_allocated(left.all_allocated() && right.all_allocated())
    }

    /// The subtree is uniformly in the given state.
    #[inline]
    #[must_use]
    pub const fn is_uniform(self, allocated: bool) -> bool {
        if allocated {
            self.all_allocated()
        } else {
            !self.some_allocated()
        }
    }
}

/// Flat, bit-packed storage for a complete binary tree over `2^k` slots.
///
/// Nodes are laid out in breadth-first order, so the slots of one level are
/// contiguous: node `(level, slot)` lives at `2^level - 1 + slot`, and its two
/// state bits at `2 * node + bit`.
///
/// This type does not maintain any relation between levels. It is plain
/// storage; [`BuddyPageAllocator`](crate::BuddyPageAllocator) keeps parents in
/// sync with their children.
#[derive(Clone)]
pub struct BitTree {
    levels: u32,
    words: Vec<u64>,
}

impl BitTree {
    /// Creates an all-free tree over `num_slots` leaves.
    ///
    /// # Errors
    /// `num_slots` must be a non-zero power of two no larger than [`MAX_SLOTS`].
    pub fn new(num_slots: u32) -> Result<Self, BuddyError> {
        if !num_slots.is_power_of_two() {
            return Err(BuddyError::NotPowerOfTwo(num_slots));
        }
        if num_slots > MAX_SLOTS {
            return Err(BuddyError::TooLarge(num_slots));
        }

        let levels = num_slots.trailing_zeros() + 1;
        let nodes = (2 * num_slots as usize) - 1;
        let words = (2 * nodes).div_ceil(WORD_BITS);
        Ok(Self {
            levels,
            words: vec![0; words],
        })
    }

    /// `log2(num_slots) + 1`.
    #[inline]
    #[must_use]
    pub const fn num_levels(&self) -> u32 {
        self.levels
    }

    /// Number of leaves.
    #[inline]
    #[must_use]
    pub const fn num_slots(&self) -> u32 {
        1 << (self.levels - 1)
    }

    /// The deepest level, whose slots are single pages.
    #[inline]
    #[must_use]
    pub const fn leaf_level(&self) -> u32 {
        self.levels - 1
    }

    #[inline]
    fn node(&self, level: u32, slot: u32) -> usize {
        debug_assert!(level < self.levels, "level {level} out of range");
        debug_assert!(slot < (1 << level), "slot {slot} out of range at level {level}");
        ((1usize << level) - 1) + slot as usize
    }

    #[inline]
    #[must_use]
    pub fn get(&self, level: u32, slot: u32, bit: TreeBit) -> bool {
        let index = 2 * self.node(level, slot) + bit as usize;
        self.words[index / WORD_BITS] & (1 << (index % WORD_BITS)) != 0
    }

    #[inline]
    pub fn set(&mut self, level: u32, slot: u32, bit: TreeBit, value: bool) {
        let index = 2 * self.node(level, slot) + bit as usize;
        let mask = 1 << (index % WORD_BITS);
        if value {
            self.words[index / WORD_BITS] |= mask;
        } else {
            self.words[index / WORD_BITS] &= !mask;
        }
    }

    /// Reads both bits of a slot at once.
    #[inline]
    #[must_use]
    pub fn state(&self, level: u32, slot: u32) -> SlotState {
        // Both bits share a word: the pair starts on an even bit.
        let index = 2 * self.node(level, slot);
        let pair = (self.words[index / WORD_BITS] >> (index % WORD_BITS)) & 0b11;
        #[allow(clippy::cast_possible_truncation)]
        SlotState::from_bits(pair as u8)
    }

    #[inline]
    pub fn set_state(&mut self, level: u32, slot: u32, state: SlotState) {
        let index = 2 * self.node(level, slot);
        let shift = index % WORD_BITS;
        let word = &mut self.words[index / WORD_BITS];
        *word = (*word & !(0b11 << shift)) | (u64::from(state.into_bits() & 0b11) << shift);
    }

    /// Sets `count` consecutive slots of one level to all-free or all-allocated.
    pub fn fill(&mut self, level: u32, first_slot: u32, count: u32, allocated: bool) {
        if count == 0 {
            return;
        }
        debug_assert!(u64::from(first_slot) + u64::from(count) <= 1 << level);

        let mut bit = 2 * self.node(level, first_slot);
        let end = bit + 2 * count as usize;
        while bit < end {
            let offset = bit % WORD_BITS;
            let take = (WORD_BITS - offset).min(end - bit);
            let mask = if take == WORD_BITS {
                u64::MAX
            } else {
                ((1u64 << take) - 1) << offset
            };

            let word = &mut self.words[bit / WORD_BITS];
            if allocated {
                *word |= mask;
            } else {
                *word &= !mask;
            }
            bit += take;
        }
    }

    /// Storage footprint in bytes.
    #[must_use]
    pub fn storage_bytes(&self) -> usize {
        self.words.len() * size_of::<u64>()
    }
}

impl core::fmt::Debug for BitTree {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BitTree")
            .field("levels", &self.levels)
            .field("slots", &self.num_slots())
            .field("root", &self.state(0, 0))
            .finish()
    }
}
