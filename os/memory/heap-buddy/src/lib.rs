//! # Buddy page tracking
//!
//! Page-granular allocation state for one address window, kept in a
//! bit-packed binary tree rather than in free lists threaded through the
//! managed memory. The managed memory is never touched: the window may be
//! reserved but uncommitted, or not even addressable from this process.
//!
//! ```text
//! level 0            [            root            ]
//! level 1      [      0      ]        [      1      ]
//! level 2   [  0  ]   [  1  ]      [  2  ]   [  3  ]
//! level 3  [0] [1]   [2] [3]      [4] [5]   [6] [7]   <- pages
//! ```
//!
//! Every node stores two bits:
//!
//! | Bit | Meaning |
//! |-----|---------|
//! | [`TreeBit::SomeAllocated`] | at least one page below is allocated (OR of the children) |
//! | [`TreeBit::AllAllocated`] | every page below is allocated (AND of the children) |
//!
//! The tree lives in one flat word array indexed by `(level, slot)`; there are
//! no per-node objects. [`BitTree`] is the raw storage, [`BuddyPageAllocator`]
//! the only code that keeps the two bits consistent.
//!
//! ## Example
//! ```rust
//! use heap_buddy::BuddyPageAllocator;
//!
//! let mut pages = BuddyPageAllocator::new(8).unwrap();
//! let first = pages.allocate_pages(4, 1).unwrap();
//! assert_eq!(first, 0);
//! assert_eq!(pages.allocate_pages(2, 2), Some(4));
//! pages.free_pages(first, 4);
//! assert_eq!(pages.allocated_count(), 2);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod bit_tree;
mod buddy;

pub use bit_tree::{BitTree, SlotState, TreeBit};
pub use buddy::{BuddyPageAllocator, RegionBounds, Runs};

/// Largest page count a single tree can track.
pub const MAX_SLOTS: u32 = 1 << 30;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuddyError {
    #[error("slot count {0} is not a power of two")]
    NotPowerOfTwo(u32),
    #[error("slot count {0} exceeds the supported maximum")]
    TooLarge(u32),
}
