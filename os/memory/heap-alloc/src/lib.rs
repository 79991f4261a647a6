//! # Heap allocation core
//!
//! Address-space and physical-memory bookkeeping for a fixed set of heaps
//! shared by the CPU and the GPU.
//!
//! ```text
//!                     +-------------------+
//!   consumers ------> | DeferredFreeQueue | <---- completed fence (FenceSource)
//!       |             +-------------------+
//!       |                       | reap
//!       v                       v
//!   +--------------------------------+
//!   |         SmallBlockPool         |  8 B .. 1 MiB classes
//!   +--------------------------------+
//!       |  new pages / large blocks
//!       v
//!   +--------------------------------+
//!   |          HeapManager           |  lock per heap kind, fallback policy
//!   |  VirtualAddressAllocator x 5   |
//!   +--------------------------------+
//!       |  reserve / commit / decommit
//!       v
//!   PhysicalBacking (OsBacking, SimulatedBacking)
//! ```
//!
//! | Heap | Backing | Fallback |
//! |------|---------|----------|
//! | `Cpu` | pooled | none |
//! | `GpuPrimary` | pooled | `FrameBuffer` |
//! | `GpuCoherent` | pooled | `Flexible` |
//! | `FrameBuffer` | pre-mapped at construction | none |
//! | `Flexible` | OS-managed | none |
//!
//! Addresses are opaque [`HeapAddress`] values inside fixed windows (see
//! [`layout`]); only the backing turns them into host pointers.
//!
//! ## Example
//! ```rust
//! use heap_alloc::{
//!     DeferredFreeQueue, FenceValue, HeapConfig, HeapKind, HeapManager, SimulatedBacking,
//!     SmallBlockConfig, SmallBlockPool,
//! };
//!
//! let heaps = HeapManager::new(SimulatedBacking::new(), HeapConfig::default()).unwrap();
//! let pool = SmallBlockPool::new(&heaps, SmallBlockConfig::default()).unwrap();
//! let deferred = DeferredFreeQueue::new(&pool);
//!
//! let block = pool.allocate(256, HeapKind::GpuPrimary).unwrap();
//! deferred.enqueue(block, FenceValue::new(3));
//! assert_eq!(deferred.advance_and_reap(FenceValue::new(2)).unwrap(), 0);
//! assert_eq!(deferred.advance_and_reap(FenceValue::new(3)).unwrap(), 1);
//! ```

mod addresses;
mod backing;
mod config;
mod deferred_free;
mod error;
mod fence;
mod heap_kind;
mod heap_manager;
pub mod layout;
mod report;
mod small_block;
mod virtual_alloc;

pub use addresses::{AddressRange, HeapAddress};
#[cfg(unix)]
pub use backing::OsBacking;
pub use backing::{PhysicalBacking, SimulatedBacking};
pub use config::{ConfigError, HeapConfig, HeapKindConfig, SmallBlockConfig};
pub use deferred_free::DeferredFreeQueue;
pub use error::{BackingError, HeapError, InitError};
pub use fence::{AtomicFence, FenceSource, FenceValue};
pub use heap_kind::{BackingPolicy, HeapKind};
pub use heap_manager::HeapManager;
pub use report::{Bytes, HeapKindReport, HeapReport};
pub use small_block::{Block, ClassStats, PageRef, SmallBlockPool};
pub use virtual_alloc::VirtualAddressAllocator;
