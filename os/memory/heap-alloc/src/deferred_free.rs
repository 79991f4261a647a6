//! Frees that wait for the GPU.
//!
//! Blocks are queued under the fence value of the work that may still read
//! them and released once a completed fence at or past that value is seen.
//!
//! ```ignore
//! deferred.enqueue(block, gpu.current());
//! gpu.submit();
//! // later, once per frame
//! deferred.reap_from(&gpu)?;
//! ```

use crate::{Block, FenceSource, FenceValue, HeapError, PhysicalBacking, SmallBlockPool};
use heap_sync::SpinMutex;
use log::{debug, trace, warn};
use std::collections::BTreeMap;

/// Frees that must wait for the GPU.
///
/// Blocks are parked under the fence value current when they were released
/// and handed back to the [`SmallBlockPool`] (or through it to the
/// [`HeapManager`](crate::HeapManager)) only once the GPU has signaled that
/// fence. Until then the memory cannot be reused by any allocation.
///
/// ```text
///   enqueue(b1, 4)  enqueue(b2, 5)  enqueue(b3, 5)  enqueue(b4, 7)
///          |               \           /                 |
///   { 4: [b1],        5: [b2, b3],                  7: [b4] }
///
///   advance_and_reap(5)  -> frees b1, b2, b3       leaves { 7: [b4] }
/// ```
///
/// The queue's lock is never held while a block is freed, so reaping never
/// holds it together with a heap or size-class lock.
pub struct DeferredFreeQueue<'p, 'h, B: PhysicalBacking> {
    pool: &'p SmallBlockPool<'h, B>,
    pending: SpinMutex<BTreeMap<FenceValue, Vec<Block>>>,
}

impl<'p, 'h, B: PhysicalBacking> DeferredFreeQueue<'p, 'h, B> {
    #[must_use]
    pub const fn new(pool: &'p SmallBlockPool<'h, B>) -> Self {
        Self {
            pool,
            pending: SpinMutex::new(BTreeMap::new()),
        }
    }

    #[inline]
    #[must_use]
    pub const fn pool(&self) -> &'p SmallBlockPool<'h, B> {
        self.pool
    }

    /// Parks `block` until `fence` has completed. Null blocks are ignored.
    pub fn enqueue(&self, block: Block, fence: FenceValue) {
        if block.is_null() {
            return;
        }
        self.pending.lock().entry(fence).or_default().push(block);
        trace!("deferred free of {} at fence {fence}", block.address());
    }

    /// Frees every block whose fence is at or below `completed` and returns
    /// how many were freed.
    ///
    /// # Errors
    /// The first free that failed. Every ready block is still attempted; the
    /// ones that failed are not requeued.
    pub fn advance_and_reap(&self, completed: FenceValue) -> Result<usize, HeapError> {
        let ready = {
            let mut pending = self.pending.lock();
            match completed.as_u64().checked_add(1) {
                Some(next) => {
                    let later = pending.split_off(&FenceValue::new(next));
                    core::mem::replace(&mut *pending, later)
                }
                None => core::mem::take(&mut *pending),
            }
        };
        self.release(ready)
    }

    /// [`advance_and_reap`](Self::advance_and_reap) with the fence read from `source`.
    ///
    /// # Errors
    /// As for [`advance_and_reap`](Self::advance_and_reap).
    pub fn reap_from(&self, source: &impl FenceSource) -> Result<usize, HeapError> {
        self.advance_and_reap(source.completed())
    }

    /// Frees everything regardless of fence. Only valid once the GPU is idle.
    ///
    /// # Errors
    /// As for [`advance_and_reap`](Self::advance_and_reap).
    pub fn drain_all(&self) -> Result<usize, HeapError> {
        let all = core::mem::take(&mut *self.pending.lock());
        self.release(all)
    }

    fn release(&self, ready: BTreeMap<FenceValue, Vec<Block>>) -> Result<usize, HeapError> {
        let mut freed = 0;
        let mut first_error = None;
        for (fence, blocks) in ready {
            debug!("reaping {} blocks of fence {fence}", blocks.len());
            for block in blocks {
                match self.pool.free(block) {
                    Ok(()) => freed += 1,
                    Err(err) => {
                        warn!("deferred free of {} failed: {err}", block.address());
                        first_error.get_or_insert(err);
                    }
                }
            }
        }
        first_error.map_or(Ok(freed), Err)
    }

    #[must_use]
    pub fn pending_blocks(&self) -> usize {
        self.pending.lock().values().map(Vec::len).sum()
    }

    /// Padded bytes held back.
    #[must_use]
    pub fn pending_bytes(&self) -> u64 {
        self.pending
            .lock()
            .values()
            .flatten()
            .map(Block::padded_size)
            .sum()
    }

    /// Fence of the oldest bucket still waiting.
    #[must_use]
    pub fn oldest_fence(&self) -> Option<FenceValue> {
        self.pending.lock().keys().next().copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl<B: PhysicalBacking> Drop for DeferredFreeQueue<'_, '_, B> {
    fn drop(&mut self) {
        let pending = self.pending.get_mut();
        if !pending.is_empty() {
            let blocks: usize = pending.values().map(Vec::len).sum();
            warn!(
                "deferred free queue dropped with {blocks} blocks pending across {} fences",
                pending.len()
            );
        }
    }
}
