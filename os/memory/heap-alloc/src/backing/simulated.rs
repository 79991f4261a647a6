use crate::{AddressRange, BackingError, HeapAddress, HeapKind, PhysicalBacking};
use core::ptr::NonNull;
use heap_sync::SpinMutex;
use std::collections::BTreeMap;

/// Bookkeeping-only backing with failure injection.
///
/// Tracks reserved windows and committed ranges per heap kind without
/// touching host memory, so [`resolve`](PhysicalBacking::resolve) always
/// returns `None`. Catches double commits and mismatched decommits.
pub struct SimulatedBacking {
    heaps: [SpinMutex<SimulatedHeap>; HeapKind::COUNT],
}

#[derive(Default)]
struct SimulatedHeap {
    window: Option<AddressRange>,
    /// start -> length
    committed: BTreeMap<u64, u64>,
    committed_bytes: u64,
    capacity: Option<u64>,
    exhausted: bool,
    fail_next_commit: bool,
    commits: u64,
}

impl Default for SimulatedBacking {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBacking {
    #[must_use]
    pub fn new() -> Self {
        Self {
            heaps: core::array::from_fn(|_| SpinMutex::new(SimulatedHeap::default())),
        }
    }

    /// Reports [`BackingError::Exhausted`] for every commit on `kind` while set.
    pub fn set_exhausted(&self, kind: HeapKind, exhausted: bool) {
        self.heaps[kind.index()].lock().exhausted = exhausted;
    }

    /// Limits the bytes committed at once on `kind`.
    pub fn set_capacity(&self, kind: HeapKind, capacity: Option<u64>) {
        self.heaps[kind.index()].lock().capacity = capacity;
    }

    /// Makes the next commit on `kind` fail with a hard error.
    pub fn fail_next_commit(&self, kind: HeapKind) {
        self.heaps[kind.index()].lock().fail_next_commit = true;
    }

    #[must_use]
    pub fn committed_bytes(&self, kind: HeapKind) -> u64 {
        self.heaps[kind.index()].lock().committed_bytes
    }

    /// Successful commits so far.
    #[must_use]
    pub fn commit_count(&self, kind: HeapKind) -> u64 {
        self.heaps[kind.index()].lock().commits
    }

    #[must_use]
    pub fn is_reserved(&self, kind: HeapKind) -> bool {
        self.heaps[kind.index()].lock().window.is_some()
    }

    /// `true` if exactly this range was committed and not yet decommitted.
    #[must_use]
    pub fn is_committed(&self, kind: HeapKind, address: HeapAddress, length: u64) -> bool {
        self.heaps[kind.index()]
            .lock()
            .committed
            .get(&address.as_u64())
            .is_some_and(|len| *len == length)
    }
}

impl PhysicalBacking for SimulatedBacking {
    fn reserve_window(&self, kind: HeapKind, base: HeapAddress, length: u64) -> Result<(), BackingError> {
        let mut heap = self.heaps[kind.index()].lock();
        if heap.window.is_some() {
            return Err(BackingError::Failed("window already reserved"));
        }
        heap.window = Some(AddressRange::new(base, length));
        Ok(())
    }

    fn release_window(&self, kind: HeapKind, _base: HeapAddress, _length: u64) {
        let mut heap = self.heaps[kind.index()].lock();
        heap.window = None;
        heap.committed.clear();
        heap.committed_bytes = 0;
    }

    fn commit(&self, kind: HeapKind, address: HeapAddress, length: u64) -> Result<(), BackingError> {
        let mut heap = self.heaps[kind.index()].lock();
        if !heap
            .window
            .is_some_and(|w| w.contains_range(address, length))
        {
            return Err(BackingError::Failed("commit outside the reserved window"));
        }
        if core::mem::take(&mut heap.fail_next_commit) {
            return Err(BackingError::Failed("injected commit failure"));
        }
        if heap.exhausted
            || heap
                .capacity
                .is_some_and(|cap| heap.committed_bytes + length > cap)
        {
            return Err(BackingError::Exhausted);
        }

        let start = address.as_u64();
        let overlaps = heap
            .committed
            .range(..start + length)
            .next_back()
            .is_some_and(|(s, l)| s + l > start);
        if overlaps {
            return Err(BackingError::Failed("range already committed"));
        }

        heap.committed.insert(start, length);
        heap.committed_bytes += length;
        heap.commits += 1;
        Ok(())
    }

    fn decommit(&self, kind: HeapKind, address: HeapAddress, length: u64) -> Result<(), BackingError> {
        let mut heap = self.heaps[kind.index()].lock();
        match heap.committed.get(&address.as_u64()) {
            Some(len) if *len == length => {
                heap.committed.remove(&address.as_u64());
                heap.committed_bytes -= length;
                Ok(())
            }
            _ => Err(BackingError::Failed("range was not committed")),
        }
    }

    fn resolve(&self, _address: HeapAddress) -> Option<NonNull<u8>> {
        None
    }
}
