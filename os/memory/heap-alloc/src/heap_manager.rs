//! Heap manager: one virtual window per heap kind plus physical commit.
//!
//! An allocation reserves pages in the kind's [`VirtualAddressAllocator`] and
//! then commits them through the [`PhysicalBacking`], both under that kind's
//! ticket lock. When the commit runs out of physical memory the request is
//! retried once in the kind's fallback heap; every other failure is returned
//! as is, counted, and logged together with the full accounting report.
//!
//! Frees find the owning heap from the address alone and decommit before the
//! window pages are released.

use crate::report::{HeapKindReport, HeapReport};
use crate::{
    BackingError, BackingPolicy, HeapAddress, HeapConfig, HeapError, HeapKind, InitError,
    PhysicalBacking, VirtualAddressAllocator,
};
use core::ptr::NonNull;
use heap_sync::TicketMutex;
use log::{debug, error, info, trace, warn};

/// Page-granular allocation across all heap kinds.
///
/// Owns one [`VirtualAddressAllocator`] per heap kind plus its physical
/// accounting, each behind its own lock. The lock of a heap is held for the
/// whole reserve-then-commit (and decommit-then-release) sequence, so no
/// thread ever sees a window range that is reserved but not backed.
///
/// The manager is an ordinary value: construct it once, share it by
/// reference with everything that allocates, and drop it after the last
/// user is gone. Dropping releases every window.
///
/// ## Fallback
/// When a heap runs out of *physical* memory, the request is retried once
/// in [`HeapKind::fallback`]. The first heap's lock is released before the
/// fallback heap's lock is taken. Virtual exhaustion never falls back.
pub struct HeapManager<B: PhysicalBacking> {
    backing: B,
    config: HeapConfig,
    /// Indexed by [`HeapKind::index`].
    heaps: Vec<TicketMutex<HeapState>>,
}

struct HeapState {
    window: VirtualAddressAllocator,
    /// Bytes handed out and charged against the budget.
    in_use: u64,
    peak_in_use: u64,
    live: u64,
    /// Requests redirected to the fallback heap.
    fallbacks_out: u64,
    /// Requests served on behalf of another heap.
    fallbacks_in: u64,
    failures: u64,
}

impl HeapState {
    fn new(window: VirtualAddressAllocator) -> Self {
        Self {
            window,
            in_use: 0,
            peak_in_use: 0,
            live: 0,
            fallbacks_out: 0,
            fallbacks_in: 0,
            failures: 0,
        }
    }
}

impl<B: PhysicalBacking> HeapManager<B> {
    /// Reserves every heap window and pre-maps the frame buffer.
    ///
    /// # Errors
    /// An invalid configuration, or a backing that refuses a window. Windows
    /// reserved before the failure are released again.
    pub fn new(backing: B, config: HeapConfig) -> Result<Self, InitError> {
        config.validate()?;

        let mut heaps = Vec::with_capacity(HeapKind::COUNT);
        for kind in HeapKind::ALL {
            let window = VirtualAddressAllocator::new(kind, config.kind(kind))?;
            heaps.push(TicketMutex::new(HeapState::new(window)));
        }

        for (i, kind) in HeapKind::ALL.into_iter().enumerate() {
            if let Err(err) = Self::reserve(&backing, kind, &config) {
                for reserved in &HeapKind::ALL[..i] {
                    let window = config.kind(*reserved).window();
                    backing.release_window(*reserved, window.start, window.length);
                }
                return Err(err);
            }
        }

        Ok(Self {
            backing,
            config,
            heaps,
        })
    }

    fn reserve(backing: &B, kind: HeapKind, config: &HeapConfig) -> Result<(), InitError> {
        let window = config.kind(kind).window();
        backing
            .reserve_window(kind, window.start, window.length)
            .map_err(|reason| InitError::Reserve { kind, reason })?;

        if kind.policy() == BackingPolicy::PreMapped {
            if let Err(reason) = backing.commit(kind, window.start, window.length) {
                backing.release_window(kind, window.start, window.length);
                return Err(InitError::PreMap { kind, reason });
            }
        }

        info!(
            "{kind} heap: window {window}, {} byte pages, {:?}",
            config.kind(kind).page_size,
            kind.policy()
        );
        Ok(())
    }

    #[inline]
    #[must_use]
    pub const fn backing(&self) -> &B {
        &self.backing
    }

    #[inline]
    #[must_use]
    pub const fn config(&self) -> &HeapConfig {
        &self.config
    }

    #[inline]
    #[must_use]
    pub const fn page_size(&self, kind: HeapKind) -> u64 {
        self.config.kind(kind).page_size
    }

    /// The heap whose window contains `address`.
    #[must_use]
    pub fn kind_of(&self, address: HeapAddress) -> Option<HeapKind> {
        self.config.kind_of(address)
    }

    /// Host pointer for `address`, if the backing has addressable memory there.
    #[must_use]
    pub fn resolve(&self, address: HeapAddress) -> Option<NonNull<u8>> {
        self.backing.resolve(address)
    }

    /// Allocates `size` bytes, rounded up to whole pages of the heap that
    /// serves the request, aligned to `alignment` (zero or a power of two).
    ///
    /// Hard failures are logged together with the full [`report`](Self::report)
    /// before they are returned; callers are expected to treat them as fatal.
    ///
    /// # Errors
    /// - [`HeapError::OutOfVirtualAddressSpace`] if the window has no free
    ///   region large enough.
    /// - [`HeapError::OutOfPhysicalMemory`] if the heap and its fallback (if
    ///   any) are both out of physical memory.
    /// - [`HeapError::CommitFailed`] if the backing fails outright.
    /// - [`HeapError::InvalidSize`] / [`HeapError::InvalidAlignment`] for
    ///   malformed requests.
    pub fn allocate(&self, kind: HeapKind, size: u64, alignment: u64) -> Result<HeapAddress, HeapError> {
        match self.allocate_in(kind, size, alignment) {
            Ok(address) => Ok(address),
            Err(err) if err.is_physical_exhaustion() => {
                let Some(fallback) = kind.fallback() else {
                    return Err(self.fail(err));
                };

                warn!("{kind} heap out of physical memory for {size} bytes, trying {fallback}");
                self.heaps[kind.index()].lock().fallbacks_out += 1;

                match self.allocate_in(fallback, size, alignment) {
                    Ok(address) => {
                        self.heaps[fallback.index()].lock().fallbacks_in += 1;
                        Ok(address)
                    }
                    Err(err) => Err(self.fail(err)),
                }
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// [`allocate`](Self::allocate), aborting the process on any failure.
    #[must_use]
    pub fn allocate_or_abort(&self, kind: HeapKind, size: u64, alignment: u64) -> HeapAddress {
        match self.allocate(kind, size, alignment) {
            Ok(address) => address,
            Err(err) => {
                error!("unrecoverable heap failure, aborting: {err}");
                std::process::abort()
            }
        }
    }

    /// Returns an allocation. `size` must be the size passed to
    /// [`allocate`](Self::allocate); the owning heap is found from the
    /// address alone.
    ///
    /// # Errors
    /// - [`HeapError::UnknownAddress`] if no window contains the range.
    /// - [`HeapError::DecommitFailed`] if the backing could not release the
    ///   memory. The range then stays reserved.
    pub fn free(&self, address: HeapAddress, size: u64) -> Result<(), HeapError> {
        let kind = self
            .kind_of(address)
            .ok_or(HeapError::UnknownAddress(address))?;

        self.free_in(kind, address, size)
            .map_err(|err| self.fail(err))
    }

    fn allocate_in(&self, kind: HeapKind, size: u64, alignment: u64) -> Result<HeapAddress, HeapError> {
        let size = self.round_to_pages(kind, size)?;
        let budget = self.config.kind(kind).physical_budget;

        let mut guard = self.heaps[kind.index()].lock();
        let heap = &mut *guard;
        let address = heap.window.allocate(size, alignment)?;

        let over_budget = budget.is_some_and(|b| heap.in_use + size > b);
        let committed = if over_budget {
            Err(BackingError::Exhausted)
        } else if kind.policy() == BackingPolicy::PreMapped {
            Ok(())
        } else {
            self.backing.commit(kind, address, size)
        };

        if let Err(reason) = committed {
            let rollback = heap.window.free(address, size);
            debug_assert!(rollback.is_ok(), "releasing a fresh reservation failed: {rollback:?}");
            return Err(match reason {
                BackingError::Exhausted => HeapError::OutOfPhysicalMemory {
                    kind,
                    requested: size,
                },
                reason => HeapError::CommitFailed { kind, reason },
            });
        }

        heap.in_use += size;
        heap.peak_in_use = heap.peak_in_use.max(heap.in_use);
        heap.live += 1;
        trace!("{kind} heap: allocated {size} bytes at {address}");
        Ok(address)
    }

    fn free_in(&self, kind: HeapKind, address: HeapAddress, size: u64) -> Result<(), HeapError> {
        let size = self.round_to_pages(kind, size)?;

        let mut guard = self.heaps[kind.index()].lock();
        let heap = &mut *guard;
        if !heap.window.pages_allocated(address, size)? {
            return Err(HeapError::UnknownAddress(address));
        }

        if kind.policy() != BackingPolicy::PreMapped {
            self.backing
                .decommit(kind, address, size)
                .map_err(|reason| HeapError::DecommitFailed { kind, reason })?;
        }
        heap.window.free(address, size)?;

        heap.in_use -= size;
        heap.live -= 1;
        trace!("{kind} heap: freed {size} bytes at {address}");
        Ok(())
    }

    fn round_to_pages(&self, kind: HeapKind, size: u64) -> Result<u64, HeapError> {
        if size == 0 {
            return Err(HeapError::InvalidSize(size));
        }
        let page = self.page_size(kind);
        size.checked_next_multiple_of(page)
            .ok_or(HeapError::InvalidSize(size))
    }

    /// Counts and logs a hard failure, with the full report for failures
    /// tied to a heap.
    fn fail(&self, err: HeapError) -> HeapError {
        match err.kind() {
            Some(kind) => {
                self.heaps[kind.index()].lock().failures += 1;
                error!("{err}");
                error!("heap accounting at failure:\n{}", self.report());
            }
            None => error!("{err}"),
        }
        err
    }

    /// Snapshot of every heap's accounting. Heaps are locked one at a time,
    /// so the snapshot is not atomic across heaps.
    #[must_use]
    pub fn report(&self) -> HeapReport {
        HeapReport::new(HeapKind::ALL.map(|kind| {
            let heap = self.heaps[kind.index()].lock();
            let config = self.config.kind(kind);
            let pages = heap.window.pages();
            HeapKindReport {
                kind,
                window: config.window(),
                page_size: config.page_size,
                reserved_bytes: heap.window.reserved_bytes(),
                in_use_bytes: heap.in_use,
                peak_in_use_bytes: heap.peak_in_use,
                committed_bytes: match kind.policy() {
                    BackingPolicy::PreMapped => config.window_size,
                    BackingPolicy::Pooled | BackingPolicy::OsManaged => heap.in_use,
                },
                physical_budget: config.physical_budget,
                free_bytes: heap.window.free_bytes(),
                free_runs: pages.free_run_count(),
                largest_free_run_bytes: u64::from(pages.largest_free_run()) * config.page_size,
                live_allocations: heap.live,
                fallbacks_out: heap.fallbacks_out,
                fallbacks_in: heap.fallbacks_in,
                failures: heap.failures,
                lock_contention: self.heaps[kind.index()].contended(),
            }
        }))
    }
}

impl<B: PhysicalBacking> Drop for HeapManager<B> {
    fn drop(&mut self) {
        for kind in HeapKind::ALL {
            let heap = self.heaps[kind.index()].get_mut();
            if heap.live > 0 {
                warn!(
                    "{kind} heap: {} allocations ({} bytes) still live at teardown",
                    heap.live, heap.in_use
                );
            }
            let window = self.config.kind(kind).window();
            self.backing.release_window(kind, window.start, window.length);
            debug!("{kind} heap: window {window} released");
        }
        info!("heap manager torn down");
    }
}
