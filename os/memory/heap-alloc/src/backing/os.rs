use crate::{BackingError, HeapAddress, HeapKind, PhysicalBacking};
use core::ptr::{NonNull, null_mut};
use heap_sync::SpinMutex;
use log::{debug, warn};

/// Host virtual memory as the physical pool.
///
/// Each heap window becomes one `PROT_NONE` anonymous mapping reserved with
/// `MAP_NORESERVE`, so untouched windows cost no memory. Commit makes a range
/// readable and writable; decommit drops its pages and protects it again.
///
/// Heap addresses are translated to host pointers by their offset into the
/// window; this is the only place that happens.
pub struct OsBacking {
    windows: SpinMutex<[Option<Mapping>; HeapKind::COUNT]>,
}

#[derive(Copy, Clone)]
struct Mapping {
    base: HeapAddress,
    length: u64,
    host: usize,
}

impl Mapping {
    fn host_range(&self, address: HeapAddress, length: u64) -> Result<(*mut libc::c_void, usize), BackingError> {
        let offset = address
            .offset_from(self.base)
            .filter(|off| off.checked_add(length).is_some_and(|end| end <= self.length))
            .ok_or(BackingError::Failed("range outside the reserved window"))?;
        let offset = usize::try_from(offset).map_err(|_| BackingError::Failed("offset exceeds host address space"))?;
        let length = usize::try_from(length).map_err(|_| BackingError::Failed("length exceeds host address space"))?;
        Ok(((self.host + offset) as *mut libc::c_void, length))
    }
}

impl Default for OsBacking {
    fn default() -> Self {
        Self::new()
    }
}

impl OsBacking {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            windows: SpinMutex::new([None; HeapKind::COUNT]),
        }
    }

    /// Host page size; commit and decommit ranges must be multiples of it.
    #[must_use]
    pub fn host_page_size() -> u64 {
        // SAFETY: sysconf has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        u64::try_from(size).unwrap_or(4096)
    }

    fn mapping(&self, kind: HeapKind) -> Result<Mapping, BackingError> {
        self.windows.lock()[kind.index()].ok_or(BackingError::Failed("window not reserved"))
    }
}

fn last_os_error() -> BackingError {
    BackingError::Os(std::io::Error::last_os_error().raw_os_error().unwrap_or(0))
}

impl PhysicalBacking for OsBacking {
    fn reserve_window(&self, kind: HeapKind, base: HeapAddress, length: u64) -> Result<(), BackingError> {
        if !length.is_multiple_of(Self::host_page_size()) {
            return Err(BackingError::Failed("window is not a multiple of the host page size"));
        }
        let len = usize::try_from(length).map_err(|_| BackingError::Failed("window exceeds host address space"))?;

        let mut windows = self.windows.lock();
        if windows[kind.index()].is_some() {
            return Err(BackingError::Failed("window already reserved"));
        }

        // SAFETY: anonymous mapping at a kernel-chosen address; nothing else
        // observes the returned range until it is recorded below.
        let ptr = unsafe {
            libc::mmap(
                null_mut(),
                len,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(last_os_error());
        }

        debug!("{kind} window {base} reserved at host {ptr:p} ({length} bytes)");
        windows[kind.index()] = Some(Mapping {
            base,
            length,
            host: ptr as usize,
        });
        Ok(())
    }

    fn release_window(&self, kind: HeapKind, _base: HeapAddress, _length: u64) {
        let Some(mapping) = self.windows.lock()[kind.index()].take() else {
            return;
        };
        let Ok(len) = usize::try_from(mapping.length) else {
            return;
        };
        // SAFETY: exactly the mapping created in reserve_window, now forgotten.
        if unsafe { libc::munmap(mapping.host as *mut libc::c_void, len) } != 0 {
            warn!("{kind} window: munmap failed: {}", std::io::Error::last_os_error());
        }
    }

    fn commit(&self, kind: HeapKind, address: HeapAddress, length: u64) -> Result<(), BackingError> {
        let (ptr, len) = self.mapping(kind)?.host_range(address, length)?;
        // SAFETY: the range lies inside a live mapping owned by this backing.
        if unsafe { libc::mprotect(ptr, len, libc::PROT_READ | libc::PROT_WRITE) } != 0 {
            let err = std::io::Error::last_os_error();
            return Err(match err.raw_os_error() {
                Some(libc::ENOMEM) => BackingError::Exhausted,
                code => BackingError::Os(code.unwrap_or(0)),
            });
        }
        Ok(())
    }

    fn decommit(&self, kind: HeapKind, address: HeapAddress, length: u64) -> Result<(), BackingError> {
        let (ptr, len) = self.mapping(kind)?.host_range(address, length)?;
        // SAFETY: as in commit; the caller gave up every pointer into the range.
        unsafe {
            if libc::madvise(ptr, len, libc::MADV_DONTNEED) != 0 {
                return Err(last_os_error());
            }
            if libc::mprotect(ptr, len, libc::PROT_NONE) != 0 {
                return Err(last_os_error());
            }
        }
        Ok(())
    }

    fn resolve(&self, address: HeapAddress) -> Option<NonNull<u8>> {
        let windows = self.windows.lock();
        windows.iter().flatten().find_map(|m| {
            let (ptr, _) = m.host_range(address, 1).ok()?;
            NonNull::new(ptr.cast::<u8>())
        })
    }
}

impl Drop for OsBacking {
    fn drop(&mut self) {
        for kind in HeapKind::ALL {
            self.release_window(kind, HeapAddress::NULL, 0);
        }
    }
}
