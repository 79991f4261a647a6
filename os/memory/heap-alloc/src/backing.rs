//! Physical memory collaborator.
//!
//! The heap manager only chooses offsets inside windows; whether a window has
//! real memory behind it, and where that memory lives in this process, is up
//! to the [`PhysicalBacking`] it was built with.

#[cfg(unix)]
mod os;
mod simulated;

#[cfg(unix)]
pub use os::OsBacking;
pub use simulated::SimulatedBacking;

use crate::{BackingError, HeapAddress, HeapKind};
use core::ptr::NonNull;

/// Reserves windows and binds physical memory to ranges inside them.
///
/// Every method may be called concurrently for different heap kinds. For one
/// heap kind the heap manager serializes all calls under that heap's lock.
pub trait PhysicalBacking: Send + Sync {
    /// Called once per heap at construction, before any commit.
    ///
    /// # Errors
    /// The window cannot be reserved.
    fn reserve_window(&self, kind: HeapKind, base: HeapAddress, length: u64) -> Result<(), BackingError>;

    /// Called once per heap at teardown. Any still-committed range is dropped.
    fn release_window(&self, kind: HeapKind, base: HeapAddress, length: u64);

    /// Binds physical memory to `[address, address + length)`.
    ///
    /// # Errors
    /// [`BackingError::Exhausted`] when no memory is left; anything else is a
    /// hard failure.
    fn commit(&self, kind: HeapKind, address: HeapAddress, length: u64) -> Result<(), BackingError>;

    /// Unbinds a range previously committed with the same bounds.
    ///
    /// # Errors
    /// The backing could not release the memory.
    fn decommit(&self, kind: HeapKind, address: HeapAddress, length: u64) -> Result<(), BackingError>;

    /// Host pointer for a committed address, if this backing has one.
    fn resolve(&self, address: HeapAddress) -> Option<NonNull<u8>>;
}

impl<B: PhysicalBacking + ?Sized> PhysicalBacking for &B {
    fn reserve_window(&self, kind: HeapKind, base: HeapAddress, length: u64) -> Result<(), BackingError> {
        (**self).reserve_window(kind, base, length)
    }

    fn release_window(&self, kind: HeapKind, base: HeapAddress, length: u64) {
        (**self).release_window(kind, base, length);
    }

    fn commit(&self, kind: HeapKind, address: HeapAddress, length: u64) -> Result<(), BackingError> {
        (**self).commit(kind, address, length)
    }

    fn decommit(&self, kind: HeapKind, address: HeapAddress, length: u64) -> Result<(), BackingError> {
        (**self).decommit(kind, address, length)
    }

    fn resolve(&self, address: HeapAddress) -> Option<NonNull<u8>> {
        (**self).resolve(address)
    }
}
