use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// A point on the GPU's completed-work timeline.
///
/// Values only grow: the producer bumps the fence each time it hands work to
/// the GPU, and the GPU reports the highest fence it has finished.
/// [`FenceValue::ZERO`] is "before any work", so it is always complete.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FenceValue(u64);

impl FenceValue {
    pub const ZERO: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

}

impl fmt::Debug for FenceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fence({})", self.0)
    }
}

impl fmt::Display for FenceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<u64> for FenceValue {
    #[inline]
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Where the last completed fence is read from.
pub trait FenceSource {
    /// The highest fence the GPU has signaled.
    fn completed(&self) -> FenceValue;
}

impl<F: FenceSource + ?Sized> FenceSource for &F {
    fn completed(&self) -> FenceValue {
        (**self).completed()
    }
}

/// A fence timeline kept in two atomics, for tools and tests that play the
/// part of the GPU.
///
/// Recording starts at fence 1 while the completed fence starts at 0, so
/// nothing recorded is complete until it is signaled.
#[derive(Debug)]
pub struct AtomicFence {
    submitted: AtomicU64,
    completed: AtomicU64,
}

impl Default for AtomicFence {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicFence {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            submitted: AtomicU64::new(1),
            completed: AtomicU64::new(0),
        }
    }

    /// Fence value for work recorded now.
    #[must_use]
    pub fn current(&self) -> FenceValue {
        FenceValue(self.submitted.load(Ordering::Acquire))
    }

    /// Submits the current work and opens the next fence. Returns the
    /// fence of the submitted work.
    pub fn submit(&self) -> FenceValue {
        FenceValue(self.submitted.fetch_add(1, Ordering::AcqRel))
    }

    /// Marks everything up to `fence` as finished. Never moves backwards.
    pub fn signal(&self, fence: FenceValue) {
        self.completed.fetch_max(fence.0, Ordering::AcqRel);
    }
}

impl FenceSource for AtomicFence {
    fn completed(&self) -> FenceValue {
        FenceValue(self.completed.load(Ordering::Acquire))
    }
}
