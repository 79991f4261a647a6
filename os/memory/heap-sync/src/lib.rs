//! # Heap synchronization primitives
//!
//! Every public entry point of the heap subsystem is a blocking, thread-safe
//! call. The locks in this crate are what makes that true:
//!
//! | Lock | Used for |
//! |------|----------|
//! | [`TicketMutex`] | One per heap kind; held across virtual reservation **and** physical commit. |
//! | [`SpinMutex`] | One per `(heap kind, size class)` free list, the deferred-free queue and the backings' bookkeeping. |
//!
//! Ticket locks are FIFO-fair, which keeps a render thread from starving
//! behind a burst of worker-pool allocations on the same heap.
//!
//! Critical sections can be long: the heap lock covers a host `mprotect`, and
//! a size-class lock covers the heap call that creates a new pool page. A
//! waiter therefore spins only briefly with exponential [`Backoff`] and then
//! yields its time slice to the scheduler instead of burning the core.
//!
//! Both locks count acquisitions that had to wait; the heap accounting report
//! shows the count per heap kind.

#![allow(unsafe_code)]

mod backoff;
mod mutex;
mod spin;
mod ticket;

pub use backoff::Backoff;
pub use mutex::{Mutex, MutexGuard};
pub use spin::RawSpin;
pub use ticket::RawTicket;

pub type SpinMutex<T> = Mutex<T, RawSpin>;
pub type TicketMutex<T> = Mutex<T, RawTicket>;

/// A lock that guards no data of its own.
///
/// # Safety
/// Once [`lock`](Self::lock) returns, or [`try_lock`](Self::try_lock)
/// returns `true`, no other caller may acquire the lock until
/// [`unlock`](Self::unlock) is called.
pub unsafe trait RawLock {
    /// An unlocked lock.
    const INIT: Self;

    fn lock(&self);

    fn try_lock(&self) -> bool;

    /// # Safety
    /// The caller holds the lock.
    unsafe fn unlock(&self);

    /// Acquisitions that found the lock already held.
    fn contended(&self) -> usize;
}
