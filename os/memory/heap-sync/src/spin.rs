use crate::{Backoff, RawLock};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Unfair test-and-test-and-set lock for short list manipulations.
///
/// Waiters poll with a plain load under [`Backoff`] and only retry the
/// compare-exchange once the lock looks free.
#[derive(Debug)]
pub struct RawSpin {
    held: AtomicBool,
    contended: AtomicUsize,
}

unsafe impl RawLock for RawSpin {
    const INIT: Self = Self {
        held: AtomicBool::new(false),
        contended: AtomicUsize::new(0),
    };

    fn lock(&self) {
        if self.try_lock() {
            return;
        }
        self.contended.fetch_add(1, Ordering::Relaxed);

        let mut backoff = Backoff::new();
        loop {
            while self.held.load(Ordering::Relaxed) {
                backoff.snooze();
            }
            if self.try_lock() {
                return;
            }
        }
    }

    #[inline]
    fn try_lock(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    #[inline]
    unsafe fn unlock(&self) {
        self.held.store(false, Ordering::Release);
    }

    fn contended(&self) -> usize {
        self.contended.load(Ordering::Relaxed)
    }
}
