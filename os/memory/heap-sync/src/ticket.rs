use crate::{Backoff, RawLock};
use core::sync::atomic::{AtomicUsize, Ordering};

/// FIFO ticket lock.
///
/// A waiter that is several tickets away from being served goes straight to
/// yielding; only the next in line keeps spinning.
#[derive(Debug)]
pub struct RawTicket {
    next: AtomicUsize,
    serving: AtomicUsize,
    contended: AtomicUsize,
}

unsafe impl RawLock for RawTicket {
    const INIT: Self = Self {
        next: AtomicUsize::new(0),
        serving: AtomicUsize::new(0),
        contended: AtomicUsize::new(0),
    };

    fn lock(&self) {
        let ticket = self.next.fetch_add(1, Ordering::Relaxed);
        let mut serving = self.serving.load(Ordering::Acquire);
        if serving == ticket {
            return;
        }
        self.contended.fetch_add(1, Ordering::Relaxed);

        let mut backoff = Backoff::new();
        while serving != ticket {
            if ticket.wrapping_sub(serving) > 1 {
                std::thread::yield_now();
            } else {
                backoff.snooze();
            }
            serving = self.serving.load(Ordering::Acquire);
        }
    }

    fn try_lock(&self) -> bool {
        let serving = self.serving.load(Ordering::Relaxed);
        self.next
            .compare_exchange(
                serving,
                serving.wrapping_add(1),
                Ordering::Acquire,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    #[inline]
    unsafe fn unlock(&self) {
        // Only the holder writes `serving`.
        let serving = self.serving.load(Ordering::Relaxed);
        self.serving.store(serving.wrapping_add(1), Ordering::Release);
    }

    fn contended(&self) -> usize {
        self.contended.load(Ordering::Relaxed)
    }
}
