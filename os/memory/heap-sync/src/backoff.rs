use core::hint::spin_loop;
use std::thread;

/// Wait strategy for a contended lock.
///
/// Each [`snooze`](Self::snooze) spins twice as long as the previous one, up
/// to `2^SPIN_LIMIT` spin hints. After that every call yields the thread, so a
/// waiter behind a holder that is inside a system call or was preempted gives
/// the core back.
#[derive(Debug, Default)]
pub struct Backoff {
    step: u32,
}

impl Backoff {
    const SPIN_LIMIT: u32 = 6;

    #[must_use]
    pub const fn new() -> Self {
        Self { step: 0 }
    }

    pub fn snooze(&mut self) {
        if self.step <= Self::SPIN_LIMIT {
            for _ in 0..1u32 << self.step {
                spin_loop();
            }
            self.step += 1;
        } else {
            thread::yield_now();
        }
    }

    /// Spinning is over; further waits yield.
    #[must_use]
    pub const fn is_yielding(&self) -> bool {
        self.step > Self::SPIN_LIMIT
    }
}
