use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// One-shot wall-clock timer, polled by its owner.
#[derive(Debug, Default, Clone, Copy)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub fn arm(&mut self, now: Instant, duration: Duration) {
        self.deadline = Some(now + duration);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Fires at most once: returns true and disarms when the deadline has passed.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// One-shot timer counted in samples of the audio stream.
#[derive(Debug, Default, Clone, Copy)]
pub struct SampleTimer {
    remaining: Option<usize>,
}

impl SampleTimer {
    pub fn arm(&mut self, samples: usize) {
        self.remaining = Some(samples);
    }

    pub fn cancel(&mut self) {
        self.remaining = None;
    }

    pub fn is_armed(&self) -> bool {
        self.remaining.is_some()
    }

    /// Offers `available` samples to the timer. Returns how many of them fall
    /// before the deadline and whether the deadline was reached. Disarms on expiry.
    pub fn advance(&mut self, available: usize) -> (usize, bool) {
        match self.remaining {
            Some(left) => {
                let taken = left.min(available);
                let left = left - taken;
                if left == 0 {
                    self.remaining = None;
                    (taken, true)
                } else {
                    self.remaining = Some(left);
                    (taken, false)
                }
            }
            None => (0, false),
        }
    }
}

/// Process-wide stop flag that sleeping threads can wait on.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock() = true;
        cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep for `duration` unless shutdown is triggered first.
    /// Returns true if the full duration elapsed without shutdown.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let (lock, cvar) = &*self.inner;
        let mut stopped = lock.lock();
        while !*stopped {
            if cvar.wait_until(&mut stopped, deadline).timed_out() {
                return !*stopped;
            }
        }
        false
    }
}
