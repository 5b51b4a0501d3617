use std::sync::atomic::{AtomicU64, Ordering};

use log::trace;

use super::wait::{block_on, interrupted};
use super::WaitQueue;
use crate::error::{Error, Result};

/// Counting semaphore.
pub struct Semaphore {
    // Only changed with the queue locked.
    count: AtomicU64,
    queue: WaitQueue,
}

impl Semaphore {
    pub fn new(count: u64) -> Self {
        Self {
            count: AtomicU64::new(count),
            queue: WaitQueue::new(),
        }
    }

    /// Releases one unit. Returns whether a waiter was woken.
    pub fn up(&self) -> bool {
        let mut queue = self.queue.lock();
        let previous = self.count.fetch_add(1, Ordering::AcqRel);
        previous == 0 && queue.wake(1) > 0
    }

    pub fn down(&self) {
        while self.attempt(true).is_err() {}
    }

    pub fn try_down(&self) -> Result<()> {
        self.attempt(false)
    }

    /// As [`down`](Self::down), but gives up with [`Error::Signaled`] once
    /// the calling thread is marked interrupted.
    pub fn down_interruptible(&self) -> Result<()> {
        let mut waited = false;
        loop {
            if interrupted() {
                if waited {
                    self.abandon();
                }
                return Err(Error::Signaled);
            }
            if self.attempt(true).is_ok() {
                return Ok(());
            }
            waited = true;
        }
    }

    /// Withdraws a waiter that stopped waiting. The wakeup it may have been
    /// given goes to the next waiter while units remain.
    fn abandon(&self) {
        let mut queue = self.queue.lock();
        if self.count.load(Ordering::Acquire) > 0 && queue.wake(1) > 0 {
            trace!("interrupted waiter passed its wakeup on");
        }
    }

    /// Takes a unit if one is available. A blocking attempt that finds none
    /// waits for the next wakeup and reports `TemporaryOutage` so the caller
    /// retries.
    fn attempt(&self, blocking: bool) -> Result<()> {
        let mut queue = self.queue.lock();
        let count = self.count.load(Ordering::Acquire);
        if count > 0 {
            self.count.store(count - 1, Ordering::Release);
            // Units left over belong to the next waiter; `up` only wakes on
            // the transition away from zero.
            if count > 1 && !queue.is_empty() {
                queue.wake(1);
            }
            return Ok(());
        }
        if blocking {
            block_on(queue);
        }
        Err(Error::TemporaryOutage)
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    pub fn waiters(&self) -> usize {
        self.queue.lock().len()
    }
}
