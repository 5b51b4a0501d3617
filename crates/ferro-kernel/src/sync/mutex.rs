use std::sync::atomic::{AtomicU64, Ordering};

use log::trace;

use super::wait::{block_on, interrupted};
use super::WaitQueue;
use crate::error::{Error, Result};
use crate::types::ThreadId;
use crate::{cpu, fatal};

/// Re-entrant, owner-tracked sleeping lock. Only usable from thread context.
pub struct Mutex {
    // Owner id (0 when unowned) and lock count change only with the queue
    // locked.
    owner: AtomicU64,
    count: AtomicU64,
    queue: WaitQueue,
}

fn current_id() -> ThreadId {
    match cpu::current().and_then(|thread| thread.id()) {
        Some(id) => id,
        None => fatal!("mutex used without a current managed thread"),
    }
}

impl Mutex {
    pub fn new() -> Self {
        Self {
            owner: AtomicU64::new(0),
            count: AtomicU64::new(0),
            queue: WaitQueue::new(),
        }
    }

    pub fn lock(&self) {
        let me = current_id();
        while self.attempt(me, true).is_err() {}
    }

    pub fn try_lock(&self) -> Result<()> {
        self.attempt(current_id(), false)
    }

    /// As [`lock`](Self::lock), but gives up with [`Error::Signaled`] once
    /// the calling thread is marked interrupted.
    pub fn lock_interruptible(&self) -> Result<()> {
        let me = current_id();
        let mut waited = false;
        loop {
            if interrupted() {
                if waited {
                    self.abandon();
                }
                return Err(Error::Signaled);
            }
            if self.attempt(me, true).is_ok() {
                return Ok(());
            }
            waited = true;
        }
    }

    /// Withdraws a waiter that stopped waiting. A free mutex goes to the
    /// next waiter in its place.
    fn abandon(&self) {
        let mut queue = self.queue.lock();
        if self.owner.load(Ordering::Acquire) == 0 && queue.wake(1) > 0 {
            trace!("interrupted waiter passed the mutex on");
        }
    }

    fn attempt(&self, me: ThreadId, blocking: bool) -> Result<()> {
        let queue = self.queue.lock();
        let owner = self.owner.load(Ordering::Acquire);
        if owner == 0 || owner == me.val() {
            self.owner.store(me.val(), Ordering::Release);
            self.count.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        }
        if blocking {
            block_on(queue);
        }
        Err(Error::TemporaryOutage)
    }

    pub fn unlock(&self) {
        let me = current_id();
        let mut queue = self.queue.lock();
        let count = self.count.load(Ordering::Acquire);
        if count == 0 {
            drop(queue);
            fatal!("mutex unlocked while not locked");
        }
        let owner = self.owner.load(Ordering::Acquire);
        if owner != me.val() {
            drop(queue);
            fatal!("mutex owned by {owner} unlocked by thread {me}");
        }
        self.count.store(count - 1, Ordering::Release);
        if count == 1 {
            self.owner.store(0, Ordering::Release);
            queue.wake(1);
        }
    }

    pub fn owner(&self) -> Option<ThreadId> {
        ThreadId::new(self.owner.load(Ordering::Acquire))
    }

    pub fn lock_count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    pub fn waiters(&self) -> usize {
        self.queue.lock().len()
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "without a current managed thread")]
    fn lock_outside_thread_context_is_fatal() {
        Mutex::new().lock();
    }

    #[test]
    fn fresh_mutex_is_unowned() {
        let mutex = Mutex::new();
        assert_eq!(mutex.owner(), None);
        assert_eq!(mutex.lock_count(), 0);
        assert_eq!(mutex.waiters(), 0);
    }
}
