use std::sync::atomic::{AtomicU64, Ordering};

use log::trace;

use super::wait::{block_on, interrupted};
use super::WaitQueue;
use crate::error::{Error, Result};
use crate::fatal;

const WRITE_LOCKED: u64 = 1 << 0;
const WRITERS_WAITING: u64 = 1 << 1;
const READER: u64 = 1 << 2;

fn readers(state: u64) -> u64 {
    state >> 2
}

/// Shared/exclusive sleeping lock.
///
/// Once a writer is waiting, new readers queue behind it instead of joining
/// the current readers, so a stream of readers cannot starve writers.
///
/// The state word packs the write-locked bit, the writers-waiting bit and the
/// reader count. It changes only with both queues locked, read queue first.
pub struct RwLock {
    state: AtomicU64,
    read_queue: WaitQueue,
    write_queue: WaitQueue,
}

impl RwLock {
    pub fn new() -> Self {
        Self {
            state: AtomicU64::new(0),
            read_queue: WaitQueue::new(),
            write_queue: WaitQueue::new(),
        }
    }

    pub fn lock_read(&self) {
        while self.attempt_read(true).is_err() {}
    }

    pub fn try_lock_read(&self) -> Result<()> {
        self.attempt_read(false)
    }

    pub fn lock_read_interruptible(&self) -> Result<()> {
        loop {
            if interrupted() {
                return Err(Error::Signaled);
            }
            if self.attempt_read(true).is_ok() {
                return Ok(());
            }
        }
    }

    fn attempt_read(&self, blocking: bool) -> Result<()> {
        let read_queue = self.read_queue.lock();
        let write_queue = self.write_queue.lock();
        let state = self.state.load(Ordering::Acquire);
        if state & (WRITE_LOCKED | WRITERS_WAITING) == 0 {
            self.state.store(state + READER, Ordering::Release);
            return Ok(());
        }
        if blocking {
            drop(write_queue);
            block_on(read_queue);
        }
        Err(Error::TemporaryOutage)
    }

    pub fn lock_write(&self) {
        let mut waited = false;
        while self.attempt_write(&mut waited, true).is_err() {}
    }

    pub fn try_lock_write(&self) -> Result<()> {
        self.attempt_write(&mut false, false)
    }

    pub fn lock_write_interruptible(&self) -> Result<()> {
        let mut waited = false;
        loop {
            if interrupted() {
                if waited {
                    self.abandon_write();
                }
                return Err(Error::Signaled);
            }
            if self.attempt_write(&mut waited, true).is_ok() {
                return Ok(());
            }
        }
    }

    /// A writer may take the lock when it is entirely free, or when the only
    /// thing set is the writers-waiting bit and this writer already queued
    /// once. Writers arriving fresh never cut in front of a queued writer.
    fn attempt_write(&self, waited: &mut bool, blocking: bool) -> Result<()> {
        let read_queue = self.read_queue.lock();
        let write_queue = self.write_queue.lock();
        let state = self.state.load(Ordering::Acquire);
        if state == 0 || (*waited && state == WRITERS_WAITING) {
            let mut next = WRITE_LOCKED;
            if !write_queue.is_empty() {
                next |= WRITERS_WAITING;
            }
            self.state.store(next, Ordering::Release);
            return Ok(());
        }
        if blocking {
            self.state.store(state | WRITERS_WAITING, Ordering::Release);
            drop(read_queue);
            block_on(write_queue);
            *waited = true;
        }
        Err(Error::TemporaryOutage)
    }

    /// Withdraws a queued writer that stopped waiting.
    fn abandon_write(&self) {
        let mut read_queue = self.read_queue.lock();
        let mut write_queue = self.write_queue.lock();
        let state = self.state.load(Ordering::Acquire);
        if state & WRITE_LOCKED != 0 || readers(state) > 0 {
            return;
        }
        // Whoever woke us may have meant the lock for us; pass it on.
        if write_queue.wake(1) > 0 {
            return;
        }
        if state & WRITERS_WAITING != 0 {
            trace!("last queued writer gave up, releasing readers");
            self.state.store(state & !WRITERS_WAITING, Ordering::Release);
            read_queue.wake(usize::MAX);
        }
    }

    pub fn unlock(&self) {
        let mut read_queue = self.read_queue.lock();
        let mut write_queue = self.write_queue.lock();
        let mut state = self.state.load(Ordering::Acquire);
        if state & WRITE_LOCKED != 0 {
            state &= !WRITE_LOCKED;
        } else if readers(state) == 0 {
            drop(write_queue);
            drop(read_queue);
            fatal!("rw lock unlocked while not locked");
        } else {
            state -= READER;
        }

        if readers(state) > 0 {
            self.state.store(state, Ordering::Release);
            return;
        }
        if state & WRITERS_WAITING != 0 {
            self.state.store(state, Ordering::Release);
            if write_queue.wake(1) > 0 {
                return;
            }
            // Every queued writer left without clearing the bit.
            state &= !WRITERS_WAITING;
        }
        self.state.store(state, Ordering::Release);
        read_queue.wake(usize::MAX);
    }

    pub fn readers(&self) -> u64 {
        readers(self.state.load(Ordering::Acquire))
    }

    pub fn is_write_locked(&self) -> bool {
        self.state.load(Ordering::Acquire) & WRITE_LOCKED != 0
    }

    pub fn has_waiting_writers(&self) -> bool {
        self.state.load(Ordering::Acquire) & WRITERS_WAITING != 0
    }
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}
