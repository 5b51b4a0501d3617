//! Per-CPU state: the current thread and the cross-CPU work queue.

use std::cell::{Cell, RefCell, UnsafeCell};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::trace;

use crate::sync::IntSafeSpinLock;
use crate::thread::Thread;

thread_local! {
    static CURRENT: RefCell<Option<Thread>> = const { RefCell::new(None) };
    static DRAINING: Cell<bool> = const { Cell::new(false) };
}

/// Spins between lock attempts before handing the host CPU back.
const SPINS_BEFORE_YIELD: u32 = 64;

/// The thread running on this CPU, or the interrupted one while inside an
/// interrupt.
pub fn current() -> Option<Thread> {
    CURRENT.with(|current| current.borrow().clone())
}

pub(crate) fn is_current(thread: &Thread) -> bool {
    CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .is_some_and(|running| running.ptr_eq(thread))
    })
}

/// Installs the thread that runs on this CPU from now on and returns the
/// previous one. Thread managers call this when they dispatch a thread.
pub fn set_current(thread: Option<Thread>) -> Option<Thread> {
    CURRENT.with(|current| current.replace(thread))
}

/// Architecture pause hint used by spin loops.
#[inline]
pub fn relax(spins: &mut u32) {
    *spins += 1;
    if *spins % SPINS_BEFORE_YIELD == 0 {
        std::thread::yield_now();
    } else {
        std::hint::spin_loop();
    }
}

/// Idles the CPU briefly while busy-waiting for an event.
pub fn idle() {
    std::hint::spin_loop();
    std::thread::yield_now();
}

pub type Work = Box<dyn FnOnce() + Send>;

/// Work posted for whichever CPU gets to it first.
///
/// Interrupt-safe spinlocks drain this queue while they spin so that a CPU
/// waiting on a lock still runs coordination work another CPU is waiting for.
pub struct WorkQueue {
    lock: IntSafeSpinLock,
    items: UnsafeCell<VecDeque<Work>>,
    pending: AtomicUsize,
}

// SAFETY: `items` is only accessed with `lock` held.
unsafe impl Sync for WorkQueue {}

pub static CROSS_CPU_WORK: WorkQueue = WorkQueue::new();

impl WorkQueue {
    pub const fn new() -> Self {
        Self {
            lock: IntSafeSpinLock::exempt(),
            items: UnsafeCell::new(VecDeque::new()),
            pending: AtomicUsize::new(0),
        }
    }

    pub fn post(&self, work: impl FnOnce() + Send + 'static) {
        self.lock.lock();
        // SAFETY: lock held.
        unsafe { (*self.items.get()).push_back(Box::new(work)) };
        self.pending.fetch_add(1, Ordering::Release);
        self.lock.unlock();
    }

    pub fn is_empty(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }

    /// Runs everything posted so far and returns how many items ran.
    ///
    /// The work runs with the queue unlocked. A drain started from inside
    /// another drain on the same CPU does nothing.
    pub fn drain(&self) -> usize {
        if DRAINING.with(|draining| draining.replace(true)) {
            return 0;
        }
        let _reset = DrainGuard;

        let mut ran = 0;
        loop {
            self.lock.lock();
            // SAFETY: lock held.
            let batch = unsafe { std::mem::take(&mut *self.items.get()) };
            self.pending.fetch_sub(batch.len(), Ordering::Release);
            self.lock.unlock();

            if batch.is_empty() {
                break;
            }
            ran += batch.len();
            for work in batch {
                work();
            }
        }
        trace!("drained {ran} cross-CPU work items");
        ran
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

struct DrainGuard;

impl Drop for DrainGuard {
    fn drop(&mut self) {
        DRAINING.with(|draining| draining.set(false));
    }
}
