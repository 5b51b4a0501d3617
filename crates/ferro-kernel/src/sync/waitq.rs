use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use log::trace;

use super::IntSafeSpinLock;
use crate::thread::Thread;

/// Names a waiter on the queue it was added to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaiterId(u64);

/// Something waiting on a [`WaitQueue`].
pub enum Waiter {
    /// Runs with the queue locked when woken.
    Callback(Box<dyn FnOnce() + Send>),
    /// Resumed through its manager when woken.
    Thread(Thread),
}

impl Waiter {
    pub fn callback(f: impl FnOnce() + Send + 'static) -> Self {
        Waiter::Callback(Box::new(f))
    }
}

impl fmt::Debug for Waiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Waiter::Callback(_) => f.write_str("Callback"),
            Waiter::Thread(thread) => f.debug_tuple("Thread").field(thread).finish(),
        }
    }
}

struct Inner {
    lock: IntSafeSpinLock,
    waiters: UnsafeCell<VecDeque<(WaiterId, Waiter)>>,
    next_id: UnsafeCell<u64>,
}

// SAFETY: `waiters` and `next_id` are only accessed through a guard.
unsafe impl Send for Inner {}
unsafe impl Sync for Inner {}

/// FIFO queue of waiters behind its own interrupt-safe lock.
///
/// Handles are cheap clones of the same queue.
#[derive(Clone)]
pub struct WaitQueue {
    inner: Arc<Inner>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                lock: IntSafeSpinLock::new(),
                waiters: UnsafeCell::new(VecDeque::new()),
                next_id: UnsafeCell::new(0),
            }),
        }
    }

    pub fn lock(&self) -> WaitQueueGuard {
        self.inner.lock.lock();
        WaitQueueGuard {
            queue: self.clone(),
            _cpu: PhantomData,
        }
    }

    pub fn ptr_eq(&self, other: &WaitQueue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Adds `waiter` under a short-lived lock.
    pub fn wait(&self, waiter: Waiter) -> WaiterId {
        self.lock().add(waiter)
    }

    /// Wakes up to `count` waiters under a short-lived lock.
    pub fn wake_many(&self, count: usize) -> usize {
        self.lock().wake(count)
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WaitQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitQueue")
            .field("ptr", &Arc::as_ptr(&self.inner))
            .finish()
    }
}

/// A locked [`WaitQueue`]. Dropping it unlocks the queue.
pub struct WaitQueueGuard {
    queue: WaitQueue,
    _cpu: PhantomData<*const ()>,
}

impl WaitQueueGuard {
    pub fn queue(&self) -> &WaitQueue {
        &self.queue
    }

    fn waiters(&self) -> &VecDeque<(WaiterId, Waiter)> {
        // SAFETY: the guard holds the queue lock.
        unsafe { &*self.queue.inner.waiters.get() }
    }

    fn waiters_mut(&mut self) -> &mut VecDeque<(WaiterId, Waiter)> {
        // SAFETY: the guard holds the queue lock.
        unsafe { &mut *self.queue.inner.waiters.get() }
    }

    pub fn add(&mut self, waiter: Waiter) -> WaiterId {
        // SAFETY: the guard holds the queue lock.
        let id = unsafe {
            let next = &mut *self.queue.inner.next_id.get();
            *next += 1;
            WaiterId(*next)
        };
        self.waiters_mut().push_back((id, waiter));
        id
    }

    /// Takes a waiter back out without waking it. Returns `None` if it was
    /// already woken or removed.
    pub fn remove(&mut self, id: WaiterId) -> Option<Waiter> {
        let waiters = self.waiters_mut();
        let position = waiters.iter().position(|(waiter, _)| *waiter == id)?;
        waiters.remove(position).map(|(_, waiter)| waiter)
    }

    pub fn is_empty(&self) -> bool {
        self.waiters().is_empty()
    }

    pub fn len(&self) -> usize {
        self.waiters().len()
    }

    /// Removes and wakes up to `count` waiters in the order they were added.
    /// The queue stays locked.
    pub fn wake(&mut self, count: usize) -> usize {
        let mut woken = 0;
        while woken < count {
            let Some((id, waiter)) = self.waiters_mut().pop_front() else {
                break;
            };
            self.notify(id, waiter);
            woken += 1;
        }
        if woken > 0 {
            trace!("woke {woken} waiter(s) on {:?}", self.queue);
        }
        woken
    }

    /// Removes and wakes one particular waiter, wherever it is in the queue.
    /// Returns `false` if it was already woken or removed.
    pub fn wake_specific(&mut self, id: WaiterId) -> bool {
        let Some(waiter) = self.remove(id) else {
            return false;
        };
        self.notify(id, waiter);
        trace!("woke waiter {id:?} on {:?}", self.queue);
        true
    }

    fn notify(&self, id: WaiterId, waiter: Waiter) {
        match waiter {
            Waiter::Callback(callback) => callback(),
            Waiter::Thread(thread) => thread.resume_woken(&self.queue, id),
        }
    }
}

impl Drop for WaitQueueGuard {
    fn drop(&mut self) {
        self.queue.inner.lock.unlock();
    }
}
