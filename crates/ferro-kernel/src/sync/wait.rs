//! Context-dependent waiting shared by the blocking primitives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::{WaitQueueGuard, Waiter};
use crate::{cpu, interrupts};

/// Releases `queue` and waits until one of its wakeups (or, for a thread, an
/// explicit resume) arrives. Callers re-check their condition afterwards.
///
/// A current thread outside interrupt context is suspended on the queue.
/// Anywhere else there is nothing to suspend, so a callback waiter is added
/// and the CPU spins until it runs.
pub(crate) fn block_on(queue: WaitQueueGuard) {
    let queue = if interrupts::is_interrupt_context() {
        queue
    } else {
        match cpu::current() {
            Some(thread) => match thread.wait_locked(queue) {
                Ok(()) => return,
                Err((_, queue)) => queue,
            },
            None => queue,
        }
    };
    spin_on(queue);
}

fn spin_on(mut queue: WaitQueueGuard) {
    let waiting = Arc::new(AtomicBool::new(true));
    let flag = waiting.clone();
    queue.add(Waiter::callback(move || flag.store(false, Ordering::Release)));
    drop(queue);

    while waiting.load(Ordering::Acquire) {
        cpu::idle();
    }
}

/// Whether the calling thread has been marked interrupted. Always false
/// outside thread context.
pub(crate) fn interrupted() -> bool {
    cpu::current().is_some_and(|thread| thread.is_marked_interrupted())
}
