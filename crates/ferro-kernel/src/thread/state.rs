use std::fmt;
use std::time::Duration;

use bitflags::bitflags;

use super::Stack;
use crate::sync::{WaitQueue, WaiterId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionState {
    /// Runnable but not on a CPU.
    NotRunning,
    Suspended,
    Running,
    Dead,
    /// On a CPU, with an interrupt running on top of it.
    Interrupted,
}

bitflags! {
    /// Status bits kept next to the execution state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StateFlags: u32 {
        const PENDING_SUSPEND = 1 << 3;
        const PENDING_DEATH = 1 << 4;
        /// A suspend event is being raised while the caller holds the lock
        /// of the queue the thread is about to wait on.
        const HOLDING_WAITQ_LOCK = 1 << 5;
        /// Sticky mark checked by the interruptible lock variants.
        const INTERRUPTED = 1 << 6;
        const BLOCKED = 1 << 7;
        const PENDING_BLOCK = 1 << 8;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ThreadFlags: u32 {
        /// The stack was allocated for the thread and goes away when it dies.
        const DEALLOCATE_STACK_ON_EXIT = 1 << 0;
        /// Exit data has been stored. Set by the kernel only.
        const EXIT_DATA_COPIED = 1 << 1;
    }
}

pub(super) type Entry = Box<dyn FnOnce() + Send>;

/// The queue a thread is waiting on and its waiter there.
pub(super) struct WaitLink {
    pub(super) queue: WaitQueue,
    pub(super) id: WaiterId,
}

/// Everything protected by the thread lock.
///
/// Only reachable through a [`ThreadStateGuard`](super::ThreadStateGuard),
/// which holds that lock.
pub struct ThreadState {
    pub(super) exec: ExecutionState,
    pub(super) flags: StateFlags,
    pub(super) thread_flags: ThreadFlags,
    pub(super) block_count: u32,
    pub(super) wait_link: Option<WaitLink>,
    pub(super) pending_timeout: Option<Duration>,
    pub(super) timer: Option<u64>,
    pub(super) entry: Option<Entry>,
    pub(super) stack: Option<Stack>,
    pub(super) exit_data: Option<Vec<u8>>,
}

impl ThreadState {
    pub(super) fn new(entry: Entry, stack: Stack, thread_flags: ThreadFlags) -> Self {
        Self {
            exec: ExecutionState::Suspended,
            flags: StateFlags::empty(),
            thread_flags,
            block_count: 0,
            wait_link: None,
            pending_timeout: None,
            timer: None,
            entry: Some(entry),
            stack: Some(stack),
            exit_data: None,
        }
    }

    pub fn execution_state(&self) -> ExecutionState {
        self.exec
    }

    pub fn flags(&self) -> StateFlags {
        self.flags
    }

    pub fn thread_flags(&self) -> ThreadFlags {
        self.thread_flags
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    pub fn is_waiting(&self) -> bool {
        self.wait_link.is_some()
    }

    /// Size of the thread's stack, or 0 once it has been freed.
    pub fn stack_size(&self) -> usize {
        self.stack.as_ref().map_or(0, Stack::size)
    }

    /// Hands the thread's entry point to the manager dispatching it for the
    /// first time. `None` once the thread has started.
    pub fn take_entry(&mut self) -> Option<Box<dyn FnOnce() + Send>> {
        self.entry.take()
    }

    pub(super) fn is_dying(&self) -> bool {
        self.exec == ExecutionState::Dead || self.flags.contains(StateFlags::PENDING_DEATH)
    }
}

impl fmt::Debug for ThreadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadState")
            .field("exec", &self.exec)
            .field("flags", &self.flags)
            .field("thread_flags", &self.thread_flags)
            .field("block_count", &self.block_count)
            .field("waiting", &self.is_waiting())
            .field("started", &self.entry.is_none())
            .finish()
    }
}
