//! Thread objects.
//!
//! A [`Thread`] is a counted handle to a thread descriptor: cloning it
//! retains the descriptor and dropping it releases it. The descriptor carries
//! the execution state machine, the hook table (slot 0 belongs to the
//! thread's manager) and the lifecycle wait queues other subsystems wait on.
//!
//! Transitions requested from another CPU are recorded as pending bits and
//! completed by the thread itself at its next preemption point, see
//! [`Thread::settle`]. Threads that are parked are completed on the spot.

mod hooks;
mod stack;
mod state;

pub use hooks::{HookOutcome, ThreadHook};
pub use stack::Stack;
pub use state::{ExecutionState, StateFlags, ThreadFlags, ThreadState};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use log::{debug, trace, warn};

use crate::arch::SavedContext;
use crate::error::{Error, Result};
use crate::sync::{
    block_on, IntSafeSpin, IntSafeSpinGuard, WaitQueue, WaitQueueGuard, Waiter, WaiterId,
};
use crate::timers::{self, TimeoutKind};
use crate::types::ThreadId;
use crate::{cpu, fatal, interrupts};
use hooks::HookSlot;
use state::{Entry, WaitLink};

pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;
pub const HOOK_SLOTS: usize = 4;

const MANAGER_SLOT: usize = 0;
const MANAGER_OWNER: u64 = 0;

pub type ThreadStateGuard<'a> = IntSafeSpinGuard<'a, ThreadState>;

/// Unwind payload that carries a killed thread off its CPU. Managers catch
/// it at the bottom of the thread's stack.
#[derive(Debug)]
pub struct ThreadExit;

struct ThreadObject {
    id: AtomicU64,
    state: IntSafeSpin<ThreadState>,
    context: SavedContext,
    hooks: [OnceLock<HookSlot>; HOOK_SLOTS],
    death_wait: WaitQueue,
    destroy_wait: WaitQueue,
    suspend_wait: WaitQueue,
    block_wait: WaitQueue,
}

// Destroy waiters run while the descriptor is still intact, but no handle to
// it can be retained any more. Waiters that need to know which thread went
// away capture its id when they start waiting.
impl Drop for ThreadObject {
    fn drop(&mut self) {
        debug!("thread {} destroyed", self.id.load(Ordering::Relaxed));
        self.destroy_wait.wake_many(usize::MAX);
    }
}

#[derive(Clone)]
pub struct Thread(Arc<ThreadObject>);

/// A handle that does not keep the thread alive.
#[derive(Clone)]
pub struct WeakThread(Weak<ThreadObject>);

impl WeakThread {
    /// Fails with `PermanentOutage` once the thread has been destroyed.
    pub fn retain(&self) -> Result<Thread> {
        self.0.upgrade().map(Thread).ok_or(Error::PermanentOutage)
    }
}

impl Thread {
    /// Creates a suspended, unmanaged thread that will run `entry`.
    ///
    /// Without a `stack` one of [`DEFAULT_STACK_SIZE`] is allocated and freed
    /// again when the thread dies.
    pub fn new<F>(entry: F, stack: Option<Stack>, flags: ThreadFlags) -> Result<Thread>
    where
        F: FnOnce() + Send + 'static,
    {
        if flags.contains(ThreadFlags::EXIT_DATA_COPIED) {
            return Err(Error::InvalidArgument);
        }
        let (stack, flags) = match stack {
            Some(stack) => (stack, flags),
            None => (
                Stack::allocate(DEFAULT_STACK_SIZE)?,
                flags | ThreadFlags::DEALLOCATE_STACK_ON_EXIT,
            ),
        };

        let stack_size = stack.size();
        let entry: Entry = Box::new(entry);
        let thread = Thread(Arc::new(ThreadObject {
            id: AtomicU64::new(0),
            state: IntSafeSpin::new(ThreadState::new(entry, stack, flags)),
            context: SavedContext::new(),
            hooks: std::array::from_fn(|_| OnceLock::new()),
            death_wait: WaitQueue::new(),
            destroy_wait: WaitQueue::new(),
            suspend_wait: WaitQueue::new(),
            block_wait: WaitQueue::new(),
        }));
        trace!("thread created with a {stack_size} byte stack");
        Ok(thread)
    }

    /// The thread running on this CPU.
    pub fn current() -> Option<Thread> {
        cpu::current()
    }

    pub fn id(&self) -> Option<ThreadId> {
        ThreadId::new(self.0.id.load(Ordering::Acquire))
    }

    pub fn retain(&self) -> Thread {
        self.clone()
    }

    pub fn release(self) {}

    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn downgrade(&self) -> WeakThread {
        WeakThread(Arc::downgrade(&self.0))
    }

    pub fn ptr_eq(&self, other: &Thread) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn lock_state(&self) -> ThreadStateGuard<'_> {
        self.0.state.lock()
    }

    pub fn execution_state(&self) -> ExecutionState {
        self.lock_state().exec
    }

    pub fn flags(&self) -> StateFlags {
        self.lock_state().flags
    }

    pub fn context(&self) -> &SavedContext {
        &self.0.context
    }

    pub fn death_wait(&self) -> &WaitQueue {
        &self.0.death_wait
    }

    pub fn destroy_wait(&self) -> &WaitQueue {
        &self.0.destroy_wait
    }

    pub fn suspend_wait(&self) -> &WaitQueue {
        &self.0.suspend_wait
    }

    pub fn block_wait(&self) -> &WaitQueue {
        &self.0.block_wait
    }

    pub fn is_managed(&self) -> bool {
        self.0.hooks[MANAGER_SLOT].get().is_some()
    }

    fn is_current(&self) -> bool {
        cpu::is_current(self)
    }

    /// Attaches the thread's manager and gives the thread its id. The thread
    /// stays suspended until resumed.
    pub fn manage(&self, id: ThreadId, manager: Arc<dyn ThreadHook>) -> Result<()> {
        let state = self.lock_state();
        if state.is_dying() {
            return Err(Error::InvalidArgument);
        }
        let slot = HookSlot {
            owner: MANAGER_OWNER,
            hook: manager,
        };
        if self.0.hooks[MANAGER_SLOT].set(slot).is_err() {
            return Err(Error::AlreadyInProgress);
        }
        self.0.id.store(id.val(), Ordering::Release);
        drop(state);
        debug!("thread {id} managed");
        Ok(())
    }

    pub fn suspend(&self, wait: bool) -> Result<()> {
        self.request_suspend(wait, None)
    }

    /// Suspends the thread and resumes it again after `timeout`. The timer
    /// is armed once the suspension has completed.
    pub fn suspend_timeout(&self, wait: bool, timeout: Duration, kind: TimeoutKind) -> Result<()> {
        let timeout = checked_timeout(timeout, kind)?;
        self.request_suspend(wait, timeout)
    }

    fn request_suspend(&self, wait: bool, timeout: Option<Duration>) -> Result<()> {
        let current = self.is_current();
        let mut state = self.lock_state();
        if !self.is_managed() {
            return Err(Error::InvalidArgument);
        }
        if state.is_dying() {
            return Err(Error::PermanentOutage);
        }
        if state.exec == ExecutionState::Suspended
            || state.flags.contains(StateFlags::PENDING_SUSPEND)
        {
            return Err(Error::AlreadyInProgress);
        }

        state.flags.insert(StateFlags::PENDING_SUSPEND);
        state.pending_timeout = timeout;
        self.dispatch(&mut state, |hook, thread, state| hook.suspend(thread, state));
        drop(state);
        debug!("thread {:?} suspend requested", self.id());

        if current {
            if !interrupts::is_interrupt_context() {
                self.settle();
            }
        } else if wait {
            self.await_lifecycle(&self.0.suspend_wait, |state| {
                matches!(state.exec, ExecutionState::Suspended | ExecutionState::Dead)
            });
        }
        Ok(())
    }

    /// Makes a suspended thread runnable again, cancelling any wait it is in
    /// and any pending suspension.
    pub fn resume(&self) -> Result<()> {
        let mut state = self.lock_state();
        if !self.is_managed() {
            return Err(Error::InvalidArgument);
        }
        let link = state.wait_link.take();
        let result = self.resume_locked(&mut state);
        drop(state);
        unlink(link);
        result
    }

    fn resume_locked(&self, state: &mut ThreadState) -> Result<()> {
        if state.is_dying() {
            return Err(Error::PermanentOutage);
        }
        match state.exec {
            ExecutionState::Suspended => {}
            _ if state.flags.contains(StateFlags::PENDING_SUSPEND) => {
                state.flags.remove(StateFlags::PENDING_SUSPEND);
                state.pending_timeout = None;
                return Ok(());
            }
            _ => return Err(Error::AlreadyInProgress),
        }

        state.timer = None;
        state.exec = ExecutionState::NotRunning;
        if !self.dispatch(state, |hook, thread, state| hook.resume(thread, state)) {
            warn!("thread {:?} resumed but no hook dispatched it", self.id());
        }
        Ok(())
    }

    /// Resumption by a wait queue. Does nothing unless the thread is still
    /// waiting as `id` on `queue`.
    pub(crate) fn resume_woken(&self, queue: &WaitQueue, id: WaiterId) {
        let mut state = self.lock_state();
        match &state.wait_link {
            Some(link) if link.id == id && link.queue.ptr_eq(queue) => {}
            _ => return,
        }
        state.wait_link = None;
        let _ = self.resume_locked(&mut state);
    }

    fn resume_from_timer(&self, timer: u64) {
        let mut state = self.lock_state();
        if state.timer != Some(timer) {
            trace!("thread {:?}: stale timer {timer}", self.id());
            return;
        }
        state.timer = None;
        let link = state.wait_link.take();
        let _ = self.resume_locked(&mut state);
        drop(state);
        unlink(link);
    }

    fn arm_resume_timer(&self, timer: u64, delay: Duration) {
        let thread = self.downgrade();
        let armed = timers::arm(
            delay,
            Box::new(move || {
                if let Ok(thread) = thread.retain() {
                    thread.resume_from_timer(timer);
                }
            }),
        );
        if let Err(err) = armed {
            warn!("thread {:?}: resume timer not armed ({err}), resuming now", self.id());
            self.resume_from_timer(timer);
        }
    }

    /// Suspends the thread on `queue` until a wakeup from the queue or an
    /// explicit resume, whichever comes first. A thread waits on one queue at
    /// a time; waiting again moves it.
    pub fn wait(&self, queue: &WaitQueue) -> Result<()> {
        self.enqueue(queue.lock(), None).map_err(|(err, _)| err)
    }

    pub fn wait_timeout(
        &self,
        queue: &WaitQueue,
        timeout: Duration,
        kind: TimeoutKind,
    ) -> Result<()> {
        let timeout = checked_timeout(timeout, kind)?;
        self.enqueue(queue.lock(), timeout).map_err(|(err, _)| err)
    }

    /// Waits on an already locked queue. On failure the guard is handed back
    /// still locked.
    pub(crate) fn wait_locked(
        &self,
        queue: WaitQueueGuard,
    ) -> std::result::Result<(), (Error, WaitQueueGuard)> {
        self.enqueue(queue, None)
    }

    fn enqueue(
        &self,
        mut queue: WaitQueueGuard,
        timeout: Option<Duration>,
    ) -> std::result::Result<(), (Error, WaitQueueGuard)> {
        let current = self.is_current();
        let mut state = self.lock_state();
        if !self.is_managed() {
            drop(state);
            return Err((Error::InvalidArgument, queue));
        }
        if state.is_dying() {
            drop(state);
            if current {
                drop(queue);
                self.die_current();
            }
            return Err((Error::PermanentOutage, queue));
        }

        let previous = state.wait_link.take();
        let id = queue.add(Waiter::Thread(self.clone()));
        state.wait_link = Some(WaitLink {
            queue: queue.queue().clone(),
            id,
        });
        state.timer = None;

        // A thread already off its CPU starts waiting right away.
        let mut armed = None;
        if state.exec == ExecutionState::Suspended {
            if let Some(delay) = timeout {
                let timer = timers::next_id();
                state.timer = Some(timer);
                armed = Some((timer, delay));
            }
        } else {
            state.flags.insert(StateFlags::PENDING_SUSPEND);
            state.pending_timeout = timeout;
        }

        state.flags.insert(StateFlags::HOLDING_WAITQ_LOCK);
        self.dispatch(&mut state, |hook, thread, state| hook.suspend(thread, state));
        state.flags.remove(StateFlags::HOLDING_WAITQ_LOCK);
        drop(state);
        drop(queue);

        unlink(previous);
        if let Some((timer, delay)) = armed {
            self.arm_resume_timer(timer, delay);
        }
        if current && !interrupts::is_interrupt_context() {
            self.settle();
        }
        Ok(())
    }

    /// Stops the thread for good. Killing the current thread does not
    /// return.
    ///
    /// The caller's own handle stays valid; anything else may have been the
    /// last reference.
    pub fn kill(&self) -> Result<()> {
        let current = self.is_current();
        let mut state = self.lock_state();
        if !self.is_managed() {
            return Err(Error::InvalidArgument);
        }
        if state.is_dying() {
            return Err(Error::AlreadyInProgress);
        }
        state.flags.insert(StateFlags::PENDING_DEATH);
        self.dispatch(&mut state, |hook, thread, state| hook.kill(thread, state));
        let parked = state.exec == ExecutionState::Suspended
            || state.flags.contains(StateFlags::BLOCKED);
        drop(state);
        debug!("thread {:?} killed", self.id());

        if current {
            self.die_current();
        }
        if parked {
            self.finish_death();
        }
        Ok(())
    }

    /// Ends the current thread, leaving `data` for whoever collects it.
    pub fn exit(data: Option<Vec<u8>>) -> ! {
        let Some(thread) = cpu::current() else {
            fatal!("exit called outside of a thread");
        };
        if let Some(data) = data {
            let mut state = thread.lock_state();
            state.exit_data = Some(data);
            state.thread_flags.insert(ThreadFlags::EXIT_DATA_COPIED);
        }
        let _ = thread.kill();
        thread.die_current()
    }

    pub fn exit_data(&self) -> Option<Vec<u8>> {
        self.lock_state().exit_data.clone()
    }

    /// Blocks the thread: it keeps its execution state but must not be
    /// dispatched until a matching [`unblock`](Self::unblock). Blocks nest.
    pub fn block(&self, wait: bool) -> Result<()> {
        let current = self.is_current();
        let mut state = self.lock_state();
        if !self.is_managed() {
            return Err(Error::InvalidArgument);
        }
        if state.is_dying() {
            return Err(Error::PermanentOutage);
        }
        state.block_count += 1;
        if state.block_count > 1 {
            return Ok(());
        }

        if state.exec == ExecutionState::Suspended {
            state.flags.insert(StateFlags::BLOCKED);
        } else {
            state.flags.insert(StateFlags::PENDING_BLOCK);
        }
        self.dispatch(&mut state, |hook, thread, state| hook.block(thread, state));
        drop(state);
        debug!("thread {:?} blocked", self.id());

        if current {
            if !interrupts::is_interrupt_context() {
                self.settle();
            }
        } else if wait {
            self.await_lifecycle(&self.0.block_wait, |state| {
                state.flags.contains(StateFlags::BLOCKED) || state.exec == ExecutionState::Dead
            });
        }
        Ok(())
    }

    pub fn unblock(&self) -> Result<()> {
        let mut state = self.lock_state();
        if !self.is_managed() {
            return Err(Error::InvalidArgument);
        }
        if state.exec == ExecutionState::Dead {
            return Err(Error::PermanentOutage);
        }
        if state.block_count == 0 {
            return Err(Error::AlreadyInProgress);
        }
        state.block_count -= 1;
        if state.block_count > 0 {
            return Ok(());
        }

        let parked = state.flags.contains(StateFlags::BLOCKED);
        state.flags.remove(StateFlags::BLOCKED | StateFlags::PENDING_BLOCK);
        self.dispatch(&mut state, |hook, thread, state| hook.unblock(thread, state));
        drop(state);
        debug!("thread {:?} unblocked", self.id());

        if parked {
            self.0.context.unpark();
        }
        Ok(())
    }

    pub fn mark_interrupted(&self) {
        self.lock_state().flags.insert(StateFlags::INTERRUPTED);
    }

    pub fn unmark_interrupted(&self) {
        self.lock_state().flags.remove(StateFlags::INTERRUPTED);
    }

    pub fn is_marked_interrupted(&self) -> bool {
        self.lock_state().flags.contains(StateFlags::INTERRUPTED)
    }

    /// Raised when an interrupt arrives on top of this thread.
    pub fn interrupt_start(&self) {
        {
            let mut state = self.lock_state();
            if state.exec == ExecutionState::Running {
                state.exec = ExecutionState::Interrupted;
            }
        }
        self.dispatch_unlocked(|hook, thread| hook.interrupted(thread));
    }

    pub fn interrupt_end(&self) {
        self.dispatch_unlocked(|hook, thread| hook.ending_interrupt(thread));
        let mut state = self.lock_state();
        if state.exec == ExecutionState::Interrupted {
            state.exec = ExecutionState::Running;
        }
    }

    /// Waits until the thread has died.
    pub fn wait_for_death(&self) {
        self.await_lifecycle(&self.0.death_wait, |state| {
            state.exec == ExecutionState::Dead
        });
    }

    fn await_lifecycle(&self, queue: &WaitQueue, done: impl Fn(&ThreadState) -> bool) {
        loop {
            let guard = queue.lock();
            if done(&self.lock_state()) {
                return;
            }
            block_on(guard);
        }
    }

    /// Completes whatever has been requested of the current thread.
    ///
    /// Parks while the thread is suspended or blocked and unwinds it off the
    /// CPU once it has been killed. Called by the thread itself with no locks
    /// held: when it starts, after raising a transition on itself and on the
    /// way out of an interrupt.
    pub fn settle(&self) {
        if !self.is_current() {
            fatal!("thread {:?} settled from another CPU", self.id());
        }
        loop {
            let mut state = self.lock_state();
            if state.is_dying() {
                drop(state);
                self.die_current();
            }

            if state.flags.contains(StateFlags::PENDING_SUSPEND) {
                state.flags.remove(StateFlags::PENDING_SUSPEND);
                state.exec = ExecutionState::Suspended;
                let armed = state.pending_timeout.take().map(|delay| {
                    let timer = timers::next_id();
                    state.timer = Some(timer);
                    (timer, delay)
                });
                drop(state);
                debug!("thread {:?} suspended", self.id());

                self.0.suspend_wait.wake_many(usize::MAX);
                if let Some((timer, delay)) = armed {
                    self.arm_resume_timer(timer, delay);
                }
                self.0.context.park();
                continue;
            }
            if state.exec == ExecutionState::Suspended {
                drop(state);
                self.0.context.park();
                continue;
            }

            if state.flags.contains(StateFlags::PENDING_BLOCK) {
                state.flags.remove(StateFlags::PENDING_BLOCK);
                state.flags.insert(StateFlags::BLOCKED);
                drop(state);
                self.0.block_wait.wake_many(usize::MAX);
                self.0.context.park();
                continue;
            }
            if state.flags.contains(StateFlags::BLOCKED) {
                drop(state);
                self.0.context.park();
                continue;
            }

            if state.exec == ExecutionState::NotRunning {
                state.exec = ExecutionState::Running;
            }
            return;
        }
    }

    /// Marks the thread dead and releases what it held: its wait, its timer,
    /// its entry point if it never ran and a kernel-allocated stack. Wakes
    /// everyone waiting on its death. Does nothing after the first call.
    pub fn finish_death(&self) {
        let mut state = self.lock_state();
        if state.exec == ExecutionState::Dead {
            return;
        }
        state.exec = ExecutionState::Dead;
        state
            .flags
            .remove(StateFlags::PENDING_SUSPEND | StateFlags::PENDING_BLOCK | StateFlags::BLOCKED);
        state.timer = None;
        state.pending_timeout = None;
        let link = state.wait_link.take();
        let entry = state.entry.take();
        let stack = if state
            .thread_flags
            .contains(ThreadFlags::DEALLOCATE_STACK_ON_EXIT)
        {
            state.stack.take()
        } else {
            None
        };
        drop(state);

        unlink(link);
        drop(entry);
        drop(stack);
        debug!("thread {:?} died", self.id());

        self.0.context.unpark();
        self.0.death_wait.wake_many(usize::MAX);
        self.0.suspend_wait.wake_many(usize::MAX);
        self.0.block_wait.wake_many(usize::MAX);
    }

    /// Finishes the death of the current thread and unwinds off its stack
    /// with a [`ThreadExit`] payload.
    pub fn die_current(&self) -> ! {
        if !self.is_current() {
            fatal!("thread {:?} cannot die from another CPU", self.id());
        }
        self.finish_death();
        std::panic::resume_unwind(Box::new(ThreadExit))
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id())
            .field("ptr", &Arc::as_ptr(&self.0))
            .finish()
    }
}

fn checked_timeout(timeout: Duration, kind: TimeoutKind) -> Result<Option<Duration>> {
    if kind == TimeoutKind::AbsoluteMonotonic {
        return Err(Error::Unsupported);
    }
    if timeout.is_zero() {
        return Ok(None);
    }
    if !timers::is_installed() {
        return Err(Error::Unsupported);
    }
    Ok(Some(timeout))
}

/// Takes a thread off the queue it was waiting on. Called with no locks held.
fn unlink(link: Option<WaitLink>) {
    if let Some(link) = link {
        let mut queue = link.queue.lock();
        let waiter = queue.remove(link.id);
        drop(queue);
        drop(waiter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn idle_thread() -> Thread {
        crate::init_test_logging();
        Thread::new(|| {}, None, ThreadFlags::empty()).unwrap()
    }

    /// Manager that accepts every event and never runs anything.
    struct Inert;

    impl ThreadHook for Inert {}

    fn managed_thread(id: u64) -> Thread {
        let thread = idle_thread();
        thread
            .manage(ThreadId::new(id).unwrap(), Arc::new(Inert))
            .unwrap();
        thread
    }

    struct Recorder {
        name: &'static str,
        outcome: HookOutcome,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl ThreadHook for Recorder {
        fn interrupted(&self, _thread: &Thread) -> HookOutcome {
            self.log.lock().unwrap().push(self.name);
            self.outcome
        }

        fn page_fault(&self, _thread: &Thread, address: usize) -> HookOutcome {
            assert_eq!(address, 0xdead_0000);
            self.log.lock().unwrap().push(self.name);
            self.outcome
        }
    }

    fn recorder(
        name: &'static str,
        outcome: HookOutcome,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Arc<dyn ThreadHook> {
        Arc::new(Recorder {
            name,
            outcome,
            log: log.clone(),
        })
    }

    #[test]
    fn new_thread_is_suspended_and_unmanaged() {
        let thread = idle_thread();
        assert_eq!(thread.execution_state(), ExecutionState::Suspended);
        assert_eq!(thread.id(), None);
        assert!(!thread.is_managed());
        assert_eq!(thread.reference_count(), 1);
        let state = thread.lock_state();
        assert!(state
            .thread_flags()
            .contains(ThreadFlags::DEALLOCATE_STACK_ON_EXIT));
        assert_eq!(state.stack_size(), DEFAULT_STACK_SIZE);
    }

    #[test]
    fn copied_exit_data_flag_is_rejected() {
        let result = Thread::new(|| {}, None, ThreadFlags::EXIT_DATA_COPIED);
        assert_eq!(result.err(), Some(Error::InvalidArgument));
    }

    #[test]
    fn lifecycle_operations_need_a_manager() {
        let thread = idle_thread();
        assert_eq!(thread.resume(), Err(Error::InvalidArgument));
        assert_eq!(thread.suspend(false), Err(Error::InvalidArgument));
        assert_eq!(thread.block(false), Err(Error::InvalidArgument));
        assert_eq!(thread.unblock(), Err(Error::InvalidArgument));
        assert_eq!(thread.kill(), Err(Error::InvalidArgument));
        assert_eq!(thread.execution_state(), ExecutionState::Suspended);
    }

    #[test]
    fn killing_an_unstarted_thread_finishes_its_death() {
        let thread = managed_thread(1);
        let deaths = Arc::new(AtomicUsize::new(0));
        {
            let deaths = deaths.clone();
            thread.death_wait().wait(Waiter::callback(move || {
                deaths.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert_eq!(thread.kill(), Ok(()));
        assert_eq!(thread.execution_state(), ExecutionState::Dead);
        assert_eq!(thread.kill(), Err(Error::AlreadyInProgress));
        assert_eq!(thread.lock_state().stack_size(), 0);
        assert_eq!(deaths.load(Ordering::SeqCst), 1);
        assert_eq!(thread.resume(), Err(Error::PermanentOutage));
        thread.wait_for_death();
    }

    #[test]
    fn retain_release_round_trip_and_single_destroy_notification() {
        let thread = managed_thread(7);
        let destroyed = Arc::new(AtomicUsize::new(0));
        let gone = Arc::new(Mutex::new(Vec::new()));
        {
            let destroyed = destroyed.clone();
            let gone = gone.clone();
            let id = thread.id();
            thread.destroy_wait().wait(Waiter::callback(move || {
                destroyed.fetch_add(1, Ordering::SeqCst);
                gone.lock().unwrap().extend(id);
            }));
        }

        let extra = thread.retain();
        assert_eq!(thread.reference_count(), 2);
        extra.release();
        assert_eq!(thread.reference_count(), 1);
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);

        let weak = thread.downgrade();
        assert!(weak.retain().is_ok());
        thread.release();
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(*gone.lock().unwrap(), vec![ThreadId::new(7).unwrap()]);
        assert_eq!(weak.retain().err(), Some(Error::PermanentOutage));
    }

    #[test]
    fn interrupted_mark_is_sticky_until_cleared() {
        let thread = idle_thread();
        assert!(!thread.is_marked_interrupted());
        thread.mark_interrupted();
        thread.mark_interrupted();
        assert!(thread.is_marked_interrupted());
        assert_eq!(thread.execution_state(), ExecutionState::Suspended);
        thread.unmark_interrupted();
        assert!(!thread.is_marked_interrupted());
    }

    #[test]
    fn hooks_fill_free_slots_after_the_manager() {
        let thread = idle_thread();
        let log = Arc::new(Mutex::new(Vec::new()));
        let hook = || recorder("hook", HookOutcome::NotHandled, &log);

        assert_eq!(thread.register_hook(MANAGER_OWNER, hook()), Err(Error::InvalidArgument));
        assert_eq!(thread.register_hook(10, hook()), Ok(1));
        assert_eq!(thread.register_hook(10, hook()), Err(Error::AlreadyInProgress));
        assert_eq!(thread.register_hook(11, hook()), Ok(2));
        assert_eq!(thread.register_hook(12, hook()), Ok(3));
        assert_eq!(thread.register_hook(13, hook()), Err(Error::TemporaryOutage));
        assert_eq!(thread.find_hook(11), Some(2));
        assert_eq!(thread.find_hook(99), None);
    }

    #[test]
    fn hooks_run_in_slot_order_until_one_stops() {
        let thread = idle_thread();
        let log = Arc::new(Mutex::new(Vec::new()));
        thread
            .register_hook(1, recorder("first", HookOutcome::HandledContinue, &log))
            .unwrap();
        thread
            .register_hook(2, recorder("second", HookOutcome::HandledStop, &log))
            .unwrap();
        thread
            .register_hook(3, recorder("third", HookOutcome::HandledContinue, &log))
            .unwrap();

        thread.interrupt_start();
        thread.interrupt_end();
        thread.page_fault(0xdead_0000);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "first", "second"]);
    }

    #[test]
    #[should_panic(expected = "unhandled bus error at 0x1000")]
    fn unhandled_fault_is_fatal() {
        let thread = idle_thread();
        let log = Arc::new(Mutex::new(Vec::new()));
        thread
            .register_hook(1, recorder("ignores", HookOutcome::NotHandled, &log))
            .unwrap();
        thread.bus_error(0x1000);
    }

    #[test]
    fn timeouts_are_validated_before_the_thread_is_touched() {
        let thread = idle_thread();
        assert_eq!(
            thread.suspend_timeout(false, Duration::from_millis(5), TimeoutKind::AbsoluteMonotonic),
            Err(Error::Unsupported)
        );
        // A zero timeout is a plain suspend.
        assert_eq!(
            thread.suspend_timeout(false, Duration::ZERO, TimeoutKind::Relative),
            Err(Error::InvalidArgument)
        );
    }
}
