use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use ferro_kernel::cpu;
use ferro_kernel::thread::{
    HookOutcome, Stack, Thread, ThreadExit, ThreadFlags, ThreadHook, ThreadState,
};
use ferro_kernel::ThreadId;
use log::{debug, error, trace};

use crate::HarnessError;

pub struct HostConfig {
    /// Stack size for every thread the manager creates.
    pub stack_size: usize,
    /// Host threads are named `<prefix>-<thread id>`.
    pub name_prefix: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            stack_size: ferro_kernel::thread::DEFAULT_STACK_SIZE,
            name_prefix: "ferro".to_string(),
        }
    }
}

/// Thread manager that runs every kernel thread on its own host thread.
///
/// The first resume of a thread spawns its host thread; later resumes switch
/// back to its saved context. Everything else about a transition is
/// completed by the kernel on the thread's own CPU.
pub struct HostManager {
    config: HostConfig,
    next_id: AtomicU64,
    started: AtomicUsize,
}

impl HostManager {
    pub fn new(config: HostConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            next_id: AtomicU64::new(1),
            started: AtomicUsize::new(0),
        })
    }

    /// Creates a managed thread that stays suspended until resumed.
    pub fn create<F>(self: &Arc<Self>, entry: F) -> Result<Thread, HarnessError>
    where
        F: FnOnce() + Send + 'static,
    {
        let stack = Stack::allocate(self.config.stack_size)?;
        let thread = Thread::new(entry, Some(stack), ThreadFlags::DEALLOCATE_STACK_ON_EXIT)?;
        let id = ThreadId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
            .ok_or(HarnessError::IdsExhausted)?;
        thread.manage(id, self.clone())?;
        Ok(thread)
    }

    /// Creates a managed thread and resumes it.
    pub fn spawn<F>(self: &Arc<Self>, entry: F) -> Result<Thread, HarnessError>
    where
        F: FnOnce() + Send + 'static,
    {
        let thread = self.create(entry)?;
        thread.resume()?;
        Ok(thread)
    }

    /// Number of host threads started so far.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::Relaxed)
    }

    fn start(&self, thread: &Thread, entry: Box<dyn FnOnce() + Send>, stack_size: usize) {
        let name = match thread.id() {
            Some(id) => format!("{}-{id}", self.config.name_prefix),
            None => self.config.name_prefix.clone(),
        };
        let runner = thread.clone();
        let spawned = std::thread::Builder::new()
            .name(name)
            .stack_size(stack_size.max(self.config.stack_size))
            .spawn(move || run(runner, entry));
        match spawned {
            Ok(_) => {
                self.started.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => error!("failed to start host thread for {thread:?}: {err}"),
        }
    }
}

/// Bottom of every managed host thread's stack.
fn run(thread: Thread, entry: Box<dyn FnOnce() + Send>) {
    drop(cpu::set_current(Some(thread.clone())));
    let running = &thread;
    let outcome = panic::catch_unwind(AssertUnwindSafe(move || {
        running.settle();
        entry();
    }));
    match outcome {
        Ok(()) => thread.finish_death(),
        Err(payload) if payload.is::<ThreadExit>() => {}
        Err(payload) => {
            error!("thread {:?} panicked: {}", thread.id(), describe(&*payload));
            thread.finish_death();
        }
    }
    drop(cpu::set_current(None));
    trace!("host thread for {thread:?} exiting");
}

fn describe(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

impl ThreadHook for HostManager {
    fn suspend(&self, thread: &Thread, _state: &mut ThreadState) -> HookOutcome {
        debug!("suspending {thread:?}");
        HookOutcome::HandledStop
    }

    fn resume(&self, thread: &Thread, state: &mut ThreadState) -> HookOutcome {
        match state.take_entry() {
            Some(entry) => {
                debug!("starting {thread:?}");
                self.start(thread, entry, state.stack_size());
            }
            None => {
                debug!("switching back to {thread:?}");
                thread.context().unpark();
            }
        }
        HookOutcome::HandledStop
    }

    fn kill(&self, thread: &Thread, _state: &mut ThreadState) -> HookOutcome {
        debug!("killing {thread:?}");
        HookOutcome::HandledContinue
    }

    fn block(&self, thread: &Thread, _state: &mut ThreadState) -> HookOutcome {
        debug!("blocking {thread:?}");
        HookOutcome::HandledStop
    }

    fn unblock(&self, thread: &Thread, _state: &mut ThreadState) -> HookOutcome {
        debug!("unblocking {thread:?}");
        HookOutcome::HandledStop
    }
}
