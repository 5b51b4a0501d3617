use std::fmt;
use std::sync::Arc;

use log::{debug, trace};

use super::{Thread, ThreadState, MANAGER_SLOT};
use crate::error::{Error, Result};
use crate::fatal;

/// What a hook did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    /// Handled; later hooks are offered the event too.
    HandledContinue,
    /// Handled; later hooks are skipped.
    HandledStop,
    NotHandled,
}

/// Lifecycle and fault callbacks attached to a thread.
///
/// Hooks run in slot order, starting with the thread's manager in slot 0.
/// Lifecycle events are raised with the thread lock held and get the locked
/// state; they must not lock the thread or any wait queue. Interrupt and
/// fault events are raised without the thread lock.
pub trait ThreadHook: Send + Sync {
    fn suspend(&self, _thread: &Thread, _state: &mut ThreadState) -> HookOutcome {
        HookOutcome::NotHandled
    }

    fn resume(&self, _thread: &Thread, _state: &mut ThreadState) -> HookOutcome {
        HookOutcome::NotHandled
    }

    fn kill(&self, _thread: &Thread, _state: &mut ThreadState) -> HookOutcome {
        HookOutcome::NotHandled
    }

    fn block(&self, _thread: &Thread, _state: &mut ThreadState) -> HookOutcome {
        HookOutcome::NotHandled
    }

    fn unblock(&self, _thread: &Thread, _state: &mut ThreadState) -> HookOutcome {
        HookOutcome::NotHandled
    }

    fn interrupted(&self, _thread: &Thread) -> HookOutcome {
        HookOutcome::NotHandled
    }

    fn ending_interrupt(&self, _thread: &Thread) -> HookOutcome {
        HookOutcome::NotHandled
    }

    fn bus_error(&self, _thread: &Thread, _address: usize) -> HookOutcome {
        HookOutcome::NotHandled
    }

    fn page_fault(&self, _thread: &Thread, _address: usize) -> HookOutcome {
        HookOutcome::NotHandled
    }

    fn floating_point_exception(&self, _thread: &Thread) -> HookOutcome {
        HookOutcome::NotHandled
    }

    fn illegal_instruction(&self, _thread: &Thread) -> HookOutcome {
        HookOutcome::NotHandled
    }

    fn debug_trap(&self, _thread: &Thread) -> HookOutcome {
        HookOutcome::NotHandled
    }
}

pub(super) struct HookSlot {
    pub(super) owner: u64,
    pub(super) hook: Arc<dyn ThreadHook>,
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    BusError(usize),
    PageFault(usize),
    FloatingPoint,
    IllegalInstruction,
    DebugTrap,
}

impl Fault {
    fn offer(self, hook: &dyn ThreadHook, thread: &Thread) -> HookOutcome {
        match self {
            Fault::BusError(address) => hook.bus_error(thread, address),
            Fault::PageFault(address) => hook.page_fault(thread, address),
            Fault::FloatingPoint => hook.floating_point_exception(thread),
            Fault::IllegalInstruction => hook.illegal_instruction(thread),
            Fault::DebugTrap => hook.debug_trap(thread),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::BusError(address) => write!(f, "bus error at {address:#x}"),
            Fault::PageFault(address) => write!(f, "page fault at {address:#x}"),
            Fault::FloatingPoint => f.write_str("floating point exception"),
            Fault::IllegalInstruction => f.write_str("illegal instruction"),
            Fault::DebugTrap => f.write_str("debug trap"),
        }
    }
}

impl Thread {
    /// Installs `hook` in the first free slot after the manager's and returns
    /// the slot index. Hooks stay installed for the life of the thread.
    pub fn register_hook(&self, owner_id: u64, hook: Arc<dyn ThreadHook>) -> Result<usize> {
        if owner_id == super::MANAGER_OWNER {
            return Err(Error::InvalidArgument);
        }
        if self.find_hook(owner_id).is_some() {
            return Err(Error::AlreadyInProgress);
        }

        let mut slot = HookSlot {
            owner: owner_id,
            hook,
        };
        for (index, cell) in self.0.hooks.iter().enumerate().skip(MANAGER_SLOT + 1) {
            match cell.set(slot) {
                Ok(()) => {
                    debug!("thread {:?}: hook for owner {owner_id} in slot {index}", self.id());
                    return Ok(index);
                }
                Err(taken) => slot = taken,
            }
        }
        Err(Error::TemporaryOutage)
    }

    pub fn find_hook(&self, owner_id: u64) -> Option<usize> {
        self.0
            .hooks
            .iter()
            .position(|cell| cell.get().is_some_and(|slot| slot.owner == owner_id))
    }

    /// Offers a lifecycle event to every hook. Returns whether any handled it.
    pub(super) fn dispatch(
        &self,
        state: &mut ThreadState,
        event: impl Fn(&dyn ThreadHook, &Thread, &mut ThreadState) -> HookOutcome,
    ) -> bool {
        self.offer(|hook| event(hook, self, &mut *state))
    }

    pub(super) fn dispatch_unlocked(
        &self,
        event: impl Fn(&dyn ThreadHook, &Thread) -> HookOutcome,
    ) -> bool {
        self.offer(|hook| event(hook, self))
    }

    fn offer(&self, mut event: impl FnMut(&dyn ThreadHook) -> HookOutcome) -> bool {
        let mut handled = false;
        for slot in self.0.hooks.iter().filter_map(|cell| cell.get()) {
            match event(&*slot.hook) {
                HookOutcome::HandledStop => return true,
                HookOutcome::HandledContinue => handled = true,
                HookOutcome::NotHandled => {}
            }
        }
        handled
    }

    fn fault(&self, fault: Fault) {
        trace!("thread {:?}: {fault}", self.id());
        if !self.dispatch_unlocked(|hook, thread| fault.offer(hook, thread)) {
            fatal!("unhandled {fault} in thread {:?}", self.id());
        }
    }

    pub fn bus_error(&self, address: usize) {
        self.fault(Fault::BusError(address));
    }

    pub fn page_fault(&self, address: usize) {
        self.fault(Fault::PageFault(address));
    }

    pub fn floating_point_exception(&self) {
        self.fault(Fault::FloatingPoint);
    }

    pub fn illegal_instruction(&self) {
        self.fault(Fault::IllegalInstruction);
    }

    pub fn debug_trap(&self) {
        self.fault(Fault::DebugTrap);
    }
}
