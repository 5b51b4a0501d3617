//! Local interrupt state.
//!
//! Each host thread is a CPU. Disabling interrupts bumps a per-CPU nesting
//! counter, and interrupt context is whatever runs inside [`handle`].

use std::cell::Cell;

use log::trace;

use crate::cpu;

thread_local! {
    static DISABLE_DEPTH: Cell<u32> = const { Cell::new(0) };
    static INTERRUPT_DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Disables interrupts on this CPU. Calls nest.
pub fn disable() {
    DISABLE_DEPTH.with(|depth| depth.set(depth.get() + 1));
}

/// Undoes one [`disable`].
pub fn enable() {
    let depth = DISABLE_DEPTH.with(Cell::get);
    if depth == 0 {
        crate::fatal!("interrupts enabled more times than they were disabled");
    }
    DISABLE_DEPTH.with(|d| d.set(depth - 1));
}

pub fn are_enabled() -> bool {
    DISABLE_DEPTH.with(Cell::get) == 0
}

pub fn is_interrupt_context() -> bool {
    INTERRUPT_DEPTH.with(Cell::get) > 0
}

/// Runs `handler` in interrupt context on this CPU.
///
/// The outermost interrupt raises the interrupted and ending-interrupt hook
/// events on the interrupted thread. Once it returns with interrupts enabled,
/// any transition requested for that thread in the meantime (suspend, block,
/// kill) takes effect, so this is also the platform's preemption point.
pub fn handle<R>(handler: impl FnOnce() -> R) -> R {
    let thread = if is_interrupt_context() {
        None
    } else {
        cpu::current()
    };

    let frame = Frame::enter();
    if let Some(thread) = &thread {
        thread.interrupt_start();
    }
    let result = handler();
    if let Some(thread) = &thread {
        thread.interrupt_end();
    }
    drop(frame);

    if let Some(thread) = thread {
        if are_enabled() {
            thread.settle();
        }
    }
    result
}

struct Frame;

impl Frame {
    fn enter() -> Self {
        disable();
        let depth = INTERRUPT_DEPTH.with(|d| {
            d.set(d.get() + 1);
            d.get()
        });
        trace!("entered interrupt context (depth {depth})");
        Frame
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        INTERRUPT_DEPTH.with(|d| d.set(d.get() - 1));
        enable();
    }
}
