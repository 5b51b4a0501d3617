//! Synchronization primitives and the thread object for the Ferro kernel.
//!
//! Everything here runs hosted: a CPU is a host thread, and the platform
//! layer (`interrupts`, `cpu`, `arch`) models interrupt state, the current
//! thread and saved execution contexts on top of it.

/// Logs an unrecoverable kernel condition and halts the current CPU.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {{
        ::log::error!($($arg)+);
        panic!($($arg)+)
    }};
}

pub mod arch;
pub mod cpu;
pub mod error;
pub mod interrupts;
pub mod sync;
pub mod thread;
pub mod timers;
pub mod types;

pub use error::{Error, Result};
pub use thread::Thread;
pub use types::ThreadId;

#[cfg(test)]
pub(crate) fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
