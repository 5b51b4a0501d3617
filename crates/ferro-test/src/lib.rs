//! Host-side collaborators for running the Ferro kernel core off target.
//!
//! [`HostManager`] is the thread manager: it sits in hook slot 0 of every
//! thread it creates and backs each kernel thread with a host thread.
//! [`HostTimers`] is a timer backend built on sleeping host threads.

mod error;
mod manager;
mod timer;

use std::time::{Duration, Instant};

use ferro_kernel::interrupts;

pub use error::HarnessError;
pub use manager::{HostConfig, HostManager};
pub use timer::{install_host_timers, HostTimers};

/// Initialises logging for tests. Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A timer tick on the calling CPU: runs an empty interrupt, which is where
/// pending transitions of the running thread take effect.
pub fn tick() {
    interrupts::handle(|| ());
    std::thread::yield_now();
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(
    timeout: Duration,
    mut condition: impl FnMut() -> bool,
) -> Result<(), HarnessError> {
    let deadline = Instant::now() + timeout;
    while !condition() {
        if Instant::now() >= deadline {
            return Err(HarnessError::Timeout(timeout));
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    Ok(())
}
