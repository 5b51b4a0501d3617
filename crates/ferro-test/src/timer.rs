use std::sync::Once;
use std::time::Duration;

use ferro_kernel::timers::{self, TimerBackend, TimerCallback};
use ferro_kernel::{interrupts, Error};
use log::warn;

/// Timer backend that sleeps on a host thread per armed timer and fires the
/// callback from interrupt context.
#[derive(Debug, Default)]
pub struct HostTimers;

impl TimerBackend for HostTimers {
    fn arm(&self, delay: Duration, callback: TimerCallback) -> ferro_kernel::Result<()> {
        std::thread::Builder::new()
            .name("ferro-timer".to_string())
            .spawn(move || {
                std::thread::sleep(delay);
                interrupts::handle(callback);
            })
            .map(drop)
            .map_err(|err| {
                warn!("failed to start timer thread: {err}");
                Error::TemporaryOutage
            })
    }
}

/// Installs [`HostTimers`] as the kernel's timer backend, once per process.
pub fn install_host_timers() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        if timers::install(Box::new(HostTimers)).is_err() {
            warn!("a timer backend was already installed");
        }
    });
}
