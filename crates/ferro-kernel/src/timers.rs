//! One-shot timers used by timed suspension.
//!
//! The backend is installed once by whoever owns the hardware timer. Without
//! one, timed operations report `Unsupported`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use log::info;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Nanoseconds from now.
    Relative,
    /// A point on the monotonic clock. Not supported.
    AbsoluteMonotonic,
}

pub type TimerCallback = Box<dyn FnOnce() + Send>;

pub trait TimerBackend: Send + Sync {
    /// Calls `callback` once, `delay` from now.
    fn arm(&self, delay: Duration, callback: TimerCallback) -> Result<()>;
}

static BACKEND: OnceLock<Box<dyn TimerBackend>> = OnceLock::new();
static NEXT_TIMER: AtomicU64 = AtomicU64::new(1);

/// Installs the timer backend. Fails with `AlreadyInProgress` if one is
/// already installed.
pub fn install(backend: Box<dyn TimerBackend>) -> Result<()> {
    BACKEND.set(backend).map_err(|_| Error::AlreadyInProgress)?;
    info!("timer backend installed");
    Ok(())
}

pub fn is_installed() -> bool {
    BACKEND.get().is_some()
}

pub(crate) fn arm(delay: Duration, callback: TimerCallback) -> Result<()> {
    BACKEND.get().ok_or(Error::Unsupported)?.arm(delay, callback)
}

pub(crate) fn next_id() -> u64 {
    NEXT_TIMER.fetch_add(1, Ordering::Relaxed)
}
