//! Saved execution context.
//!
//! On the hosted platform a suspended thread's context is the point where its
//! host thread is parked. Switching away parks the host thread and switching
//! back unparks it.

use std::sync::{Condvar, Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct SavedContext {
    runnable: Mutex<bool>,
    wake: Condvar,
}

impl SavedContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks the calling host thread until the context is switched back to.
    ///
    /// A switch that arrives before the park is remembered, so at most one
    /// park returns for each [`unpark`](Self::unpark).
    pub fn park(&self) {
        let mut runnable = self
            .runnable
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while !*runnable {
            runnable = self
                .wake
                .wait(runnable)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *runnable = false;
    }

    pub fn unpark(&self) {
        let mut runnable = self
            .runnable
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *runnable = true;
        self.wake.notify_one();
    }
}
