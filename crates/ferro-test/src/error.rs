use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("kernel error: {0}")]
    Kernel(#[from] ferro_kernel::Error),

    #[error("condition not reached within {0:?}")]
    Timeout(Duration),

    #[error("thread ids exhausted")]
    IdsExhausted,
}
