use thiserror::Error;

/// Result kinds returned by kernel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Error {
    #[error("invalid argument")]
    InvalidArgument,

    /// Would block, or a resource ran out. Safe to retry.
    #[error("temporary outage")]
    TemporaryOutage,

    /// The target is dead or being destroyed.
    #[error("permanent outage")]
    PermanentOutage,

    /// The requested transition already happened or is underway. Callers
    /// normally treat this as success.
    #[error("already in progress")]
    AlreadyInProgress,

    #[error("interrupted before completion")]
    Signaled,

    #[error("unsupported")]
    Unsupported,
}

pub type Result<T> = core::result::Result<T, Error>;
