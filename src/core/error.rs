use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Replica is not primary")]
    NotPrimary,

    #[error("Object closed")]
    ObjectClosed,

    #[error("Store is not readable")]
    NotReadable,

    #[error("Operation timed out")]
    Timeout,

    #[error("Stream name prefix '{0}' is not an absolute URI")]
    InvalidPrefix(String),

    #[error("Stream name prefix '{0}' is already registered")]
    DuplicatePrefix(String),

    #[error("A different default inbound stream callback is already registered")]
    DefaultCallbackConflict,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl StreamError {
    /// Errors a higher layer may retry after the role or store settles.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StreamError::NotPrimary
                | StreamError::ObjectClosed
                | StreamError::NotReadable
                | StreamError::Timeout
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, StreamError::InvariantViolation(_))
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;

impl<T> From<std::sync::PoisonError<T>> for StreamError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}
