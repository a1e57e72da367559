use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Session pool exhausted: no session available within {0:?}")]
    PoolExhausted(Duration),

    #[error("Transient network failure: {0}")]
    TransientNetwork(String),

    #[error("Transaction aborted by the server: {0}")]
    Aborted(String),

    #[error("Session '{0}' no longer exists on the server")]
    SessionInvalid(String),

    #[error("Retries exhausted after {attempts} attempts over {elapsed:?}: {source}")]
    RetriesExhausted {
        attempts: u32,
        elapsed: Duration,
        #[source]
        source: Box<DbError>,
    },

    #[error("Operation cancelled by the caller")]
    Cancelled,

    #[error("Commit outcome unknown after {attempts} attempts: {source}")]
    AmbiguousCommit {
        attempts: u32,
        #[source]
        source: Box<DbError>,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Machine-readable error classification used by the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    PoolExhausted,
    TransientNetwork,
    Aborted,
    SessionInvalid,
    RetriesExhausted,
    Cancelled,
    AmbiguousCommit,
    InvalidArgument,
    PermissionDenied,
    ConstraintViolation,
    FailedPrecondition,
}

impl DbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::PoolExhausted(_) => ErrorKind::PoolExhausted,
            DbError::TransientNetwork(_) => ErrorKind::TransientNetwork,
            DbError::Aborted(_) => ErrorKind::Aborted,
            DbError::SessionInvalid(_) => ErrorKind::SessionInvalid,
            DbError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            DbError::Cancelled => ErrorKind::Cancelled,
            DbError::AmbiguousCommit { .. } => ErrorKind::AmbiguousCommit,
            DbError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            DbError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            DbError::ConstraintViolation(_) => ErrorKind::ConstraintViolation,
            DbError::FailedPrecondition(_) => ErrorKind::FailedPrecondition,
        }
    }

    /// Whether the transaction runner may retry the whole unit of work
    /// after seeing this error. Only server-reported aborts and transient
    /// connectivity failures qualify; everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DbError::Aborted(_) | DbError::TransientNetwork(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(DbError::Aborted("write conflict".into()).is_retryable());
        assert!(DbError::TransientNetwork("connection reset".into()).is_retryable());

        assert!(!DbError::Cancelled.is_retryable());
        assert!(!DbError::InvalidArgument("bad sql".into()).is_retryable());
        assert!(!DbError::SessionInvalid("sessions/1".into()).is_retryable());
        assert!(!DbError::PoolExhausted(Duration::from_secs(1)).is_retryable());
    }

    #[test]
    fn test_retries_exhausted_keeps_cause() {
        let err = DbError::RetriesExhausted {
            attempts: 5,
            elapsed: Duration::from_millis(1200),
            source: Box::new(DbError::Aborted("conflict".into())),
        };

        assert_eq!(err.kind(), ErrorKind::RetriesExhausted);
        let msg = err.to_string();
        assert!(msg.contains("5 attempts"));
        assert!(msg.contains("conflict"));
    }
}
