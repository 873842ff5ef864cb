use backtrace::Backtrace;
use parking_lot::Mutex;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;
use std::sync::Arc;

/// Error kinds for MemDB operations.
///
/// Each kind names one category of failure so callers can branch on it
/// without parsing messages.
///
/// # Examples
///
/// ```rust,ignore
/// use memdb::errors::{MemDbError, ErrorKind, MemDbResult};
///
/// fn example() -> MemDbResult<()> {
///     Err(MemDbError::new("shard s9 is not configured", ErrorKind::UnknownShard))
/// }
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    // Locking
    /// A lock could not be acquired within the retry window
    LockTimeout,
    /// A held lock expired and was reassigned to another owner
    LockLost,
    /// The locking service itself failed
    LockServiceError,

    // Constraints and validation
    /// A unique index (or the `_id`) would admit a duplicate
    DuplicateKey,
    /// Malformed field path, non-container target or bad modifier
    ValidationError,
    /// The query shape matches no declared index
    IndexNotFound,
    /// The provided document id is invalid
    InvalidId,

    // Routing and connections
    /// The router was given a shard id that is not configured
    UnknownShard,
    /// The shard connection is closed or the shard went away
    ConnectionLost,

    // Transactions
    /// The operation is not valid in the current state
    InvalidOperation,
    /// The transaction was aborted from outside its body
    TransactionAborted,

    // Collaborators
    /// Error reported by the persistent backend
    BackendError,
    /// Error mapping values to or from an external representation
    EncodingError,
    /// Invalid or unreadable configuration
    ConfigError,
    /// Error in lifecycle event processing
    EventError,

    /// Internal error (usually indicates a bug)
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::LockTimeout => write!(f, "Lock timeout"),
            ErrorKind::LockLost => write!(f, "Lock lost"),
            ErrorKind::LockServiceError => write!(f, "Lock service error"),
            ErrorKind::DuplicateKey => write!(f, "Duplicate key"),
            ErrorKind::ValidationError => write!(f, "Validation error"),
            ErrorKind::IndexNotFound => write!(f, "Index not found"),
            ErrorKind::InvalidId => write!(f, "Invalid ID"),
            ErrorKind::UnknownShard => write!(f, "Unknown shard"),
            ErrorKind::ConnectionLost => write!(f, "Connection lost"),
            ErrorKind::InvalidOperation => write!(f, "Invalid operation"),
            ErrorKind::TransactionAborted => write!(f, "Transaction aborted"),
            ErrorKind::BackendError => write!(f, "Backend error"),
            ErrorKind::EncodingError => write!(f, "Encoding error"),
            ErrorKind::ConfigError => write!(f, "Configuration error"),
            ErrorKind::EventError => write!(f, "Event error"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Custom MemDB error type.
///
/// `MemDbError` carries a message, a kind, an optional cause and the
/// backtrace captured where it was created.
///
/// ```rust,ignore
/// use memdb::errors::{MemDbError, ErrorKind};
///
/// let cause = MemDbError::new("socket closed", ErrorKind::ConnectionLost);
/// let err = MemDbError::new_with_cause("commit failed", ErrorKind::BackendError, cause);
/// ```
#[derive(Clone)]
pub struct MemDbError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<MemDbError>>,
    backtrace: Arc<Mutex<Backtrace>>,
}

impl MemDbError {
    /// Creates a new `MemDbError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        MemDbError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: Arc::new(Mutex::new(Backtrace::new_unresolved())),
        }
    }

    /// Creates a new `MemDbError` chained to the error that caused it.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: MemDbError) -> Self {
        MemDbError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: Arc::new(Mutex::new(Backtrace::new_unresolved())),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&MemDbError> {
        self.cause.as_deref()
    }

    /// Returns `true` if the error leaves a transaction retryable from scratch.
    pub fn is_contention(&self) -> bool {
        matches!(self.error_kind, ErrorKind::LockTimeout | ErrorKind::LockLost)
    }
}

impl Display for MemDbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for MemDbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{} ({})\nCaused by: {:?}", self.message, self.error_kind, cause),
            None => {
                let mut backtrace = self.backtrace.lock();
                backtrace.resolve();
                write!(f, "{} ({})\n{:?}", self.message, self.error_kind, *backtrace)
            }
        }
    }
}

impl Error for MemDbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// A result type alias for MemDB operations.
pub type MemDbResult<T> = Result<T, MemDbError>;

impl From<std::io::Error> for MemDbError {
    fn from(err: std::io::Error) -> Self {
        let error_kind = match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::ConfigError,
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe => ErrorKind::ConnectionLost,
            _ => ErrorKind::InternalError,
        };
        MemDbError::new(&format!("IO error: {}", err), error_kind)
    }
}

impl From<serde_json::Error> for MemDbError {
    fn from(err: serde_json::Error) -> Self {
        MemDbError::new(&format!("JSON error: {}", err), ErrorKind::EncodingError)
    }
}

impl From<std::num::ParseIntError> for MemDbError {
    fn from(err: std::num::ParseIntError) -> Self {
        MemDbError::new(
            &format!("Integer parsing error: {}", err),
            ErrorKind::ValidationError,
        )
    }
}

impl From<String> for MemDbError {
    fn from(msg: String) -> Self {
        MemDbError::new(&msg, ErrorKind::InternalError)
    }
}

impl From<&str> for MemDbError {
    fn from(msg: &str) -> Self {
        MemDbError::new(msg, ErrorKind::InternalError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_error_has_no_cause() {
        let error = MemDbError::new("lock busy", ErrorKind::LockTimeout);
        assert_eq!(error.message(), "lock busy");
        assert_eq!(error.kind(), &ErrorKind::LockTimeout);
        assert!(error.cause().is_none());
        assert!(error.source().is_none());
    }

    #[test]
    fn error_with_cause_chains() {
        let root = MemDbError::new("shard s1 stopped", ErrorKind::ConnectionLost);
        let error = MemDbError::new_with_cause("commit failed", ErrorKind::BackendError, root);

        assert_eq!(error.kind(), &ErrorKind::BackendError);
        assert_eq!(error.cause().map(|c| c.kind()), Some(&ErrorKind::ConnectionLost));
        assert!(error.source().is_some());

        let formatted = format!("{:?}", error);
        assert!(formatted.contains("commit failed"));
        assert!(formatted.contains("Caused by:"));
    }

    #[test]
    fn display_shows_message_only() {
        let error = MemDbError::new("Oops!", ErrorKind::InternalError);
        assert_eq!(format!("{}", error), "Oops!");
    }

    #[test]
    fn debug_without_cause_includes_kind() {
        let error = MemDbError::new("dup", ErrorKind::DuplicateKey);
        let formatted = format!("{:?}", error);
        assert!(formatted.contains("dup"));
        assert!(formatted.contains("Duplicate key"));
    }

    #[test]
    fn contention_kinds() {
        assert!(MemDbError::new("", ErrorKind::LockTimeout).is_contention());
        assert!(MemDbError::new("", ErrorKind::LockLost).is_contention());
        assert!(!MemDbError::new("", ErrorKind::DuplicateKey).is_contention());
    }

    #[test]
    fn from_io_error_maps_connection_failures() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let error: MemDbError = io.into();
        assert_eq!(error.kind(), &ErrorKind::ConnectionLost);
    }

    #[test]
    fn from_json_error_is_encoding_error() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error: MemDbError = err.into();
        assert_eq!(error.kind(), &ErrorKind::EncodingError);
    }

    #[test]
    fn from_str_is_internal() {
        let error: MemDbError = "boom".into();
        assert_eq!(error.kind(), &ErrorKind::InternalError);
        assert_eq!(error.message(), "boom");
    }

    #[test]
    fn kind_display() {
        assert_eq!(ErrorKind::UnknownShard.to_string(), "Unknown shard");
        assert_eq!(ErrorKind::ConnectionLost.to_string(), "Connection lost");
    }
}
