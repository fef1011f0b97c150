//! Error types.
//!
//! Three layers of failure are kept apart:
//!
//! - [`BackendError`]: an error value produced by the driver for a single
//!   backend call. The pool never inspects it directly; it asks the
//!   configured [`ErrorClassifier`](crate::classify::ErrorClassifier).
//! - [`PoolError`]: failures of the pool itself (bad configuration,
//!   exhaustion, closed pool, cancellation).
//! - [`Error`]: what the collection facade returns, wrapping both.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Broad category of a backend error.
///
/// The categories mirror the error domains a document-database driver
/// reports. They are inputs to classification, not a routing decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// No suitable server could be selected (topology unavailable).
    ServerSelection,
    /// Socket-level failure: connect, read, write or name resolution.
    Network,
    /// The backend did not answer in time.
    Timeout,
    /// Authentication or handshake was rejected.
    Authentication,
    /// The peer sent a reply that could not be understood.
    Protocol,
    /// The connection URI could not be used.
    InvalidUri,
    /// A unique index rejected the write.
    DuplicateKey,
    /// The addressed document, collection or namespace does not exist.
    NotFound,
    /// The command was well-formed but its arguments were rejected.
    InvalidArgument,
    /// The server executed the command and reported a failure.
    Command,
    /// Anything the driver could not categorize.
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ServerSelection => "server selection",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Authentication => "authentication",
            Self::Protocol => "protocol",
            Self::InvalidUri => "invalid uri",
            Self::DuplicateKey => "duplicate key",
            Self::NotFound => "not found",
            Self::InvalidArgument => "invalid argument",
            Self::Command => "command",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// An error reported by the backend driver for one call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error (code {code}): {message}")]
pub struct BackendError {
    kind: ErrorKind,
    code: i32,
    message: String,
}

impl BackendError {
    /// Create a backend error with an explicit server/driver code.
    pub fn new(kind: ErrorKind, code: i32, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    /// Create a server-selection failure.
    pub fn server_selection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServerSelection, 0, message)
    }

    /// Create a network failure.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, 0, message)
    }

    /// Create a duplicate-key failure.
    pub fn duplicate_key(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DuplicateKey, 11000, message)
    }

    /// Create a not-found failure.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, 26, message)
    }

    /// Create an invalid-argument failure.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, 2, message)
    }

    /// The error category.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The numeric code reported by the driver or server.
    #[must_use]
    pub fn code(&self) -> i32 {
        self.code
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Check if the error is scoped to the operation rather than the session.
    ///
    /// Operation-scoped errors leave the connection usable.
    #[must_use]
    pub fn is_operation_scoped(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::DuplicateKey
                | ErrorKind::NotFound
                | ErrorKind::InvalidArgument
                | ErrorKind::Command
        )
    }

    /// Check if the backend may recover without a new session.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ErrorKind::ServerSelection)
    }
}

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),

    /// Pool is closed.
    #[error("pool is closed")]
    PoolClosed,

    /// Transient failures persisted past the retry budget.
    #[error("pool exhausted: backend unreachable after {elapsed:?} of backoff: {last_error}")]
    PoolExhausted {
        /// Cumulative backoff spent before giving up.
        elapsed: Duration,
        /// The last error observed while probing or creating.
        last_error: BackendError,
    },

    /// Connection creation failed with a non-transient error.
    #[error("failed to create connection: {0}")]
    ConnectionCreation(#[source] BackendError),

    /// Failed to acquire a connection within the timeout.
    #[error("connection acquisition timeout after {0:?}")]
    AcquisitionTimeout(Duration),

    /// The acquire was cancelled by the caller.
    #[error("connection acquisition cancelled")]
    Cancelled,
}

impl PoolError {
    /// Check if this error means the pool can no longer serve callers.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::PoolClosed | Self::PoolExhausted { .. }
        )
    }
}

/// Errors returned by the collection facade.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The pool could not provide a connection.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// The backend call failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A reply document could not be converted into the requested type.
    #[error("failed to decode reply: {0}")]
    Decode(#[from] serde_json::Error),

    /// The backend answered with a reply of the wrong shape.
    #[error("unexpected reply to {operation}: {reply}")]
    UnexpectedReply {
        /// The operation that was issued.
        operation: &'static str,
        /// A short description of what came back.
        reply: &'static str,
    },
}

/// Result type for facade operations.
pub type Result<T> = std::result::Result<T, Error>;
