//! Error classification.
//!
//! The pool routes a returned connection purely on the classifier's
//! verdict. The raw error still goes back to the caller untouched.

use crate::error::BackendError;

/// Verdict on a connection's health after an error (or none).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Health {
    /// The connection is fine; return it to the idle queue.
    Healthy,
    /// The backend is temporarily unreachable; quarantine and re-probe.
    Transient,
    /// The connection is broken; destroy it and free its creation permit.
    Terminal,
}

/// Decides how a connection should be treated after an error.
///
/// Implement this to adapt the pool to a backend with a different error
/// taxonomy. Closures of type `Fn(&BackendError) -> Health` implement it.
pub trait ErrorClassifier: Send + Sync {
    /// Classify a backend error.
    fn classify(&self, error: &BackendError) -> Health;

    /// Classify an optional last error; `None` is always healthy.
    fn classify_outcome(&self, error: Option<&BackendError>) -> Health {
        match error {
            Some(error) => self.classify(error),
            None => Health::Healthy,
        }
    }
}

impl<F> ErrorClassifier for F
where
    F: Fn(&BackendError) -> Health + Send + Sync,
{
    fn classify(&self, error: &BackendError) -> Health {
        self(error)
    }
}

/// The common transient/terminal split.
///
/// - operation-scoped errors (duplicate key, not found, invalid argument,
///   command failures) are [`Health::Healthy`]
/// - server-selection failures are [`Health::Transient`]
/// - everything else is [`Health::Terminal`]
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl ErrorClassifier for DefaultClassifier {
    fn classify(&self, error: &BackendError) -> Health {
        if error.is_operation_scoped() {
            Health::Healthy
        } else if error.is_transient() {
            Health::Transient
        } else {
            Health::Terminal
        }
    }
}
