//! Connections and the driver seam.
//!
//! [`Session`] and [`ConnectionFactory`] are the only points where the
//! pool touches the network driver. A [`Connection`] owns exactly one
//! session; dropping the connection releases the session, so destruction
//! happens once by construction.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::lifecycle::{ConnectionMetadata, ConnectionState};
use crate::operation::{Operation, Reply};
use crate::uri::ConnectionUri;

/// A live backend session.
///
/// Dropping the session must release its backend resources.
#[async_trait]
pub trait Session: Send + 'static {
    /// Perform one backend call.
    async fn run(&mut self, operation: &Operation) -> Result<Reply, BackendError>;

    /// Cheap round-trip used to validate liveness.
    ///
    /// The default issues the `ping` command against `database`.
    async fn ping(&mut self, database: &str) -> Result<(), BackendError> {
        self.run(&Operation::ping(database)).await.map(|_| ())
    }
}

/// Creates sessions for a target URI.
///
/// Creation does not imply health; the pool probes every new session
/// before handing it out.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The session type produced.
    type Session: Session;

    /// Open a new session.
    async fn connect(&self, uri: &ConnectionUri) -> Result<Self::Session, BackendError>;
}

/// An owned handle to one backend session.
pub struct Connection<S> {
    session: S,
    target: Arc<ConnectionUri>,
    last_error: Option<BackendError>,
    interrupted: bool,
    metadata: ConnectionMetadata,
}

impl<S: Session> Connection<S> {
    pub(crate) fn new(session: S, target: Arc<ConnectionUri>) -> Self {
        Self {
            session,
            target,
            last_error: None,
            interrupted: false,
            metadata: ConnectionMetadata::new(),
        }
    }

    /// Open a connection outside any pool.
    ///
    /// Dropping it closes the session.
    pub async fn open<F>(factory: &F, uri: &ConnectionUri) -> Result<Self, BackendError>
    where
        F: ConnectionFactory<Session = S>,
    {
        let session = factory.connect(uri).await?;
        Ok(Self::new(session, Arc::new(uri.clone())))
    }

    /// Perform one backend call and record its outcome as the last error.
    ///
    /// If the returned future is dropped before completion, the connection
    /// is marked interrupted and a pool will discard it on return.
    pub async fn run(&mut self, operation: &Operation) -> Result<Reply, BackendError> {
        self.interrupted = true;
        let result = self.session.run(operation).await;
        self.interrupted = false;
        self.last_error = result.as_ref().err().cloned();
        if let Err(error) = &result {
            tracing::debug!(
                connection = self.metadata.id,
                operation = operation.name(),
                %error,
                "operation failed"
            );
        }
        result
    }

    /// Issue the liveness probe.
    pub async fn probe(&mut self, database: &str) -> Result<(), BackendError> {
        self.interrupted = true;
        let result = self.session.ping(database).await;
        self.interrupted = false;
        if result.is_ok() {
            self.metadata.mark_probed();
        }
        result
    }
}

impl<S> Connection<S> {
    /// The URI this connection was opened against.
    #[must_use]
    pub fn target(&self) -> &ConnectionUri {
        &self.target
    }

    /// Unique id of this connection.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.metadata.id
    }

    /// The underlying session.
    #[must_use]
    pub fn session(&self) -> &S {
        &self.session
    }

    /// Mutable access to the underlying session.
    ///
    /// Calls made directly on the session bypass last-error tracking;
    /// report their outcome with [`Connection::set_last_error`].
    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    /// The most recent error reported by a caller.
    #[must_use]
    pub fn last_error(&self) -> Option<&BackendError> {
        self.last_error.as_ref()
    }

    /// Report the outcome of the last operation (`None` on success).
    pub fn set_last_error(&mut self, error: Option<BackendError>) {
        self.last_error = error;
    }

    /// Forget the last error.
    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    /// Whether an operation on this connection was abandoned mid-flight.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.interrupted
    }

    pub(crate) fn mark_interrupted(&mut self) {
        self.interrupted = true;
    }

    /// Lifecycle metadata.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.metadata.state
    }

    pub(crate) fn metadata_mut(&mut self) -> &mut ConnectionMetadata {
        &mut self.metadata
    }

    /// Give up the session, bypassing pool and tracking.
    pub fn into_session(self) -> S {
        self.session
    }
}

impl<S> fmt::Debug for Connection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.metadata.id)
            .field("target", &self.target.to_string())
            .field("state", &self.metadata.state)
            .field("last_error", &self.last_error)
            .field("interrupted", &self.interrupted)
            .finish()
    }
}
