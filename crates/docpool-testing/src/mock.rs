//! Scripted mock backend.
//!
//! A [`MockBackend`] stands in for a whole deployment. Sessions opened by
//! its [`MockFactory`] share one [`MemoryStore`] and report to shared
//! counters, so tests can assert how many sessions a pool opened, closed
//! and probed. Failures can be scripted for the next few calls or switched
//! on until further notice to simulate an outage.
//!
//! Any `ping` command counts as a probe, including one sent through the
//! facade.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use docpool::{
    BackendError, ConnectionFactory, ConnectionUri, Document, Namespace, Operation, Reply,
    Session,
};
use parking_lot::Mutex;

use crate::store::MemoryStore;

/// Shared state of a simulated deployment.
///
/// Cloning is cheap; clones control the same backend.
#[derive(Clone, Default)]
pub struct MockBackend {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<BackendState>,
    live: AtomicUsize,
    peak_live: AtomicUsize,
    busy: AtomicUsize,
    peak_busy: AtomicUsize,
    created: AtomicU64,
    destroyed: AtomicU64,
    pings: AtomicU64,
    operations: AtomicU64,
    next_session: AtomicU64,
}

#[derive(Default)]
struct BackendState {
    connect_script: VecDeque<BackendError>,
    connect_failure: Option<BackendError>,
    probe_script: VecDeque<BackendError>,
    probe_failure: Option<BackendError>,
    operation_script: VecDeque<BackendError>,
    latency: Duration,
    store: MemoryStore,
    connected_uris: Vec<String>,
}

/// Counters observed by a [`MockBackend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    /// Sessions currently open.
    pub live: usize,
    /// Most sessions ever open at once.
    pub peak_live: usize,
    /// Most calls ever in flight at once.
    pub peak_busy: usize,
    /// Sessions opened.
    pub created: u64,
    /// Sessions closed.
    pub destroyed: u64,
    /// `ping` commands received.
    pub pings: u64,
    /// Non-ping operations received.
    pub operations: u64,
}

impl MockBackend {
    /// Create a healthy, empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A factory that opens sessions against this backend.
    #[must_use]
    pub fn factory(&self) -> MockFactory {
        MockFactory {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Fail the next connection attempts, one error each.
    pub fn fail_next_connects(&self, errors: impl IntoIterator<Item = BackendError>) {
        self.shared.state.lock().connect_script.extend(errors);
    }

    /// Fail every connection attempt with `error` until called with `None`.
    pub fn refuse_connections(&self, error: Option<BackendError>) {
        self.shared.state.lock().connect_failure = error;
    }

    /// Fail the next pings, one error each.
    pub fn fail_next_probes(&self, errors: impl IntoIterator<Item = BackendError>) {
        self.shared.state.lock().probe_script.extend(errors);
    }

    /// Fail every ping with `error` until called with `None`.
    pub fn fail_probes(&self, error: Option<BackendError>) {
        self.shared.state.lock().probe_failure = error;
    }

    /// Fail the next non-ping operations, one error each.
    pub fn fail_next_operations(&self, errors: impl IntoIterator<Item = BackendError>) {
        self.shared.state.lock().operation_script.extend(errors);
    }

    /// Delay every session call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.shared.state.lock().latency = latency;
    }

    /// Snapshot the counters.
    #[must_use]
    pub fn stats(&self) -> MockStats {
        let s = &self.shared;
        MockStats {
            live: s.live.load(Ordering::SeqCst),
            peak_live: s.peak_live.load(Ordering::SeqCst),
            peak_busy: s.peak_busy.load(Ordering::SeqCst),
            created: s.created.load(Ordering::SeqCst),
            destroyed: s.destroyed.load(Ordering::SeqCst),
            pings: s.pings.load(Ordering::SeqCst),
            operations: s.operations.load(Ordering::SeqCst),
        }
    }

    /// Run `f` with exclusive access to the document store.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut MemoryStore) -> R) -> R {
        f(&mut self.shared.state.lock().store)
    }

    /// A copy of every document in a collection.
    #[must_use]
    pub fn documents(&self, namespace: &Namespace) -> Vec<Document> {
        self.shared.state.lock().store.documents(namespace)
    }

    /// URIs passed to the factory, oldest first.
    #[must_use]
    pub fn connected_uris(&self) -> Vec<String> {
        self.shared.state.lock().connected_uris.clone()
    }
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Opens [`MockSession`]s against a [`MockBackend`].
#[derive(Clone)]
pub struct MockFactory {
    shared: Arc<Shared>,
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    type Session = MockSession;

    async fn connect(&self, uri: &ConnectionUri) -> Result<MockSession, BackendError> {
        {
            let mut state = self.shared.state.lock();
            state.connected_uris.push(uri.to_string());
            if let Some(error) = state.connect_script.pop_front() {
                return Err(error);
            }
            if let Some(error) = &state.connect_failure {
                return Err(error.clone());
            }
        }

        let shared = &self.shared;
        let id = shared.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        shared.created.fetch_add(1, Ordering::SeqCst);
        let live = shared.live.fetch_add(1, Ordering::SeqCst) + 1;
        shared.peak_live.fetch_max(live, Ordering::SeqCst);
        tracing::trace!(session = id, live, "mock session opened");

        Ok(MockSession {
            id,
            shared: Arc::clone(shared),
        })
    }
}

/// One session against a [`MockBackend`].
pub struct MockSession {
    id: u64,
    shared: Arc<Shared>,
}

impl MockSession {
    /// Backend-assigned session number, starting at 1.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    async fn execute(&self, operation: &Operation) -> Result<Reply, BackendError> {
        let latency = self.shared.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if operation.is_ping() {
            self.shared.pings.fetch_add(1, Ordering::SeqCst);
            let mut state = self.shared.state.lock();
            if let Some(error) = state.probe_script.pop_front() {
                return Err(error);
            }
            if let Some(error) = &state.probe_failure {
                return Err(error.clone());
            }
            return state.store.apply(operation);
        }

        self.shared.operations.fetch_add(1, Ordering::SeqCst);
        let mut state = self.shared.state.lock();
        if let Some(error) = state.operation_script.pop_front() {
            return Err(error);
        }
        state.store.apply(operation)
    }
}

#[async_trait]
impl Session for MockSession {
    async fn run(&mut self, operation: &Operation) -> Result<Reply, BackendError> {
        let _busy = Busy::enter(&self.shared);
        self.execute(operation).await
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.shared.live.fetch_sub(1, Ordering::SeqCst);
        self.shared.destroyed.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(session = self.id, "mock session closed");
    }
}

impl std::fmt::Debug for MockSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSession").field("id", &self.id).finish()
    }
}

// Tracks calls in flight; leaves on drop so abandoned calls are counted out.
struct Busy<'a> {
    shared: &'a Shared,
}

impl<'a> Busy<'a> {
    fn enter(shared: &'a Shared) -> Self {
        let busy = shared.busy.fetch_add(1, Ordering::SeqCst) + 1;
        shared.peak_busy.fetch_max(busy, Ordering::SeqCst);
        Self { shared }
    }
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.shared.busy.fetch_sub(1, Ordering::SeqCst);
    }
}
