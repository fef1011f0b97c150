//! Connection pool implementation.
//!
//! # Accounting
//!
//! Every unit of capacity is in exactly one place at any time:
//!
//! ```text
//! idle + quarantined + permits + in_use + pending == capacity
//! ```
//!
//! `pending` counts slots held by an acquiring task that is probing a
//! quarantined connection or creating a new one. All transitions happen
//! under one short critical section; probes, connects, backoff sleeps and
//! session teardown run outside it.
//!
//! A semaphore with `capacity` slots gates checkout. A task holding a slot
//! is guaranteed to find an idle connection, a quarantined connection or a
//! creation permit, because at most `capacity - 1` other slots can be
//! accounted as `in_use` or `pending`.

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::classify::{DefaultClassifier, ErrorClassifier, Health};
use crate::config::PoolConfig;
use crate::connection::{Connection, ConnectionFactory, Session};
use crate::error::{BackendError, PoolError};
use crate::uri::ConnectionUri;

/// A health-aware connection pool.
///
/// Cloning is cheap; clones share the same connections.
pub struct Pool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F::Session>>,
    factory: Arc<F>,
}

struct PoolInner<S> {
    uri: Arc<ConnectionUri>,
    config: PoolConfig,
    classifier: Arc<dyn ErrorClassifier>,
    state: Mutex<PoolState<S>>,
    slots: Arc<Semaphore>,
    counters: Counters,
}

struct PoolState<S> {
    idle: VecDeque<Connection<S>>,
    quarantine: VecDeque<Connection<S>>,
    permits: u32,
    in_use: u32,
    pending: u32,
    closed: bool,
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    destroyed: AtomicU64,
    probe_failures: AtomicU64,
    retries: AtomicU64,
    quarantined: AtomicU64,
}

enum Step<S> {
    Ready(Connection<S>),
    Probe(Connection<S>),
    Create,
}

/// Builder for a [`Pool`].
pub struct PoolBuilder<F> {
    factory: F,
    uri: Option<String>,
    config: PoolConfig,
    classifier: Arc<dyn ErrorClassifier>,
}

impl<F: ConnectionFactory> PoolBuilder<F> {
    /// Set the target connection URI (required).
    #[must_use]
    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    /// Replace the whole pool configuration.
    #[must_use]
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, count: u32) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the number of connections to pre-create.
    #[must_use]
    pub fn min_connections(mut self, count: u32) -> Self {
        self.config.min_connections = count;
        self
    }

    /// Set the cumulative backoff budget for one acquire.
    #[must_use]
    pub fn retry_timeout(mut self, timeout: Duration) -> Self {
        self.config.retry_timeout = timeout;
        self
    }

    /// Set the maximum time to wait for a free slot.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout = Some(timeout);
        self
    }

    /// Use a custom error classifier.
    #[must_use]
    pub fn classifier(mut self, classifier: impl ErrorClassifier + 'static) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    /// Validate the configuration, create the pool and pre-warm it.
    ///
    /// Pool options in the URI query string take precedence over the
    /// builder configuration. Pre-warm failures are logged, never fatal.
    pub async fn build(self) -> Result<Pool<F>, PoolError> {
        let raw = self
            .uri
            .ok_or_else(|| PoolError::Configuration("connection uri is required".into()))?;
        let uri = ConnectionUri::parse(&raw)?;
        let config = self.config.apply_uri_options(&uri)?;
        config.validate()?;

        let capacity = config.max_connections;
        let pool = Pool {
            inner: Arc::new(PoolInner {
                uri: Arc::new(uri),
                state: Mutex::new(PoolState {
                    idle: VecDeque::with_capacity(capacity as usize),
                    quarantine: VecDeque::new(),
                    permits: capacity,
                    in_use: 0,
                    pending: 0,
                    closed: false,
                }),
                slots: Arc::new(Semaphore::new(capacity as usize)),
                classifier: self.classifier,
                counters: Counters::default(),
                config,
            }),
            factory: Arc::new(self.factory),
        };

        pool.prewarm().await;

        tracing::info!(
            uri = %pool.inner.uri,
            max_connections = capacity,
            idle = pool.status().idle,
            "connection pool created"
        );
        Ok(pool)
    }
}

impl<F: ConnectionFactory> Pool<F> {
    /// Start building a pool around a connection factory.
    pub fn builder(factory: F) -> PoolBuilder<F> {
        PoolBuilder {
            factory,
            uri: None,
            config: PoolConfig::default(),
            classifier: Arc::new(DefaultClassifier),
        }
    }

    /// Create a pool with the default classifier.
    pub async fn new(uri: &str, config: PoolConfig, factory: F) -> Result<Self, PoolError> {
        Self::builder(factory).uri(uri).config(config).build().await
    }

    /// Get a connection from the pool.
    ///
    /// Returns an idle connection immediately if there is one. Otherwise
    /// re-probes a quarantined connection or creates a new one, backing
    /// off on transient failures. Waits for a release when every slot is
    /// checked out.
    ///
    /// # Errors
    ///
    /// - [`PoolError::PoolClosed`] if the pool is or becomes closed
    /// - [`PoolError::AcquisitionTimeout`] if `acquire_timeout` elapses
    ///   while waiting for a slot
    /// - [`PoolError::PoolExhausted`] if transient failures outlast
    ///   `retry_timeout`
    /// - [`PoolError::ConnectionCreation`] if a new connection cannot be
    ///   established at all
    pub async fn get(&self) -> Result<PooledConnection<F::Session>, PoolError> {
        let slot = self.acquire_slot().await?;
        self.checkout(slot).await
    }

    /// Like [`Pool::get`], but gives up with [`PoolError::Cancelled`] when
    /// `token` is cancelled, including mid-backoff.
    pub async fn get_cancellable(
        &self,
        token: &CancellationToken,
    ) -> Result<PooledConnection<F::Session>, PoolError> {
        tokio::select! {
            biased;
            () = token.cancelled() => Err(PoolError::Cancelled),
            result = self.get() => result,
        }
    }

    /// Get an idle connection without waiting or doing I/O.
    ///
    /// Returns `Ok(None)` if no idle connection is available right now.
    pub fn try_get(&self) -> Result<Option<PooledConnection<F::Session>>, PoolError> {
        let slot = match Arc::clone(&self.inner.slots).try_acquire_owned() {
            Ok(slot) => slot,
            Err(TryAcquireError::Closed) => return Err(PoolError::PoolClosed),
            Err(TryAcquireError::NoPermits) => return Ok(None),
        };

        let conn = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(PoolError::PoolClosed);
            }
            let Some(mut conn) = state.idle.pop_front() else {
                return Ok(None);
            };
            state.in_use += 1;
            conn.metadata_mut().mark_checkout();
            conn
        };

        tracing::trace!(connection = conn.id(), "checked out idle connection");
        Ok(Some(PooledConnection::new(
            Arc::clone(&self.inner),
            conn,
            slot,
        )))
    }

    /// Return a connection to the pool.
    ///
    /// Equivalent to dropping the guard, except that returning to a closed
    /// pool is reported. The connection is destroyed in that case.
    pub fn release(&self, conn: PooledConnection<F::Session>) -> Result<(), PoolError> {
        conn.release()
    }

    /// Close the pool.
    ///
    /// Idle and quarantined connections are destroyed now. Connections that
    /// are checked out or being probed are destroyed when they come back.
    /// Waiting and future acquires fail with [`PoolError::PoolClosed`].
    pub fn close(&self) {
        let drained: Vec<_> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let mut drained: Vec<_> = state.idle.drain(..).collect();
            drained.extend(state.quarantine.drain(..));
            state.permits += drained.len() as u32;
            drained
        };
        self.inner.slots.close();

        let count = drained.len();
        for conn in drained {
            self.inner.destroy(conn, "pool closed");
        }
        tracing::info!(destroyed = count, "connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            idle: state.idle.len() as u32,
            quarantined: state.quarantine.len() as u32,
            permits: state.permits,
            in_use: state.in_use,
            pending: state.pending,
            capacity: self.inner.config.max_connections,
        }
    }

    /// Get lifetime counters.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let c = &self.inner.counters;
        PoolMetrics {
            connections_created: c.created.load(Ordering::Relaxed),
            connections_destroyed: c.destroyed.load(Ordering::Relaxed),
            probe_failures: c.probe_failures.load(Ordering::Relaxed),
            retries: c.retries.load(Ordering::Relaxed),
            quarantined: c.quarantined.load(Ordering::Relaxed),
        }
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Get the target URI.
    #[must_use]
    pub fn uri(&self) -> &ConnectionUri {
        &self.inner.uri
    }

    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit, PoolError> {
        if self.inner.state.lock().closed {
            return Err(PoolError::PoolClosed);
        }
        let acquire = Arc::clone(&self.inner.slots).acquire_owned();
        match self.inner.config.acquire_timeout {
            Some(limit) => match tokio::time::timeout(limit, acquire).await {
                Ok(result) => result.map_err(|_| PoolError::PoolClosed),
                Err(_) => {
                    tracing::warn!(timeout = ?limit, "timed out waiting for a connection");
                    Err(PoolError::AcquisitionTimeout(limit))
                }
            },
            None => acquire.await.map_err(|_| PoolError::PoolClosed),
        }
    }

    async fn checkout(
        &self,
        slot: OwnedSemaphorePermit,
    ) -> Result<PooledConnection<F::Session>, PoolError> {
        let inner = &self.inner;
        let mut backoff = Backoff::from_config(&inner.config);

        loop {
            let Some(step) = inner.next_step()? else {
                // Not reachable while `slot` is held; yield rather than spin hot.
                tokio::task::yield_now().await;
                continue;
            };

            let error = match step {
                Step::Ready(conn) => {
                    tracing::trace!(connection = conn.id(), "checked out idle connection");
                    return Ok(PooledConnection::new(Arc::clone(inner), conn, slot));
                }
                Step::Probe(conn) => {
                    let mut in_flight = InFlight::new(inner, Some(conn));
                    match in_flight.probe().await {
                        Ok(()) => {
                            let conn = in_flight.check_out()?;
                            tracing::debug!(connection = conn.id(), "quarantined connection recovered");
                            return Ok(PooledConnection::new(Arc::clone(inner), conn, slot));
                        }
                        Err(error) => match inner.classifier.classify(&error) {
                            Health::Healthy => {
                                let conn = in_flight.check_out()?;
                                return Ok(PooledConnection::new(Arc::clone(inner), conn, slot));
                            }
                            Health::Transient => {
                                in_flight.requarantine();
                                error
                            }
                            Health::Terminal => {
                                tracing::warn!(%error, "quarantined connection is broken, discarding");
                                drop(in_flight);
                                continue;
                            }
                        },
                    }
                }
                Step::Create => {
                    let mut in_flight = InFlight::new(inner, None);
                    let session = match self.factory.connect(&inner.uri).await {
                        Ok(session) => session,
                        Err(error) => match inner.classifier.classify(&error) {
                            Health::Transient => {
                                drop(in_flight);
                                tracing::warn!(%error, "connection attempt failed, will retry");
                                self.backoff(&mut backoff, error).await?;
                                continue;
                            }
                            Health::Healthy | Health::Terminal => {
                                drop(in_flight);
                                tracing::error!(%error, "failed to create connection");
                                return Err(PoolError::ConnectionCreation(error));
                            }
                        },
                    };
                    inner.counters.created.fetch_add(1, Ordering::Relaxed);
                    let id = in_flight.attach(Connection::new(session, Arc::clone(&inner.uri)));
                    tracing::debug!(connection = id, "created connection");

                    match in_flight.probe().await {
                        Ok(()) => {
                            let conn = in_flight.check_out()?;
                            return Ok(PooledConnection::new(Arc::clone(inner), conn, slot));
                        }
                        Err(error) => match inner.classifier.classify(&error) {
                            Health::Healthy => {
                                let conn = in_flight.check_out()?;
                                return Ok(PooledConnection::new(Arc::clone(inner), conn, slot));
                            }
                            Health::Transient => {
                                drop(in_flight);
                                error
                            }
                            Health::Terminal => {
                                drop(in_flight);
                                tracing::error!(%error, "new connection failed its first probe");
                                return Err(PoolError::ConnectionCreation(error));
                            }
                        },
                    }
                }
            };

            tracing::warn!(%error, "backend unreachable, backing off");
            self.backoff(&mut backoff, error).await?;
        }
    }

    async fn backoff(&self, backoff: &mut Backoff, error: BackendError) -> Result<(), PoolError> {
        let Some(delay) = backoff.next_delay() else {
            tracing::error!(
                elapsed = ?backoff.elapsed(),
                attempts = backoff.attempts(),
                %error,
                "retry budget exhausted"
            );
            return Err(PoolError::PoolExhausted {
                elapsed: backoff.elapsed(),
                last_error: error,
            });
        };
        self.inner.counters.retries.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(?delay, attempt = backoff.attempts(), "retrying after backoff");
        tokio::time::sleep(delay).await;
        Ok(())
    }

    async fn prewarm(&self) {
        let inner = &self.inner;
        for _ in 0..inner.config.min_connections {
            {
                let mut state = inner.state.lock();
                if state.closed || state.permits == 0 {
                    return;
                }
                state.permits -= 1;
                state.pending += 1;
            }
            let mut in_flight = InFlight::new(inner, None);
            match self.factory.connect(&inner.uri).await {
                Ok(session) => {
                    inner.counters.created.fetch_add(1, Ordering::Relaxed);
                    in_flight.attach(Connection::new(session, Arc::clone(&inner.uri)));
                }
                Err(error) => {
                    tracing::warn!(%error, "pre-warm connection failed");
                    return;
                }
            }
            if let Err(error) = in_flight.probe().await {
                tracing::warn!(%error, "pre-warm probe failed");
                return;
            }
            in_flight.park_idle();
        }
    }
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("uri", &self.inner.uri)
            .field("config", &self.inner.config)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl<S: Session> PoolInner<S> {
    /// Pick the next thing to do for a caller holding a slot.
    fn next_step(&self) -> Result<Option<Step<S>>, PoolError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::PoolClosed);
        }
        if let Some(mut conn) = state.idle.pop_front() {
            state.in_use += 1;
            conn.metadata_mut().mark_checkout();
            return Ok(Some(Step::Ready(conn)));
        }
        if let Some(mut conn) = state.quarantine.pop_front() {
            state.pending += 1;
            conn.metadata_mut().mark_probing();
            return Ok(Some(Step::Probe(conn)));
        }
        if state.permits > 0 {
            state.permits -= 1;
            state.pending += 1;
            return Ok(Some(Step::Create));
        }
        Ok(None)
    }

    /// Route a returned connection by the classifier's verdict.
    fn check_in(&self, mut conn: Connection<S>) -> Result<(), PoolError> {
        let health = if conn.is_interrupted() {
            Health::Terminal
        } else {
            self.classifier.classify_outcome(conn.last_error())
        };

        let mut state = self.state.lock();
        state.in_use -= 1;
        if state.closed {
            state.permits += 1;
            drop(state);
            self.destroy(conn, "returned to closed pool");
            return Err(PoolError::PoolClosed);
        }

        match health {
            Health::Healthy => {
                conn.clear_error();
                conn.metadata_mut().mark_checkin();
                tracing::trace!(connection = conn.id(), "returned connection to idle");
                state.idle.push_back(conn);
            }
            Health::Transient => {
                let error = conn.last_error().cloned();
                conn.clear_error();
                conn.metadata_mut().mark_quarantined();
                self.counters.quarantined.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    connection = conn.id(),
                    error = ?error,
                    "connection quarantined after transient error"
                );
                state.quarantine.push_back(conn);
            }
            Health::Terminal => {
                state.permits += 1;
                drop(state);
                self.destroy(conn, "terminal error");
            }
        }
        Ok(())
    }

    fn detach(&self, mut conn: Connection<S>) -> Connection<S> {
        {
            let mut state = self.state.lock();
            state.in_use -= 1;
            state.permits += 1;
        }
        conn.metadata_mut().mark_standalone();
        tracing::debug!(connection = conn.id(), "connection detached from pool");
        conn
    }

    fn destroy(&self, conn: Connection<S>, reason: &'static str) {
        self.counters.destroyed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            connection = conn.id(),
            last_error = ?conn.last_error(),
            reason,
            "destroying connection"
        );
        drop(conn);
    }
}

/// A slot held by an acquiring task while it probes or creates.
///
/// Dropping it unresolved (failure or cancellation) destroys the
/// connection, if any, and returns the creation permit.
struct InFlight<'a, S: Session> {
    inner: &'a PoolInner<S>,
    conn: Option<Connection<S>>,
    resolved: bool,
}

impl<'a, S: Session> InFlight<'a, S> {
    fn new(inner: &'a PoolInner<S>, conn: Option<Connection<S>>) -> Self {
        Self {
            inner,
            conn,
            resolved: false,
        }
    }

    fn attach(&mut self, mut conn: Connection<S>) -> u64 {
        conn.metadata_mut().mark_probing();
        let id = conn.id();
        self.conn = Some(conn);
        id
    }

    async fn probe(&mut self) -> Result<(), BackendError> {
        let database = Arc::clone(&self.inner.config.probe_database);
        let Some(conn) = self.conn.as_mut() else {
            return Ok(());
        };
        let result = conn.probe(&database).await;
        if let Err(error) = &result {
            self.inner
                .counters
                .probe_failures
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(connection = conn.id(), %error, "probe failed");
        }
        result
    }

    /// Hand the connection to the caller.
    fn check_out(mut self) -> Result<Connection<S>, PoolError> {
        let Some(mut conn) = self.conn.take() else {
            return Err(PoolError::PoolClosed);
        };
        self.resolved = true;
        let mut state = self.inner.state.lock();
        state.pending -= 1;
        if state.closed {
            state.permits += 1;
            drop(state);
            self.inner.destroy(conn, "pool closed during probe");
            return Err(PoolError::PoolClosed);
        }
        state.in_use += 1;
        drop(state);
        conn.clear_error();
        conn.metadata_mut().mark_checkout();
        Ok(conn)
    }

    /// Put the connection back in quarantine for a later re-probe.
    fn requarantine(mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        self.resolved = true;
        let mut state = self.inner.state.lock();
        state.pending -= 1;
        if state.closed {
            state.permits += 1;
            drop(state);
            self.inner.destroy(conn, "pool closed during probe");
            return;
        }
        conn.clear_error();
        conn.metadata_mut().mark_quarantined();
        self.inner.counters.quarantined.fetch_add(1, Ordering::Relaxed);
        state.quarantine.push_back(conn);
    }

    /// Put a freshly created connection in the idle queue.
    fn park_idle(mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        self.resolved = true;
        let mut state = self.inner.state.lock();
        state.pending -= 1;
        if state.closed {
            state.permits += 1;
            drop(state);
            self.inner.destroy(conn, "pool closed during warm-up");
            return;
        }
        conn.metadata_mut().mark_checkin();
        state.idle.push_back(conn);
    }
}

impl<S: Session> Drop for InFlight<'_, S> {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        {
            let mut state = self.inner.state.lock();
            state.pending -= 1;
            state.permits += 1;
        }
        if let Some(conn) = self.conn.take() {
            self.inner.destroy(conn, "abandoned during acquire");
        }
    }
}

/// A connection checked out of the pool.
///
/// Dereferences to [`Connection`]. Dropping the guard returns the
/// connection to the pool, routed by its last error.
pub struct PooledConnection<S: Session> {
    pool: Arc<PoolInner<S>>,
    conn: Option<Connection<S>>,
    slot: Option<OwnedSemaphorePermit>,
}

impl<S: Session> PooledConnection<S> {
    fn new(pool: Arc<PoolInner<S>>, conn: Connection<S>, slot: OwnedSemaphorePermit) -> Self {
        Self {
            pool,
            conn: Some(conn),
            slot: Some(slot),
        }
    }

    /// Return the connection to the pool now.
    ///
    /// Fails with [`PoolError::PoolClosed`] if the pool was closed in the
    /// meantime; the connection is destroyed either way.
    pub fn release(mut self) -> Result<(), PoolError> {
        self.check_in()
    }

    /// Remove the connection from the pool.
    ///
    /// Its capacity is handed back so the pool can create a replacement.
    #[must_use]
    pub fn detach(mut self) -> Connection<S> {
        let conn = self.conn.take().unwrap_or_else(|| already_returned());
        let conn = self.pool.detach(conn);
        self.slot.take();
        conn
    }

    fn check_in(&mut self) -> Result<(), PoolError> {
        let Some(conn) = self.conn.take() else {
            return Ok(());
        };
        let result = self.pool.check_in(conn);
        // Free the slot only after the connection is back in a queue.
        self.slot.take();
        result
    }
}

// `conn` is only taken by `release`, `detach` and `drop`, which all
// consume the guard.
#[allow(clippy::panic)]
fn already_returned() -> ! {
    panic!("pooled connection already returned")
}

impl<S: Session> Deref for PooledConnection<S> {
    type Target = Connection<S>;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().unwrap_or_else(|| already_returned())
    }
}

impl<S: Session> DerefMut for PooledConnection<S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().unwrap_or_else(|| already_returned())
    }
}

impl<S: Session> Drop for PooledConnection<S> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            if let Some(conn) = self.conn.as_mut() {
                // The caller never reported an outcome.
                conn.mark_interrupted();
            }
        }
        let _ = self.check_in();
    }
}

impl<S: Session> fmt::Debug for PooledConnection<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("conn", &self.conn)
            .finish_non_exhaustive()
    }
}

/// Snapshot of where the pool's capacity currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections ready for immediate reuse.
    pub idle: u32,
    /// Connections waiting for a re-probe.
    pub quarantined: u32,
    /// Connections that may still be created.
    pub permits: u32,
    /// Connections checked out by callers.
    pub in_use: u32,
    /// Slots held by acquires that are probing or creating.
    pub pending: u32,
    /// Maximum connections.
    pub capacity: u32,
}

impl PoolStatus {
    /// Number of connections that currently exist (or are being created).
    #[must_use]
    pub fn total(&self) -> u32 {
        self.idle + self.quarantined + self.in_use + self.pending
    }

    /// Check the conservation invariant.
    #[must_use]
    pub fn is_conserved(&self) -> bool {
        self.total() + self.permits == self.capacity
    }
}

/// Lifetime counters for a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolMetrics {
    /// Sessions opened by the factory.
    pub connections_created: u64,
    /// Connections destroyed by the pool.
    pub connections_destroyed: u64,
    /// Probes that failed.
    pub probe_failures: u64,
    /// Backoff sleeps taken.
    pub retries: u64,
    /// Times a connection entered quarantine.
    pub quarantined: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::operation::{Operation, Reply};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Backend {
        live: AtomicUsize,
        created: AtomicUsize,
        ping_failure: Mutex<Option<BackendError>>,
        connect_failure: Mutex<Option<BackendError>>,
    }

    struct FakeSession {
        backend: Arc<Backend>,
    }

    impl Drop for FakeSession {
        fn drop(&mut self) {
            self.backend.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Session for FakeSession {
        async fn run(&mut self, operation: &Operation) -> Result<Reply, BackendError> {
            let failure = self.backend.ping_failure.lock().clone();
            match failure {
                Some(error) if operation.is_ping() => Err(error),
                _ => Ok(Reply::Ack),
            }
        }
    }

    struct FakeFactory {
        backend: Arc<Backend>,
    }

    #[async_trait]
    impl ConnectionFactory for FakeFactory {
        type Session = FakeSession;

        async fn connect(&self, _uri: &ConnectionUri) -> Result<FakeSession, BackendError> {
            let failure = self.backend.connect_failure.lock().clone();
            if let Some(error) = failure {
                return Err(error);
            }
            self.backend.created.fetch_add(1, Ordering::SeqCst);
            self.backend.live.fetch_add(1, Ordering::SeqCst);
            Ok(FakeSession {
                backend: Arc::clone(&self.backend),
            })
        }
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn builder(backend: &Arc<Backend>, capacity: u32) -> PoolBuilder<FakeFactory> {
        Pool::builder(FakeFactory {
            backend: Arc::clone(backend),
        })
        .uri("mongodb://localhost:27017/app")
        .min_connections(0)
        .max_connections(capacity)
    }

    #[tokio::test]
    async fn test_build_requires_uri() {
        let backend = Arc::new(Backend::default());
        let result = Pool::builder(FakeFactory { backend }).build().await;
        assert!(matches!(result, Err(PoolError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let backend = Arc::new(Backend::default());
        let result = builder(&backend, 0).build().await;
        assert!(matches!(result, Err(PoolError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_uri_options_override_builder() {
        let backend = Arc::new(Backend::default());
        let pool = builder(&backend, 10)
            .uri("mongodb://localhost/app?maxPoolSize=3")
            .build()
            .await
            .unwrap();
        assert_eq!(pool.config().max_connections, 3);
        assert_eq!(pool.status().capacity, 3);
    }

    #[tokio::test]
    async fn test_prewarm_creates_min_connections() {
        let backend = Arc::new(Backend::default());
        let pool = builder(&backend, 4).min_connections(2).build().await.unwrap();
        let status = pool.status();
        assert_eq!(status.idle, 2);
        assert_eq!(status.permits, 2);
        assert!(status.is_conserved());
        assert_eq!(backend.live.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_prewarm_failure_is_not_fatal() {
        let backend = Arc::new(Backend::default());
        *backend.connect_failure.lock() = Some(BackendError::server_selection("no primary"));
        let pool = builder(&backend, 4).min_connections(2).build().await.unwrap();
        let status = pool.status();
        assert_eq!(status.idle, 0);
        assert_eq!(status.permits, 4);
    }

    #[tokio::test]
    async fn test_prewarm_transient_probe_failure_destroys_connection() {
        let backend = Arc::new(Backend::default());
        *backend.ping_failure.lock() = Some(BackendError::server_selection("no primary"));
        let pool = builder(&backend, 4).min_connections(2).build().await.unwrap();

        let status = pool.status();
        assert_eq!(status.quarantined, 0);
        assert_eq!(status.idle, 0);
        assert_eq!(status.permits, 4);
        assert!(status.is_conserved());
        // Warm-up stops at the first failure.
        assert_eq!(backend.created.load(Ordering::SeqCst), 1);
        assert_eq!(backend.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_healthy_connection_is_reused() {
        let backend = Arc::new(Backend::default());
        let pool = builder(&backend, 1).build().await.unwrap();

        let conn = pool.get().await.unwrap();
        let first = conn.id();
        drop(conn);

        let conn = pool.get().await.unwrap();
        assert_eq!(conn.id(), first);
        assert_eq!(conn.metadata().checkout_count, 2);
        assert_eq!(backend.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_operation_error_keeps_connection() {
        let backend = Arc::new(Backend::default());
        let pool = builder(&backend, 1).build().await.unwrap();

        let mut conn = pool.get().await.unwrap();
        let id = conn.id();
        conn.set_last_error(Some(BackendError::duplicate_key("dup")));
        drop(conn);

        assert_eq!(pool.status().idle, 1);
        let conn = pool.get().await.unwrap();
        assert_eq!(conn.id(), id);
        assert!(conn.last_error().is_none());
    }

    #[tokio::test]
    async fn test_terminal_error_destroys_and_frees_permit() {
        let backend = Arc::new(Backend::default());
        let pool = builder(&backend, 1)
            .classifier(|_: &BackendError| Health::Terminal)
            .build()
            .await
            .unwrap();

        for _ in 0..5 {
            let mut conn = pool.get().await.unwrap();
            let id = conn.id();
            conn.set_last_error(Some(BackendError::network("connection reset")));
            drop(conn);

            let status = pool.status();
            assert_eq!(status.permits, 1);
            assert_eq!(status.idle, 0);
            assert!(status.is_conserved());
            assert_eq!(backend.live.load(Ordering::SeqCst), 0);

            let conn = pool.get().await.unwrap();
            assert_ne!(conn.id(), id);
        }
        assert_eq!(pool.metrics().connections_destroyed, 5);
    }

    #[tokio::test]
    async fn test_transient_error_quarantines_then_recovers() {
        let backend = Arc::new(Backend::default());
        let pool = builder(&backend, 1).build().await.unwrap();

        let mut conn = pool.get().await.unwrap();
        let id = conn.id();
        conn.set_last_error(Some(BackendError::server_selection("no primary")));
        drop(conn);

        let status = pool.status();
        assert_eq!(status.quarantined, 1);
        assert!(status.is_conserved());

        let conn = pool.get().await.unwrap();
        assert_eq!(conn.id(), id);
        assert_eq!(conn.metadata().quarantine_count, 1);
        assert!(conn.metadata().last_probed_at.is_some());
        assert_eq!(pool.metrics().quarantined, 1);
    }

    #[tokio::test]
    async fn test_quarantined_connection_discarded_when_probe_is_terminal() {
        let backend = Arc::new(Backend::default());
        let pool = builder(&backend, 1).build().await.unwrap();

        let mut conn = pool.get().await.unwrap();
        let id = conn.id();
        conn.set_last_error(Some(BackendError::server_selection("no primary")));
        drop(conn);

        *backend.ping_failure.lock() = Some(BackendError::network("broken pipe"));
        // The replacement fails its first probe terminally too.
        let err = pool.get().await.unwrap_err();
        assert!(matches!(err, PoolError::ConnectionCreation(_)));

        *backend.ping_failure.lock() = None;
        let conn = pool.get().await.unwrap();
        assert_ne!(conn.id(), id);
        assert!(pool.status().is_conserved());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_exhaust_retry_budget() {
        init_tracing();
        let backend = Arc::new(Backend::default());
        *backend.ping_failure.lock() = Some(BackendError::server_selection("no primary"));
        let pool = builder(&backend, 2)
            .retry_timeout(Duration::from_millis(100))
            .build()
            .await
            .unwrap();

        let err = pool.get().await.unwrap_err();
        match err {
            PoolError::PoolExhausted { elapsed, last_error } => {
                assert_eq!(elapsed, Duration::from_millis(100));
                assert_eq!(last_error.kind(), ErrorKind::ServerSelection);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let status = pool.status();
        assert_eq!(status.permits, 2);
        assert_eq!(status.pending, 0);
        assert_eq!(backend.live.load(Ordering::SeqCst), 0);
        assert!(pool.metrics().retries > 0);
    }

    #[tokio::test]
    async fn test_fatal_connect_error() {
        let backend = Arc::new(Backend::default());
        *backend.connect_failure.lock() =
            Some(BackendError::new(ErrorKind::Authentication, 18, "auth failed"));
        let pool = builder(&backend, 1).build().await.unwrap();

        let err = pool.get().await.unwrap_err();
        assert!(matches!(err, PoolError::ConnectionCreation(_)));
        assert_eq!(pool.status().permits, 1);
    }

    #[tokio::test]
    async fn test_get_waits_for_a_free_slot() {
        let backend = Arc::new(Backend::default());
        let pool = builder(&backend, 1).build().await.unwrap();
        let held = pool.get().await.unwrap();
        let id = held.id();

        let mut waiting = tokio_test::task::spawn(pool.get());
        tokio_test::assert_pending!(waiting.poll());
        drop(held);
        assert!(waiting.is_woken());

        let conn = tokio_test::assert_ready_ok!(waiting.poll());
        assert_eq!(conn.id(), id);
        assert_eq!(backend.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_try_get() {
        let backend = Arc::new(Backend::default());
        let pool = builder(&backend, 1).min_connections(1).build().await.unwrap();

        let conn = pool.try_get().unwrap().expect("idle connection");
        assert!(pool.try_get().unwrap().is_none());
        drop(conn);
        assert!(pool.try_get().unwrap().is_some());

        let empty = builder(&backend, 1).build().await.unwrap();
        assert!(empty.try_get().unwrap().is_none());
        assert!(empty.status().is_conserved());
    }

    #[tokio::test]
    async fn test_release_after_close_destroys() {
        let backend = Arc::new(Backend::default());
        let pool = builder(&backend, 2).min_connections(2).build().await.unwrap();

        let conn = pool.get().await.unwrap();
        pool.close();
        assert!(pool.is_closed());
        assert_eq!(backend.live.load(Ordering::SeqCst), 1);

        assert!(matches!(pool.release(conn), Err(PoolError::PoolClosed)));
        assert_eq!(backend.live.load(Ordering::SeqCst), 0);
        assert!(matches!(pool.get().await, Err(PoolError::PoolClosed)));
        assert!(matches!(pool.try_get(), Err(PoolError::PoolClosed)));

        let status = pool.status();
        assert_eq!(status.permits, 2);
        assert!(status.is_conserved());
    }

    #[tokio::test]
    async fn test_close_drains_quarantine() {
        let backend = Arc::new(Backend::default());
        let pool = builder(&backend, 1).build().await.unwrap();

        let mut conn = pool.get().await.unwrap();
        conn.set_last_error(Some(BackendError::server_selection("no primary")));
        drop(conn);
        assert_eq!(pool.status().quarantined, 1);

        pool.close();
        assert_eq!(pool.status().quarantined, 0);
        assert_eq!(backend.live.load(Ordering::SeqCst), 0);
        pool.close();
    }

    #[tokio::test]
    async fn test_detach_returns_capacity() {
        let backend = Arc::new(Backend::default());
        let pool = builder(&backend, 1).build().await.unwrap();

        let conn = pool.get().await.unwrap().detach();
        assert_eq!(conn.state(), crate::lifecycle::ConnectionState::Standalone);
        let status = pool.status();
        assert_eq!(status.permits, 1);
        assert_eq!(status.in_use, 0);

        let other = pool.get().await.unwrap();
        assert_ne!(other.id(), conn.id());
        assert_eq!(backend.live.load(Ordering::SeqCst), 2);
        drop(conn);
        assert_eq!(backend.live.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_acquire_timeout() {
        let backend = Arc::new(Backend::default());
        let pool = builder(&backend, 1)
            .acquire_timeout(Duration::from_millis(20))
            .build()
            .await
            .unwrap();

        let _held = pool.get().await.unwrap();
        let err = pool.get().await.unwrap_err();
        assert!(matches!(err, PoolError::AcquisitionTimeout(_)));
    }

    #[tokio::test]
    async fn test_get_cancellable() {
        let backend = Arc::new(Backend::default());
        let pool = builder(&backend, 1).build().await.unwrap();
        let _held = pool.get().await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let err = pool.get_cancellable(&token).await.unwrap_err();
        assert!(matches!(err, PoolError::Cancelled));
        assert!(pool.status().is_conserved());
    }

    #[test]
    fn test_status_conservation() {
        let status = PoolStatus {
            idle: 1,
            quarantined: 1,
            permits: 1,
            in_use: 1,
            pending: 1,
            capacity: 5,
        };
        assert_eq!(status.total(), 4);
        assert!(status.is_conserved());
        assert!(!PoolStatus { capacity: 6, ..status }.is_conserved());
    }
}
