//! Connection lifecycle tracking.
//!
//! Every connection carries a [`ConnectionMetadata`] record that the pool
//! updates as the connection moves between the idle queue, a caller, the
//! quarantine queue and the prober.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Where a connection currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// In the idle queue, believed healthy.
    Idle,
    /// Held by exactly one caller.
    CheckedOut,
    /// In the quarantine queue, waiting for a re-probe.
    Quarantined,
    /// Being probed by an acquiring caller.
    Probing,
    /// Not owned by a pool.
    Standalone,
}

impl ConnectionState {
    /// Check if the connection can be handed out without I/O.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Check if a caller or the prober currently owns the connection.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::CheckedOut | Self::Probing)
    }
}

/// Metadata about a connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Unique identifier for this connection.
    pub id: u64,
    /// When the connection was created.
    pub created_at: Instant,
    /// When the connection was last checked out or returned.
    pub last_used_at: Instant,
    /// When the connection last passed a probe.
    pub last_probed_at: Option<Instant>,
    /// Number of times the connection has been checked out.
    pub checkout_count: u64,
    /// Number of times the connection has been quarantined.
    pub quarantine_count: u64,
    /// Current state of the connection.
    pub state: ConnectionState,
}

impl ConnectionMetadata {
    /// Create metadata for a new connection with a fresh id.
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            created_at: now,
            last_used_at: now,
            last_probed_at: None,
            checkout_count: 0,
            quarantine_count: 0,
            state: ConnectionState::Standalone,
        }
    }

    /// Time since the connection was created.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the connection was last checked out or returned.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    /// Mark the connection as checked out.
    pub fn mark_checkout(&mut self) {
        self.last_used_at = Instant::now();
        self.checkout_count += 1;
        self.state = ConnectionState::CheckedOut;
    }

    /// Mark the connection as returned to idle.
    pub fn mark_checkin(&mut self) {
        self.last_used_at = Instant::now();
        self.state = ConnectionState::Idle;
    }

    /// Mark the connection as quarantined.
    pub fn mark_quarantined(&mut self) {
        self.quarantine_count += 1;
        self.state = ConnectionState::Quarantined;
    }

    /// Mark the connection as being probed.
    pub fn mark_probing(&mut self) {
        self.state = ConnectionState::Probing;
    }

    /// Record a successful probe.
    pub fn mark_probed(&mut self) {
        self.last_probed_at = Some(Instant::now());
    }

    /// Mark the connection as no longer owned by a pool.
    pub fn mark_standalone(&mut self) {
        self.state = ConnectionState::Standalone;
    }
}

impl Default for ConnectionMetadata {
    fn default() -> Self {
        Self::new()
    }
}
