//! # docpool
//!
//! Health-aware connection pool for document-database clients.
//!
//! The pool never trusts a connection it cannot vouch for. Every new
//! connection is probed before it is handed out, and every returned
//! connection is routed by the error its last operation produced:
//!
//! - no error, or an error scoped to the operation (duplicate key, not
//!   found) puts it back in the idle queue
//! - a transient error (no server reachable) parks it in quarantine, to be
//!   re-probed by the next caller that needs a connection
//! - anything else destroys it and frees its capacity for a replacement
//!
//! While the backend is unreachable, callers back off exponentially up to
//! a configurable budget instead of failing immediately.
//!
//! ## Features
//!
//! - Bounded capacity with conservation of every slot
//! - Pluggable [`ErrorClassifier`]
//! - Optional pre-warm, acquire timeout and cancellation
//! - Pool options read from the connection URI
//! - A thin [`Database`] / [`Collection`] facade that always returns the
//!   connection, even when the caller's future is dropped
//!
//! ## Example
//!
//! ```rust,ignore
//! use docpool::Pool;
//!
//! let pool = Pool::builder(factory)
//!     .uri("mongodb://db1:27017,db2:27017/app?maxPoolSize=20")
//!     .min_connections(2)
//!     .build()
//!     .await?;
//!
//! let users = pool.database("app").collection("users");
//! users.insert_one(docpool::to_document(&serde_json::json!({"name": "ada"}))?).await?;
//! let total = users.count(docpool::Document::new()).await?;
//! ```
//!
//! The network driver plugs in through [`ConnectionFactory`] and
//! [`Session`].

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod backoff;
pub mod classify;
pub mod collection;
pub mod config;
pub mod connection;
pub mod error;
pub mod lifecycle;
pub mod operation;
pub mod pool;
pub mod sort;
pub mod uri;

pub use backoff::Backoff;
pub use classify::{DefaultClassifier, ErrorClassifier, Health};
pub use collection::{Collection, Database};
pub use config::PoolConfig;
pub use connection::{Connection, ConnectionFactory, Session};
pub use error::{BackendError, Error, ErrorKind, PoolError, Result};
pub use lifecycle::{ConnectionMetadata, ConnectionState};
pub use operation::{
    Document, FindAndModifyOptions, FindOptions, Namespace, Operation, Reply, UpdateOptions,
    from_document, to_document,
};
pub use pool::{Pool, PoolBuilder, PoolMetrics, PoolStatus, PooledConnection};
pub use sort::{format_sort, parse_sort};
pub use uri::{ConnectionUri, ServerAddress};
