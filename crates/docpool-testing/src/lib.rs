//! # docpool-testing
//!
//! Test infrastructure for docpool.
//!
//! This crate provides a scripted in-process backend that implements
//! docpool's [`ConnectionFactory`](docpool::ConnectionFactory) and
//! [`Session`](docpool::Session) traits, so pool behaviour can be tested
//! without a database server.
//!
//! ## Features
//!
//! - Shared counters for opened, closed and concurrently busy sessions
//! - Scripted connect, probe and operation failures
//! - Persistent outages and per-call latency
//! - An in-memory document store for facade tests
//! - Fixture helpers for seeding data
//!
//! ## Example
//!
//! ```rust,ignore
//! use docpool::{BackendError, Pool};
//! use docpool_testing::MockBackend;
//!
//! #[tokio::test]
//! async fn test_recovers_from_election() {
//!     let backend = MockBackend::new();
//!     backend.fail_next_probes([BackendError::server_selection("election")]);
//!
//!     let pool = Pool::builder(backend.factory())
//!         .uri("mongodb://mock.test/app")
//!         .min_connections(0)
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     let conn = pool.get().await.unwrap();
//!     assert_eq!(backend.stats().pings, 2);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock;
pub mod store;

pub use fixtures::{TestFixture, doc};
pub use mock::{MockBackend, MockFactory, MockSession, MockStats};
pub use store::MemoryStore;
