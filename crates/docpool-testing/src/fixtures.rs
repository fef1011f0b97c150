//! Test fixture utilities.

use docpool::{Document, Namespace};
use serde_json::Value;

use crate::mock::MockBackend;

/// Host name used in fixture URIs.
pub const MOCK_HOST: &str = "mock.test";

/// Build a [`Document`] from a `serde_json::json!` object literal.
///
/// # Panics
///
/// Panics if `value` is not a JSON object.
#[must_use]
#[allow(clippy::panic)]
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("fixture documents must be JSON objects, got {other}"),
    }
}

/// A database with pre-seeded collections.
#[derive(Debug, Clone)]
pub struct TestFixture {
    /// Database name.
    pub database: String,
    /// Collections to seed, with their documents.
    pub collections: Vec<(String, Vec<Document>)>,
}

impl TestFixture {
    /// Create a new test fixture.
    #[must_use]
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collections: Vec::new(),
        }
    }

    /// Add a collection to seed.
    #[must_use]
    pub fn with_collection(mut self, name: impl Into<String>, documents: Vec<Document>) -> Self {
        self.collections.push((name.into(), documents));
        self
    }

    /// Namespace of a collection in this fixture's database.
    #[must_use]
    pub fn namespace(&self, collection: &str) -> Namespace {
        Namespace::new(self.database.clone(), collection)
    }

    /// Connection URI pointing at this fixture's database.
    #[must_use]
    pub fn uri(&self) -> String {
        format!("mongodb://{MOCK_HOST}:27017/{}", self.database)
    }

    /// Connection URI with extra query options, e.g. `"maxPoolSize=2"`.
    #[must_use]
    pub fn uri_with(&self, options: &str) -> String {
        format!("{}?{options}", self.uri())
    }

    /// Load the fixture's documents into `backend`.
    pub fn seed(&self, backend: &MockBackend) {
        backend.with_store(|store| {
            for (name, documents) in &self.collections {
                store.seed(&self.namespace(name), documents.iter().cloned());
            }
        });
    }
}
