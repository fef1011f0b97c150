//! Backend operations.
//!
//! An [`Operation`] is exactly one backend call. The facade builds one,
//! hands it to a checked-out [`Session`](crate::connection::Session), and
//! interprets the [`Reply`]. Encoding operations for the wire is the
//! driver's job.

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::Error;

/// A document: an ordered map of field names to values.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Convert a serializable value into a [`Document`].
///
/// Fails if the value does not serialize to a JSON object.
pub fn to_document<T: Serialize + ?Sized>(value: &T) -> Result<Document, Error> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(Error::Decode(<serde_json::Error as serde::ser::Error>::custom(
            "value does not serialize to a document",
        ))),
    }
}

/// Convert a [`Document`] into a typed value.
pub fn from_document<T: DeserializeOwned>(document: Document) -> Result<T, Error> {
    Ok(serde_json::from_value(serde_json::Value::Object(document))?)
}

/// A fully qualified collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    /// Database name.
    pub database: String,
    /// Collection name.
    pub collection: String,
}

impl Namespace {
    /// Create a namespace.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Paging for `find`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindOptions {
    /// Documents to skip.
    pub skip: u32,
    /// Maximum documents to return; `0` means no limit.
    pub limit: u32,
    /// Documents per batch on the wire.
    pub batch_size: u32,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: 0,
            batch_size: 100,
        }
    }
}

impl FindOptions {
    /// Create paging options.
    #[must_use]
    pub fn new(skip: u32, limit: u32) -> Self {
        Self {
            skip,
            limit,
            ..Self::default()
        }
    }
}

/// Flags for `update`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Insert a document when nothing matches.
    pub upsert: bool,
    /// Update every matching document, not just the first.
    pub multi: bool,
}

/// Options for `find_and_modify`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindAndModifyOptions {
    /// Ordering used to pick the document when several match.
    pub sort: Option<Document>,
    /// Projection of the returned document.
    pub fields: Option<Document>,
    /// Remove the document instead of updating it.
    pub remove: bool,
    /// Insert a document when nothing matches.
    pub upsert: bool,
    /// Return the modified document instead of the original.
    pub return_new: bool,
}

/// One backend call.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Operation {
    /// Run a database command.
    Command {
        /// Target database.
        database: String,
        /// The command document.
        command: Document,
        /// Command options.
        options: Document,
    },
    /// Insert documents.
    Insert {
        /// Target collection.
        namespace: Namespace,
        /// Documents to insert.
        documents: Vec<Document>,
    },
    /// Update matching documents.
    Update {
        /// Target collection.
        namespace: Namespace,
        /// Filter.
        selector: Document,
        /// Update document or replacement.
        update: Document,
        /// Flags.
        options: UpdateOptions,
    },
    /// Remove matching documents.
    Remove {
        /// Target collection.
        namespace: Namespace,
        /// Filter.
        selector: Document,
        /// Remove at most one document.
        single: bool,
    },
    /// Query documents.
    Find {
        /// Target collection.
        namespace: Namespace,
        /// Filter.
        query: Document,
        /// Projection.
        fields: Document,
        /// Paging.
        options: FindOptions,
    },
    /// Count matching documents.
    Count {
        /// Target collection.
        namespace: Namespace,
        /// Filter.
        query: Document,
        /// Documents to skip.
        skip: u64,
        /// Maximum to count; `0` means no limit.
        limit: u64,
    },
    /// Atomically find one document and update or remove it.
    FindAndModify {
        /// Target collection.
        namespace: Namespace,
        /// Filter.
        query: Document,
        /// Update document; ignored when removing.
        update: Document,
        /// Options.
        options: FindAndModifyOptions,
    },
    /// Run an aggregation pipeline.
    Aggregate {
        /// Target collection.
        namespace: Namespace,
        /// Pipeline stages.
        pipeline: Vec<Document>,
        /// Aggregation options.
        options: Document,
    },
    /// Drop a collection.
    Drop {
        /// Target collection.
        namespace: Namespace,
    },
    /// Rename a collection.
    Rename {
        /// Source collection.
        namespace: Namespace,
        /// Destination database.
        new_database: String,
        /// Destination collection name.
        new_name: String,
        /// Drop an existing destination first.
        drop_target: bool,
    },
    /// Collection statistics.
    Stats {
        /// Target collection.
        namespace: Namespace,
        /// Options.
        options: Document,
    },
}

impl Operation {
    /// The administrative no-op used as a liveness probe.
    #[must_use]
    pub fn ping(database: &str) -> Self {
        let mut command = Document::new();
        command.insert("ping".into(), 1.into());
        Self::Command {
            database: database.to_string(),
            command,
            options: Document::new(),
        }
    }

    /// Short name for logs and errors.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Command { .. } => "command",
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Remove { .. } => "remove",
            Self::Find { .. } => "find",
            Self::Count { .. } => "count",
            Self::FindAndModify { .. } => "findAndModify",
            Self::Aggregate { .. } => "aggregate",
            Self::Drop { .. } => "drop",
            Self::Rename { .. } => "rename",
            Self::Stats { .. } => "collStats",
        }
    }

    /// Whether this is the liveness probe command.
    #[must_use]
    pub fn is_ping(&self) -> bool {
        matches!(self, Self::Command { command, .. } if command.contains_key("ping"))
    }
}

/// A backend reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Acknowledged write with no payload.
    Ack,
    /// A single reply document (commands, stats).
    Document(Document),
    /// Documents from a cursor (find, aggregate).
    Documents(Vec<Document>),
    /// A count.
    Count(u64),
    /// The document returned by find-and-modify, if any.
    Modified(Option<Document>),
}

impl Reply {
    /// Short description of the reply shape.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Document(_) => "document",
            Self::Documents(_) => "documents",
            Self::Count(_) => "count",
            Self::Modified(_) => "modified",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct User {
        name: String,
        age: u32,
    }

    #[test]
    fn test_namespace_display() {
        assert_eq!(Namespace::new("app", "users").to_string(), "app.users");
    }

    #[test]
    fn test_ping_operation() {
        let op = Operation::ping("admin");
        assert!(op.is_ping());
        assert_eq!(op.name(), "command");
        match op {
            Operation::Command { database, command, .. } => {
                assert_eq!(database, "admin");
                assert_eq!(command.get("ping"), Some(&serde_json::json!(1)));
            }
            other => panic!("unexpected operation {other:?}"),
        }
    }

    #[test]
    fn test_typed_document_conversion() {
        let user = User {
            name: "ada".into(),
            age: 36,
        };
        let doc = to_document(&user).unwrap();
        assert_eq!(doc.get("name"), Some(&serde_json::json!("ada")));
        let back: User = from_document(doc).unwrap();
        assert_eq!(back, user);
    }

    #[test]
    fn test_to_document_rejects_scalars() {
        assert!(matches!(to_document(&5), Err(Error::Decode(_))));
    }

    #[test]
    fn test_find_options_default_batch() {
        let opts = FindOptions::new(10, 5);
        assert_eq!(opts.batch_size, 100);
        assert_eq!(opts.skip, 10);
        assert_eq!(opts.limit, 5);
    }
}
