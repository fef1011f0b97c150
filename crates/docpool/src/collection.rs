//! Database and collection facade.
//!
//! Every call here checks out one connection, performs exactly one
//! backend call through [`Connection::run`](crate::connection::Connection::run)
//! and drops the guard before returning. The outcome is recorded on the
//! connection first, so the pool routes it by the same error the caller
//! sees. If the caller's future is dropped mid-call the connection is
//! flagged as interrupted and discarded on return.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::connection::ConnectionFactory;
use crate::error::{Error, Result};
use crate::operation::{
    Document, FindAndModifyOptions, FindOptions, Namespace, Operation, Reply, UpdateOptions,
    from_document, to_document,
};
use crate::pool::Pool;

impl<F: ConnectionFactory> Pool<F> {
    /// Run a command against `database` and return its reply document.
    pub async fn execute(&self, database: &str, command: Document) -> Result<Document> {
        self.execute_with_options(database, command, Document::new())
            .await
    }

    /// Run a command with driver options.
    pub async fn execute_with_options(
        &self,
        database: &str,
        command: Document,
        options: Document,
    ) -> Result<Document> {
        let reply = self
            .run(Operation::Command {
                database: database.to_string(),
                command,
                options,
            })
            .await?;
        into_document("command", reply)
    }

    /// Round-trip a `ping` through a pooled connection.
    pub async fn ping(&self, database: &str) -> Result<()> {
        self.run(Operation::ping(database)).await.map(|_| ())
    }

    /// Get a handle to a database.
    pub fn database(&self, name: impl Into<String>) -> Database<F> {
        Database {
            pool: self.clone(),
            name: name.into(),
        }
    }

    /// Perform one operation on a pooled connection.
    pub(crate) async fn run(&self, operation: Operation) -> Result<Reply> {
        let mut conn = self.get().await?;
        tracing::trace!(
            connection = conn.id(),
            operation = operation.name(),
            "running operation"
        );
        let reply = conn.run(&operation).await?;
        Ok(reply)
    }
}

/// A database handle bound to a pool.
#[derive(Debug)]
pub struct Database<F: ConnectionFactory> {
    pool: Pool<F>,
    name: String,
}

impl<F: ConnectionFactory> Clone for Database<F> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            name: self.name.clone(),
        }
    }
}

impl<F: ConnectionFactory> Database<F> {
    /// The database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get a handle to a collection in this database.
    pub fn collection(&self, name: impl Into<String>) -> Collection<F> {
        Collection {
            pool: self.pool.clone(),
            namespace: Namespace::new(self.name.clone(), name),
        }
    }

    /// Run a command against this database.
    pub async fn execute(&self, command: Document) -> Result<Document> {
        self.pool.execute(&self.name, command).await
    }

    /// Ping through this database.
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping(&self.name).await
    }
}

/// A collection handle bound to a pool.
#[derive(Debug)]
pub struct Collection<F: ConnectionFactory> {
    pool: Pool<F>,
    namespace: Namespace,
}

impl<F: ConnectionFactory> Clone for Collection<F> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

impl<F: ConnectionFactory> Collection<F> {
    /// The fully qualified name.
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// The collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.namespace.collection
    }

    /// Insert documents.
    pub async fn insert(&self, documents: Vec<Document>) -> Result<()> {
        let reply = self
            .pool
            .run(Operation::Insert {
                namespace: self.namespace.clone(),
                documents,
            })
            .await?;
        into_ack("insert", reply)
    }

    /// Insert one document.
    pub async fn insert_one(&self, document: Document) -> Result<()> {
        self.insert(vec![document]).await
    }

    /// Serialize values and insert them.
    pub async fn insert_as<T: Serialize>(&self, values: &[T]) -> Result<()> {
        let documents = values.iter().map(to_document).collect::<Result<Vec<_>>>()?;
        self.insert(documents).await
    }

    /// Update the first document matching `selector`.
    pub async fn update(&self, selector: Document, update: Document, upsert: bool) -> Result<()> {
        self.update_with(selector, update, UpdateOptions {
            upsert,
            multi: false,
        })
        .await
    }

    /// Update every document matching `selector`.
    pub async fn update_many(&self, selector: Document, update: Document) -> Result<()> {
        self.update_with(selector, update, UpdateOptions {
            upsert: false,
            multi: true,
        })
        .await
    }

    async fn update_with(
        &self,
        selector: Document,
        update: Document,
        options: UpdateOptions,
    ) -> Result<()> {
        let reply = self
            .pool
            .run(Operation::Update {
                namespace: self.namespace.clone(),
                selector,
                update,
                options,
            })
            .await?;
        into_ack("update", reply)
    }

    /// Remove every document matching `selector`.
    pub async fn remove(&self, selector: Document) -> Result<()> {
        self.remove_with(selector, false).await
    }

    /// Remove the first document matching `selector`.
    pub async fn remove_one(&self, selector: Document) -> Result<()> {
        self.remove_with(selector, true).await
    }

    async fn remove_with(&self, selector: Document, single: bool) -> Result<()> {
        let reply = self
            .pool
            .run(Operation::Remove {
                namespace: self.namespace.clone(),
                selector,
                single,
            })
            .await?;
        into_ack("remove", reply)
    }

    /// Query documents.
    ///
    /// An empty `fields` document returns whole documents.
    pub async fn find(
        &self,
        query: Document,
        fields: Document,
        options: FindOptions,
    ) -> Result<Vec<Document>> {
        let reply = self
            .pool
            .run(Operation::Find {
                namespace: self.namespace.clone(),
                query,
                fields,
                options,
            })
            .await?;
        into_documents("find", reply)
    }

    /// Query documents and deserialize them.
    pub async fn find_as<T: DeserializeOwned>(
        &self,
        query: Document,
        options: FindOptions,
    ) -> Result<Vec<T>> {
        self.find(query, Document::new(), options)
            .await?
            .into_iter()
            .map(from_document)
            .collect()
    }

    /// Count documents matching `query`.
    pub async fn count(&self, query: Document) -> Result<u64> {
        self.count_with(query, 0, 0).await
    }

    /// Count matching documents after skipping `skip`, up to `limit`
    /// (`0` means no limit).
    pub async fn count_with(&self, query: Document, skip: u64, limit: u64) -> Result<u64> {
        let reply = self
            .pool
            .run(Operation::Count {
                namespace: self.namespace.clone(),
                query,
                skip,
                limit,
            })
            .await?;
        match reply {
            Reply::Count(count) => Ok(count),
            other => Err(unexpected("count", &other)),
        }
    }

    /// Atomically update or remove one document and return it.
    ///
    /// Returns `None` when nothing matched and no document was upserted.
    pub async fn find_and_modify(
        &self,
        query: Document,
        update: Document,
        options: FindAndModifyOptions,
    ) -> Result<Option<Document>> {
        let reply = self
            .pool
            .run(Operation::FindAndModify {
                namespace: self.namespace.clone(),
                query,
                update,
                options,
            })
            .await?;
        match reply {
            Reply::Modified(document) => Ok(document),
            other => Err(unexpected("findAndModify", &other)),
        }
    }

    /// Run an aggregation pipeline.
    pub async fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>> {
        let reply = self
            .pool
            .run(Operation::Aggregate {
                namespace: self.namespace.clone(),
                pipeline,
                options: Document::new(),
            })
            .await?;
        into_documents("aggregate", reply)
    }

    /// Drop the collection.
    pub async fn drop_collection(&self) -> Result<()> {
        let reply = self
            .pool
            .run(Operation::Drop {
                namespace: self.namespace.clone(),
            })
            .await?;
        into_ack("drop", reply)
    }

    /// Rename the collection within its database.
    ///
    /// Returns a handle to the renamed collection.
    pub async fn rename(&self, new_name: &str, drop_target: bool) -> Result<Collection<F>> {
        let reply = self
            .pool
            .run(Operation::Rename {
                namespace: self.namespace.clone(),
                new_database: self.namespace.database.clone(),
                new_name: new_name.to_string(),
                drop_target,
            })
            .await?;
        into_ack("rename", reply)?;
        Ok(Collection {
            pool: self.pool.clone(),
            namespace: Namespace::new(self.namespace.database.clone(), new_name),
        })
    }

    /// Collection statistics.
    pub async fn stats(&self) -> Result<Document> {
        let reply = self
            .pool
            .run(Operation::Stats {
                namespace: self.namespace.clone(),
                options: Document::new(),
            })
            .await?;
        into_document("collStats", reply)
    }
}

fn unexpected(operation: &'static str, reply: &Reply) -> Error {
    Error::UnexpectedReply {
        operation,
        reply: reply.kind(),
    }
}

// Writes may be acknowledged with or without a result document.
fn into_ack(operation: &'static str, reply: Reply) -> Result<()> {
    match reply {
        Reply::Ack | Reply::Document(_) => Ok(()),
        other => Err(unexpected(operation, &other)),
    }
}

fn into_document(operation: &'static str, reply: Reply) -> Result<Document> {
    match reply {
        Reply::Document(document) => Ok(document),
        Reply::Ack => Ok(Document::new()),
        other => Err(unexpected(operation, &other)),
    }
}

fn into_documents(operation: &'static str, reply: Reply) -> Result<Vec<Document>> {
    match reply {
        Reply::Documents(documents) => Ok(documents),
        other => Err(unexpected(operation, &other)),
    }
}
