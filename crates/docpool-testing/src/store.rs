//! In-memory document store behind mock sessions.
//!
//! Implements just enough query semantics for pool and facade tests:
//! equality and comparison filters, `$set`/`$unset`/`$inc` updates,
//! inclusive and exclusive projections, and a handful of aggregation
//! stages. Error codes follow the server's where one exists.

use std::cmp::Ordering;
use std::collections::HashMap;

use docpool::{
    BackendError, Document, ErrorKind, FindAndModifyOptions, FindOptions, Namespace, Operation,
    Reply, UpdateOptions,
};
use serde_json::{Value, json};

const FAILED_TO_PARSE: i32 = 9;
const TYPE_MISMATCH: i32 = 14;
const NAMESPACE_EXISTS: i32 = 48;
const COMMAND_NOT_FOUND: i32 = 59;
const BAD_STAGE_SPEC: i32 = 40323;
const UNKNOWN_STAGE: i32 = 40324;

/// Collections keyed by `database.collection`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: HashMap<String, Vec<Document>>,
    next_id: u64,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add documents without duplicate checks, assigning missing `_id`s.
    pub fn seed(&mut self, namespace: &Namespace, documents: impl IntoIterator<Item = Document>) {
        let docs = self.collections.entry(namespace.to_string()).or_default();
        for document in documents {
            docs.push(with_id(&mut self.next_id, document));
        }
    }

    /// A copy of every document in a collection, in insertion order.
    #[must_use]
    pub fn documents(&self, namespace: &Namespace) -> Vec<Document> {
        self.collections
            .get(&namespace.to_string())
            .cloned()
            .unwrap_or_default()
    }

    /// Whether a collection exists.
    #[must_use]
    pub fn contains(&self, namespace: &Namespace) -> bool {
        self.collections.contains_key(&namespace.to_string())
    }

    /// Names of the collections in `database`, sorted.
    #[must_use]
    pub fn collection_names(&self, database: &str) -> Vec<String> {
        let prefix = format!("{database}.");
        let mut names: Vec<_> = self
            .collections
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .map(str::to_string)
            .collect();
        names.sort();
        names
    }

    /// Execute one operation.
    pub fn apply(&mut self, operation: &Operation) -> Result<Reply, BackendError> {
        match operation {
            Operation::Command {
                database, command, ..
            } => self.command(database, command),
            Operation::Insert {
                namespace,
                documents,
            } => self.insert(namespace, documents),
            Operation::Update {
                namespace,
                selector,
                update,
                options,
            } => self.update(namespace, selector, update, *options),
            Operation::Remove {
                namespace,
                selector,
                single,
            } => Ok(self.remove(namespace, selector, *single)),
            Operation::Find {
                namespace,
                query,
                fields,
                options,
            } => Ok(self.find(namespace, query, fields, *options)),
            Operation::Count {
                namespace,
                query,
                skip,
                limit,
            } => Ok(self.count(namespace, query, *skip, *limit)),
            Operation::FindAndModify {
                namespace,
                query,
                update,
                options,
            } => self.find_and_modify(namespace, query, update, options),
            Operation::Aggregate {
                namespace,
                pipeline,
                ..
            } => self.aggregate(namespace, pipeline),
            Operation::Drop { namespace } => self
                .collections
                .remove(&namespace.to_string())
                .map(|_| ok())
                .ok_or_else(|| BackendError::not_found(format!("ns not found: {namespace}"))),
            Operation::Rename {
                namespace,
                new_database,
                new_name,
                drop_target,
            } => self.rename(namespace, new_database, new_name, *drop_target),
            Operation::Stats { namespace, .. } => self.stats(namespace),
            other => Err(no_such_command(other.name())),
        }
    }

    fn command(&mut self, database: &str, command: &Document) -> Result<Reply, BackendError> {
        let Some(name) = command.keys().next() else {
            return Err(no_such_command(""));
        };
        match name.as_str() {
            "ping" => Ok(ok()),
            "dropDatabase" => {
                let prefix = format!("{database}.");
                self.collections.retain(|key, _| !key.starts_with(&prefix));
                Ok(ok())
            }
            "listCollections" => Ok(Reply::Document(object(json!({
                "collections": self.collection_names(database),
                "ok": 1,
            })))),
            other => Err(no_such_command(other)),
        }
    }

    fn insert(&mut self, namespace: &Namespace, documents: &[Document]) -> Result<Reply, BackendError> {
        let docs = self.collections.entry(namespace.to_string()).or_default();
        let mut batch: Vec<Document> = Vec::with_capacity(documents.len());
        for document in documents {
            let document = with_id(&mut self.next_id, document.clone());
            let id = document.get("_id");
            if docs.iter().chain(&batch).any(|d| d.get("_id") == id) {
                return Err(BackendError::duplicate_key(format!(
                    "E11000 duplicate key error collection: {namespace} dup key: {{ _id: {} }}",
                    id.unwrap_or(&Value::Null)
                )));
            }
            batch.push(document);
        }
        let n = batch.len();
        docs.extend(batch);
        Ok(acknowledged(n))
    }

    fn update(
        &mut self,
        namespace: &Namespace,
        selector: &Document,
        update: &Document,
        options: UpdateOptions,
    ) -> Result<Reply, BackendError> {
        let docs = self.collections.entry(namespace.to_string()).or_default();
        let mut matched = 0;
        for document in docs.iter_mut().filter(|d| matches(d, selector)) {
            let mut updated = document.clone();
            apply_update(&mut updated, update)?;
            *document = updated;
            matched += 1;
            if !options.multi {
                break;
            }
        }
        if matched == 0 && options.upsert {
            let mut document = equality_fields(selector);
            apply_update(&mut document, update)?;
            docs.push(with_id(&mut self.next_id, document));
            matched = 1;
        }
        Ok(acknowledged(matched))
    }

    fn remove(&mut self, namespace: &Namespace, selector: &Document, single: bool) -> Reply {
        let Some(docs) = self.collections.get_mut(&namespace.to_string()) else {
            return acknowledged(0);
        };
        let removed = if single {
            match docs.iter().position(|d| matches(d, selector)) {
                Some(index) => {
                    docs.remove(index);
                    1
                }
                None => 0,
            }
        } else {
            let before = docs.len();
            docs.retain(|d| !matches(d, selector));
            before - docs.len()
        };
        acknowledged(removed)
    }

    fn find(
        &self,
        namespace: &Namespace,
        query: &Document,
        fields: &Document,
        options: FindOptions,
    ) -> Reply {
        let limit = match options.limit {
            0 => usize::MAX,
            n => n as usize,
        };
        let found = self
            .collection(namespace)
            .iter()
            .filter(|d| matches(d, query))
            .skip(options.skip as usize)
            .take(limit)
            .map(|d| project(d, fields))
            .collect();
        Reply::Documents(found)
    }

    fn count(&self, namespace: &Namespace, query: &Document, skip: u64, limit: u64) -> Reply {
        let limit = match limit {
            0 => usize::MAX,
            n => usize::try_from(n).unwrap_or(usize::MAX),
        };
        let count = self
            .collection(namespace)
            .iter()
            .filter(|d| matches(d, query))
            .skip(usize::try_from(skip).unwrap_or(usize::MAX))
            .take(limit)
            .count();
        Reply::Count(count as u64)
    }

    fn find_and_modify(
        &mut self,
        namespace: &Namespace,
        query: &Document,
        update: &Document,
        options: &FindAndModifyOptions,
    ) -> Result<Reply, BackendError> {
        let docs = self.collections.entry(namespace.to_string()).or_default();
        let mut candidates: Vec<usize> = docs
            .iter()
            .enumerate()
            .filter(|(_, d)| matches(d, query))
            .map(|(index, _)| index)
            .collect();
        if let Some(sort) = &options.sort {
            candidates.sort_by(|&a, &b| compare_by_sort(&docs[a], &docs[b], sort));
        }
        let fields = options.fields.clone().unwrap_or_default();

        let returned = match candidates.first().copied() {
            Some(index) if options.remove => Some(docs.remove(index)),
            Some(index) => {
                let original = docs[index].clone();
                let mut updated = original.clone();
                apply_update(&mut updated, update)?;
                docs[index] = updated;
                Some(if options.return_new {
                    docs[index].clone()
                } else {
                    original
                })
            }
            None if options.upsert && !options.remove => {
                let mut document = equality_fields(query);
                apply_update(&mut document, update)?;
                let document = with_id(&mut self.next_id, document);
                docs.push(document.clone());
                options.return_new.then_some(document)
            }
            None => None,
        };
        Ok(Reply::Modified(returned.map(|d| project(&d, &fields))))
    }

    fn aggregate(
        &self,
        namespace: &Namespace,
        pipeline: &[Document],
    ) -> Result<Reply, BackendError> {
        let mut docs = self.collection(namespace).to_vec();
        for stage in pipeline {
            let mut entries = stage.iter();
            let (Some((name, spec)), None) = (entries.next(), entries.next()) else {
                return Err(BackendError::new(
                    ErrorKind::Command,
                    BAD_STAGE_SPEC,
                    "a pipeline stage specification object must contain exactly one field",
                ));
            };
            match (name.as_str(), spec) {
                ("$match", Value::Object(filter)) => docs.retain(|d| matches(d, filter)),
                ("$skip", n) => {
                    let n = stage_count(name, n)?.min(docs.len());
                    docs.drain(..n);
                }
                ("$limit", n) => docs.truncate(stage_count(name, n)?),
                ("$sort", Value::Object(sort)) => docs.sort_by(|a, b| compare_by_sort(a, b, sort)),
                ("$project", Value::Object(fields)) => {
                    docs = docs.iter().map(|d| project(d, fields)).collect();
                }
                ("$count", Value::String(field)) => {
                    let mut counted = Document::new();
                    counted.insert(field.clone(), Value::from(docs.len()));
                    docs = vec![counted];
                }
                ("$match" | "$sort" | "$project" | "$count", _) => {
                    return Err(BackendError::new(
                        ErrorKind::Command,
                        FAILED_TO_PARSE,
                        format!("invalid argument to {name} stage"),
                    ));
                }
                (other, _) => {
                    return Err(BackendError::new(
                        ErrorKind::Command,
                        UNKNOWN_STAGE,
                        format!("unrecognized pipeline stage name: '{other}'"),
                    ));
                }
            }
        }
        Ok(Reply::Documents(docs))
    }

    fn rename(
        &mut self,
        namespace: &Namespace,
        new_database: &str,
        new_name: &str,
        drop_target: bool,
    ) -> Result<Reply, BackendError> {
        let source = namespace.to_string();
        let target = Namespace::new(new_database, new_name).to_string();
        if !self.collections.contains_key(&source) {
            return Err(BackendError::not_found(format!(
                "source namespace does not exist: {source}"
            )));
        }
        if self.collections.contains_key(&target) && !drop_target {
            return Err(BackendError::new(
                ErrorKind::Command,
                NAMESPACE_EXISTS,
                format!("target namespace exists: {target}"),
            ));
        }
        let docs = self.collections.remove(&source).unwrap_or_default();
        self.collections.insert(target, docs);
        Ok(ok())
    }

    fn stats(&self, namespace: &Namespace) -> Result<Reply, BackendError> {
        let docs = self
            .collections
            .get(&namespace.to_string())
            .ok_or_else(|| BackendError::not_found(format!("ns not found: {namespace}")))?;
        let size: usize = docs
            .iter()
            .map(|d| serde_json::to_vec(d).map_or(0, |bytes| bytes.len()))
            .sum();
        Ok(Reply::Document(object(json!({
            "ns": namespace.to_string(),
            "count": docs.len(),
            "size": size,
            "ok": 1,
        }))))
    }

    fn collection(&self, namespace: &Namespace) -> &[Document] {
        self.collections
            .get(&namespace.to_string())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Whether `document` satisfies `filter`.
#[must_use]
pub fn matches(document: &Document, filter: &Document) -> bool {
    filter.iter().all(|(field, condition)| {
        let value = document.get(field);
        match condition {
            Value::Object(ops) if is_operator_document(ops) => ops
                .iter()
                .all(|(op, arg)| matches_operator(value, op, arg)),
            expected => value == Some(expected),
        }
    })
}

fn is_operator_document(document: &Document) -> bool {
    !document.is_empty() && document.keys().all(|key| key.starts_with('$'))
}

fn matches_operator(value: Option<&Value>, op: &str, arg: &Value) -> bool {
    let ordering = || value.and_then(|v| compare_values(v, arg));
    match op {
        "$eq" => value == Some(arg),
        "$ne" => value != Some(arg),
        "$gt" => ordering() == Some(Ordering::Greater),
        "$gte" => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
        "$lt" => ordering() == Some(Ordering::Less),
        "$lte" => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
        "$in" => arg
            .as_array()
            .is_some_and(|candidates| value.is_some_and(|v| candidates.contains(v))),
        "$nin" => !arg
            .as_array()
            .is_some_and(|candidates| value.is_some_and(|v| candidates.contains(v))),
        "$exists" => value.is_some() == truthy(arg),
        _ => false,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn compare_by_sort(a: &Document, b: &Document, sort: &Document) -> Ordering {
    for (field, direction) in sort {
        let ordering = match (a.get(field), b.get(field)) {
            (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        let ordering = if direction.as_f64().is_some_and(|d| d < 0.0) {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn apply_update(document: &mut Document, update: &Document) -> Result<(), BackendError> {
    if !update.keys().any(|key| key.starts_with('$')) {
        // Replacement keeps the original `_id`.
        let id = document.get("_id").cloned();
        document.clear();
        if let Some(id) = id {
            document.insert("_id".into(), id);
        }
        for (key, value) in update.iter().filter(|(key, _)| key.as_str() != "_id") {
            document.insert(key.clone(), value.clone());
        }
        return Ok(());
    }

    for (modifier, fields) in update {
        let Value::Object(fields) = fields else {
            return Err(BackendError::new(
                ErrorKind::Command,
                FAILED_TO_PARSE,
                format!("modifier {modifier} expects a document"),
            ));
        };
        match modifier.as_str() {
            "$set" => {
                for (key, value) in fields {
                    document.insert(key.clone(), value.clone());
                }
            }
            "$unset" => {
                for key in fields.keys() {
                    document.remove(key);
                }
            }
            "$inc" => {
                for (key, by) in fields {
                    let next = increment(document.get(key), by).ok_or_else(|| {
                        BackendError::new(
                            ErrorKind::Command,
                            TYPE_MISMATCH,
                            format!("cannot apply $inc to non-numeric field {key}"),
                        )
                    })?;
                    document.insert(key.clone(), next);
                }
            }
            other => {
                return Err(BackendError::new(
                    ErrorKind::Command,
                    FAILED_TO_PARSE,
                    format!("unknown modifier: {other}"),
                ));
            }
        }
    }
    Ok(())
}

fn increment(current: Option<&Value>, by: &Value) -> Option<Value> {
    if !by.is_number() {
        return None;
    }
    let Some(current) = current else {
        return Some(by.clone());
    };
    match (current.as_i64(), by.as_i64()) {
        (Some(a), Some(b)) => a.checked_add(b).map(Value::from),
        _ => serde_json::Number::from_f64(current.as_f64()? + by.as_f64()?).map(Value::Number),
    }
}

fn project(document: &Document, fields: &Document) -> Document {
    if fields.is_empty() {
        return document.clone();
    }
    let include_id = fields.get("_id").is_none_or(truthy);
    let inclusive = fields
        .iter()
        .any(|(key, value)| key.as_str() != "_id" && truthy(value));

    if inclusive {
        let mut projected = Document::new();
        if include_id {
            if let Some(id) = document.get("_id") {
                projected.insert("_id".into(), id.clone());
            }
        }
        for (key, _) in fields.iter().filter(|(key, v)| key.as_str() != "_id" && truthy(v)) {
            if let Some(value) = document.get(key) {
                projected.insert(key.clone(), value.clone());
            }
        }
        projected
    } else {
        let mut projected = document.clone();
        for key in fields.keys() {
            if key.as_str() != "_id" {
                projected.remove(key);
            }
        }
        if !include_id {
            projected.remove("_id");
        }
        projected
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::Null => false,
        _ => true,
    }
}

fn equality_fields(filter: &Document) -> Document {
    filter
        .iter()
        .filter(|(key, value)| {
            !key.starts_with('$')
                && !matches!(value, Value::Object(ops) if is_operator_document(ops))
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn with_id(next_id: &mut u64, document: Document) -> Document {
    if document.contains_key("_id") {
        return document;
    }
    *next_id += 1;
    let mut out = Document::new();
    out.insert("_id".into(), Value::from(*next_id));
    out.extend(document);
    out
}

fn stage_count(stage: &str, value: &Value) -> Result<usize, BackendError> {
    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| {
            BackendError::new(
                ErrorKind::Command,
                FAILED_TO_PARSE,
                format!("{stage} expects a non-negative integer"),
            )
        })
}

fn no_such_command(name: &str) -> BackendError {
    BackendError::new(
        ErrorKind::Command,
        COMMAND_NOT_FOUND,
        format!("no such command: '{name}'"),
    )
}

fn object(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}

fn ok() -> Reply {
    Reply::Document(object(json!({ "ok": 1 })))
}

fn acknowledged(n: usize) -> Reply {
    Reply::Document(object(json!({ "n": n, "ok": 1 })))
}
