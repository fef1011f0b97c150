//! Mock backend fidelity tests.
//!
//! These pin down the document-store behaviour the pool and facade tests
//! rely on, by driving sessions directly without a pool.
//!
//! ```bash
//! cargo test -p docpool-testing --test mock_fidelity
//! ```

#![allow(clippy::unwrap_used, clippy::panic)]

use docpool::{
    ConnectionFactory, ConnectionUri, Document, ErrorKind, FindAndModifyOptions, FindOptions,
    Namespace, Operation, Reply, Session, UpdateOptions, parse_sort,
};
use docpool_testing::{MockBackend, MockSession, doc};
use serde_json::json;

async fn session(backend: &MockBackend) -> MockSession {
    let uri = ConnectionUri::parse("mongodb://mock.test/app").unwrap();
    backend.factory().connect(&uri).await.unwrap()
}

fn users() -> Namespace {
    Namespace::new("app", "users")
}

fn documents(reply: Reply) -> Vec<Document> {
    match reply {
        Reply::Documents(docs) => docs,
        other => panic!("expected documents, got {other:?}"),
    }
}

// =============================================================================
// Writes
// =============================================================================

#[tokio::test]
async fn test_insert_assigns_ids_and_rejects_duplicates() {
    let backend = MockBackend::new();
    let mut s = session(&backend).await;

    s.run(&Operation::Insert {
        namespace: users(),
        documents: vec![doc(json!({"name": "ada"})), doc(json!({"_id": "bob", "name": "bob"}))],
    })
    .await
    .unwrap();

    let stored = backend.documents(&users());
    assert_eq!(stored.len(), 2);
    assert!(stored[0].contains_key("_id"));

    let err = s
        .run(&Operation::Insert {
            namespace: users(),
            documents: vec![doc(json!({"_id": "bob"}))],
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateKey);
    assert!(err.is_operation_scoped());
    assert_eq!(backend.documents(&users()).len(), 2);
}

#[tokio::test]
async fn test_update_single_multi_and_upsert() {
    let backend = MockBackend::new();
    backend.with_store(|store| {
        store.seed(
            &users(),
            [doc(json!({"team": "a", "n": 1})), doc(json!({"team": "a", "n": 1}))],
        );
    });
    let mut s = session(&backend).await;

    let update = |options| Operation::Update {
        namespace: users(),
        selector: doc(json!({"team": "a"})),
        update: doc(json!({"$inc": {"n": 1}})),
        options,
    };

    s.run(&update(UpdateOptions::default())).await.unwrap();
    let ns: Vec<_> = backend.documents(&users()).iter().map(|d| d["n"].clone()).collect();
    assert_eq!(ns, vec![json!(2), json!(1)]);

    s.run(&update(UpdateOptions {
        upsert: false,
        multi: true,
    }))
    .await
    .unwrap();
    let ns: Vec<_> = backend.documents(&users()).iter().map(|d| d["n"].clone()).collect();
    assert_eq!(ns, vec![json!(3), json!(2)]);

    s.run(&Operation::Update {
        namespace: users(),
        selector: doc(json!({"team": "b"})),
        update: doc(json!({"$set": {"n": 10}})),
        options: UpdateOptions {
            upsert: true,
            multi: false,
        },
    })
    .await
    .unwrap();
    let stored = backend.documents(&users());
    assert_eq!(stored.len(), 3);
    assert_eq!(stored[2]["team"], json!("b"));
    assert_eq!(stored[2]["n"], json!(10));
}

#[tokio::test]
async fn test_remove_single_and_all() {
    let backend = MockBackend::new();
    backend.with_store(|store| {
        store.seed(&users(), (0..4).map(|i| doc(json!({"i": i, "even": i % 2 == 0}))));
    });
    let mut s = session(&backend).await;

    s.run(&Operation::Remove {
        namespace: users(),
        selector: doc(json!({"even": true})),
        single: true,
    })
    .await
    .unwrap();
    assert_eq!(backend.documents(&users()).len(), 3);

    s.run(&Operation::Remove {
        namespace: users(),
        selector: Document::new(),
        single: false,
    })
    .await
    .unwrap();
    assert!(backend.documents(&users()).is_empty());
}

// =============================================================================
// Reads
// =============================================================================

#[tokio::test]
async fn test_find_paging_and_projection() {
    let backend = MockBackend::new();
    backend.with_store(|store| {
        store.seed(&users(), (0..10).map(|i| doc(json!({"i": i, "secret": "x"}))));
    });
    let mut s = session(&backend).await;

    let reply = s
        .run(&Operation::Find {
            namespace: users(),
            query: doc(json!({"i": {"$gte": 2}})),
            fields: doc(json!({"i": 1, "_id": 0})),
            options: FindOptions::new(1, 3),
        })
        .await
        .unwrap();

    let found = documents(reply);
    assert_eq!(
        found,
        vec![doc(json!({"i": 3})), doc(json!({"i": 4})), doc(json!({"i": 5}))]
    );
}

#[tokio::test]
async fn test_count_respects_skip_and_limit() {
    let backend = MockBackend::new();
    backend.with_store(|store| store.seed(&users(), (0..10).map(|i| doc(json!({"i": i})))));
    let mut s = session(&backend).await;

    let count = |skip, limit| Operation::Count {
        namespace: users(),
        query: doc(json!({"i": {"$lt": 8}})),
        skip,
        limit,
    };
    assert_eq!(s.run(&count(0, 0)).await.unwrap(), Reply::Count(8));
    assert_eq!(s.run(&count(5, 0)).await.unwrap(), Reply::Count(3));
    assert_eq!(s.run(&count(5, 2)).await.unwrap(), Reply::Count(2));
}

#[tokio::test]
async fn test_find_and_modify_honours_sort_and_return_new() {
    let backend = MockBackend::new();
    backend.with_store(|store| {
        store.seed(
            &users(),
            [
                doc(json!({"_id": 1, "prio": 1, "state": "ready"})),
                doc(json!({"_id": 2, "prio": 5, "state": "ready"})),
            ],
        );
    });
    let mut s = session(&backend).await;

    let reply = s
        .run(&Operation::FindAndModify {
            namespace: users(),
            query: doc(json!({"state": "ready"})),
            update: doc(json!({"$set": {"state": "taken"}})),
            options: FindAndModifyOptions {
                sort: Some(parse_sort(&["-prio"])),
                return_new: true,
                ..FindAndModifyOptions::default()
            },
        })
        .await
        .unwrap();
    assert_eq!(
        reply,
        Reply::Modified(Some(doc(json!({"_id": 2, "prio": 5, "state": "taken"}))))
    );

    let reply = s
        .run(&Operation::FindAndModify {
            namespace: users(),
            query: doc(json!({"state": "missing"})),
            update: Document::new(),
            options: FindAndModifyOptions::default(),
        })
        .await
        .unwrap();
    assert_eq!(reply, Reply::Modified(None));
}

#[tokio::test]
async fn test_aggregate_stages() {
    let backend = MockBackend::new();
    backend.with_store(|store| {
        store.seed(&users(), (0..6).map(|i| doc(json!({"i": i, "odd": i % 2 == 1}))));
    });
    let mut s = session(&backend).await;

    let reply = s
        .run(&Operation::Aggregate {
            namespace: users(),
            pipeline: vec![
                doc(json!({"$match": {"odd": true}})),
                doc(json!({"$sort": {"i": -1}})),
                doc(json!({"$limit": 2})),
                doc(json!({"$project": {"i": 1, "_id": 0}})),
            ],
            options: Document::new(),
        })
        .await
        .unwrap();
    assert_eq!(documents(reply), vec![doc(json!({"i": 5})), doc(json!({"i": 3}))]);

    let err = s
        .run(&Operation::Aggregate {
            namespace: users(),
            pipeline: vec![doc(json!({"$bogus": {}}))],
            options: Document::new(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Command);
    assert_eq!(err.code(), 40324);
}

// =============================================================================
// Namespace commands
// =============================================================================

#[tokio::test]
async fn test_drop_rename_and_stats() {
    let backend = MockBackend::new();
    backend.with_store(|store| store.seed(&users(), [doc(json!({"a": 1}))]));
    let mut s = session(&backend).await;

    let stats = s
        .run(&Operation::Stats {
            namespace: users(),
            options: Document::new(),
        })
        .await
        .unwrap();
    match stats {
        Reply::Document(stats) => assert_eq!(stats["count"], json!(1)),
        other => panic!("unexpected reply {other:?}"),
    }

    s.run(&Operation::Rename {
        namespace: users(),
        new_database: "app".into(),
        new_name: "people".into(),
        drop_target: false,
    })
    .await
    .unwrap();
    let people = Namespace::new("app", "people");
    assert_eq!(backend.documents(&people).len(), 1);
    assert!(!backend.with_store(|store| store.contains(&users())));

    s.run(&Operation::Drop {
        namespace: people.clone(),
    })
    .await
    .unwrap();
    let err = s.run(&Operation::Drop { namespace: people }).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_unknown_command() {
    let backend = MockBackend::new();
    let mut s = session(&backend).await;

    let err = s
        .run(&Operation::Command {
            database: "app".into(),
            command: doc(json!({"frobnicate": 1})),
            options: Document::new(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Command);
    assert_eq!(err.code(), 59);
}
