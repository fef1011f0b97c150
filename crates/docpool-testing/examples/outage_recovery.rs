//! Pool behaviour through a simulated primary election.
//!
//! Runs entirely in-process against the mock backend and prints the pool
//! status as connections are quarantined and recovered.
//!
//! # Running
//!
//! ```bash
//! cargo run -p docpool-testing --example outage_recovery
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use docpool::{BackendError, Document, Pool};
use docpool_testing::{MockBackend, TestFixture, doc};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let fixture = TestFixture::new("shop")
        .with_collection("orders", vec![doc(json!({"item": "lamp", "qty": 2}))]);
    let backend = MockBackend::new();
    fixture.seed(&backend);

    let pool = Pool::builder(backend.factory())
        .uri(fixture.uri_with("minPoolSize=2&maxPoolSize=4&retryTimeoutMS=2000"))
        .build()
        .await?;
    let orders = pool.database("shop").collection("orders");

    println!("=== Outage Recovery Example ===\n");
    println!("after warm-up:  {:?}", pool.status());

    // The primary steps down in the middle of a request.
    backend.fail_next_operations([BackendError::server_selection("primary stepped down")]);
    let err = orders.count(Document::new()).await.unwrap_err();
    println!("request failed: {err}");
    println!("after failure:  {:?}", pool.status());

    // The election takes a few probes to settle.
    backend.fail_probes(Some(BackendError::server_selection("no primary")));
    let recover = {
        let backend = backend.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            backend.fail_probes(None);
        })
    };

    // Drain the idle connection so the next caller hits the quarantined one.
    let held = pool.get().await?;
    let count = orders.count(Document::new()).await?;
    drop(held);
    recover.await?;

    println!("orders counted: {count}");
    println!("after recovery: {:?}", pool.status());
    println!("metrics:        {:?}", pool.metrics());
    println!("backend:        {:?}", backend.stats());

    pool.close();
    Ok(())
}
