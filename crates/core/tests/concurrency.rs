//! Concurrent access integration tests.
//!
//! Many independent callers hit one store at once. No operation takes a
//! store-wide lock, so these exercise the sharded concurrent maps of
//! the memory backend and the connection pool of the SQLite backend.

use std::collections::HashSet;
use std::sync::Arc;

use tempfile::TempDir;

use ticketstore_core::{
    create_state_store, testing::fixtures, BackendKind, Filter, RequestContext, StateStore,
    Ticket,
};

fn sqlite_store(temp_dir: &TempDir) -> Arc<dyn StateStore> {
    let mut config = fixtures::config();
    config.backend.kind = BackendKind::Sqlite;
    config.backend.address = temp_dir
        .path()
        .join("concurrency.db")
        .to_string_lossy()
        .into_owned();
    create_state_store(&config).expect("Failed to create sqlite store")
}

/// Create and index `count` tickets from separate tasks.
async fn create_concurrently(store: &Arc<dyn StateStore>, count: usize) {
    let mut handles = Vec::with_capacity(count);
    for i in 0..count {
        let store = Arc::clone(store);
        handles.push(tokio::spawn(async move {
            let region = if i % 2 == 0 { "eu" } else { "na" };
            let ticket = fixtures::player_ticket(&format!("t{:04}", i), i as f64, region, "ranked");
            fixtures::add_indexed(store.as_ref(), &ticket).await
        }));
    }

    for handle in handles {
        handle
            .await
            .expect("task panicked")
            .expect("create+index failed");
    }
}

fn assert_exactly_once(pages: Vec<Vec<String>>, expected: usize) {
    let delivered: usize = pages.iter().map(Vec::len).sum();
    let unique: HashSet<String> = pages.into_iter().flatten().collect();
    assert_eq!(delivered, unique.len(), "a ticket was delivered twice");
    assert_eq!(unique.len(), expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_thousand_concurrent_creates_memory() {
    let store = create_state_store(&fixtures::config()).unwrap();
    create_concurrently(&store, 1000).await;

    let pages = fixtures::collect_pages(store.as_ref(), &[Filter::range("mmr", 0.0, 1000.0)], 64)
        .await
        .unwrap();
    assert_eq!(pages.len(), 1000usize.div_ceil(64));
    assert_exactly_once(pages, 1000);

    let pages = fixtures::collect_pages(store.as_ref(), &[Filter::tag("region", "eu")], 100)
        .await
        .unwrap();
    assert_exactly_once(pages, 500);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_thousand_concurrent_creates_sqlite() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = sqlite_store(&temp_dir);
    create_concurrently(&store, 1000).await;

    let pages = fixtures::collect_pages(store.as_ref(), &[Filter::range("mmr", 0.0, 1000.0)], 64)
        .await
        .unwrap();
    assert_exactly_once(pages, 1000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_creates_one_winner() {
    let store = create_state_store(&fixtures::config()).unwrap();

    let mut handles = Vec::new();
    for i in 0..32 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let ticket = fixtures::rated_ticket("contested", i as f64);
            store
                .create_ticket(&RequestContext::background(), &ticket)
                .await
        }));
    }

    let mut winners = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => winners += 1,
            Err(e) => assert_eq!(e.kind(), ticketstore_core::ErrorKind::AlreadyExists),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_filter_during_churn_never_duplicates() {
    let store = create_state_store(&fixtures::config()).unwrap();
    create_concurrently(&store, 300).await;

    // Delete and recreate tickets while filters run.
    let churn = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            let ctx = RequestContext::background();
            for round in 0..5 {
                for i in (0..300).step_by(3) {
                    let id = format!("t{:04}", i);
                    store.deindex_ticket(&ctx, &id).await.unwrap();
                    store.delete_ticket(&ctx, &id).await.unwrap();
                    let ticket = Ticket::with_id(&id).with_number("mmr", (i + round) as f64);
                    store.create_ticket(&ctx, &ticket).await.unwrap();
                    store.index_ticket(&ctx, &ticket).await.unwrap();
                }
            }
        })
    };

    for _ in 0..20 {
        let pages =
            fixtures::collect_pages(store.as_ref(), &[Filter::range("mmr", 0.0, 10_000.0)], 17)
                .await
                .unwrap();
        let delivered: usize = pages.iter().map(Vec::len).sum();
        let unique: HashSet<String> = pages.into_iter().flatten().collect();
        assert_eq!(delivered, unique.len());
        // Tickets not touched by churn are always present.
        for i in (1..300).filter(|i| i % 3 != 0) {
            assert!(unique.contains(&format!("t{:04}", i)));
        }
    }

    churn.await.unwrap();
    let ids = fixtures::matching_ids(store.as_ref(), &[Filter::range("mmr", 0.0, 10_000.0)])
        .await
        .unwrap();
    assert_eq!(ids.len(), 300);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deindex_and_delete() {
    let store = create_state_store(&fixtures::config()).unwrap();
    create_concurrently(&store, 200).await;

    let mut handles = Vec::new();
    for i in 0..200 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let ctx = RequestContext::background();
            let id = format!("t{:04}", i);
            if i % 2 == 0 {
                store.deindex_ticket(&ctx, &id).await?;
            }
            store.delete_ticket(&ctx, &id).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let ids = fixtures::matching_ids(store.as_ref(), &[]).await.unwrap();
    assert!(ids.is_empty(), "deleted tickets must not be delivered");
}
