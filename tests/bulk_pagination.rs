use delta_sync::{Coordinator, InMemoryAdapter, MutateOptions, QueryOptions};
use serde_json::json;

#[tokio::test]
async fn bulk_insert_and_paginated_read() {
    let coordinator = Coordinator::open(InMemoryAdapter::new()).await.unwrap();

    let items: Vec<_> = (0..150)
        .map(|i| (format!("page-{i}"), json!({ "i": i })))
        .collect();
    coordinator
        .put_bulk("notes", items, MutateOptions::default())
        .await
        .unwrap();

    let first = coordinator
        .query(
            "notes",
            QueryOptions {
                limit: Some(100),
                offset: Some(0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(first.items.len(), 100);
    assert!(first.has_more);

    let second = coordinator
        .query(
            "notes",
            QueryOptions {
                limit: Some(100),
                offset: Some(100),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(second.items.len(), 50);
    assert!(!second.has_more);
}
