//! Integration tests for the subscription update pipeline.
//!
//! A wiremock server stands in for the remote subscription provider; the
//! full fetch -> decode -> parse -> reconcile path runs against in-memory
//! SQLite.

mod common;

use common::fixtures::*;

use nodepool::database::SubscriptionStatus;
use nodepool::errors::CoreError;
use nodepool::sync::validate_subscription_url;
use nodepool::{Config, SubscriptionSync, UpdateTrigger};

fn sync_for(db: &TestDatabase) -> SubscriptionSync {
    SubscriptionSync::new(db.database(), &Config::default())
}

#[tokio::test]
async fn test_update_ingests_line_document() {
    let db = TestDatabase::new().await.unwrap();
    let server = MockSubscriptionServer::start().await;
    server
        .mock_document(&line_document(&["a.example.com", "b.example.com"]))
        .await;

    let sync = sync_for(&db);
    let sub = db.seed_subscription("main", &server.url()).await.unwrap();

    let result = sync.update(sub.id, UpdateTrigger::Manual).await.unwrap();
    assert_eq!(result.total_fetched, 2);
    assert_eq!(result.valid_nodes, 2);
    assert_eq!(result.new_nodes, 2);
    assert_eq!(result.global_new_nodes, 2);
    assert_eq!(result.updated_nodes, 0);
    assert_eq!(result.removed_nodes, 0);

    let current = db.database().get_subscription(sub.id).await.unwrap().unwrap();
    assert_eq!(current.total_nodes, 2);
    assert!(current.last_success.is_some());
}

#[tokio::test]
async fn test_repeat_update_counts_updates_not_inserts() {
    let db = TestDatabase::new().await.unwrap();
    let server = MockSubscriptionServer::start().await;
    server
        .mock_document(&line_document(&["a.example.com", "b.example.com"]))
        .await;

    let sync = sync_for(&db);
    let sub = db.seed_subscription("main", &server.url()).await.unwrap();

    sync.update(sub.id, UpdateTrigger::Manual).await.unwrap();
    let result = sync.update(sub.id, UpdateTrigger::Manual).await.unwrap();

    assert_eq!(result.valid_nodes, 2);
    assert_eq!(result.new_nodes, 0);
    assert_eq!(result.updated_nodes, 2);
    // valid = new + updated always holds
    assert_eq!(
        result.valid_nodes,
        result.new_nodes + result.updated_nodes
    );
}

#[tokio::test]
async fn test_malformed_structured_entry_counted_but_rejected() {
    let db = TestDatabase::new().await.unwrap();
    let server = MockSubscriptionServer::start().await;
    server
        .mock_document(&yaml_document_with_malformed_entry())
        .await;

    let sync = sync_for(&db);
    let sub = db.seed_subscription("main", &server.url()).await.unwrap();

    let result = sync.update(sub.id, UpdateTrigger::Manual).await.unwrap();
    assert_eq!(result.total_fetched, 3);
    assert_eq!(result.valid_nodes, 2);
}

#[tokio::test]
async fn test_fetch_failure_increments_error_counter() {
    let db = TestDatabase::new().await.unwrap();
    let server = MockSubscriptionServer::start().await;
    server.mock_status(500).await;

    let sync = sync_for(&db);
    let sub = db.seed_subscription("main", &server.url()).await.unwrap();

    let err = sync.update(sub.id, UpdateTrigger::Manual).await.unwrap_err();
    assert!(matches!(err, CoreError::Fetch { .. }));

    let current = db.database().get_subscription(sub.id).await.unwrap().unwrap();
    assert_eq!(current.error_count, 1);
    assert_eq!(current.status, SubscriptionStatus::Active);
}

#[tokio::test]
async fn test_five_failures_then_success_recovers() {
    let db = TestDatabase::new().await.unwrap();
    let server = MockSubscriptionServer::start().await;
    server.mock_status(404).await;

    let sync = sync_for(&db);
    let sub = db.seed_subscription("main", &server.url()).await.unwrap();

    for _ in 0..5 {
        let _ = sync.update(sub.id, UpdateTrigger::Scheduled).await;
    }
    let current = db.database().get_subscription(sub.id).await.unwrap().unwrap();
    assert_eq!(current.error_count, 5);
    assert_eq!(current.status, SubscriptionStatus::Error);

    server.server.reset().await;
    server.mock_document(&line_document(&["a.example.com"])).await;

    let result = sync.update(sub.id, UpdateTrigger::Manual).await.unwrap();
    assert_eq!(result.valid_nodes, 1);

    let current = db.database().get_subscription(sub.id).await.unwrap().unwrap();
    assert_eq!(current.error_count, 0);
    assert_eq!(current.status, SubscriptionStatus::Active);
    assert_eq!(current.error_message, None);
}

#[tokio::test]
async fn test_empty_document_is_a_parse_failure() {
    let db = TestDatabase::new().await.unwrap();
    let server = MockSubscriptionServer::start().await;
    server.mock_document("not a subscription document").await;

    let sync = sync_for(&db);
    let sub = db.seed_subscription("main", &server.url()).await.unwrap();

    let err = sync.update(sub.id, UpdateTrigger::Manual).await.unwrap_err();
    assert!(matches!(err, CoreError::Parse { .. }));

    let current = db.database().get_subscription(sub.id).await.unwrap().unwrap();
    assert_eq!(current.error_count, 1);
}

#[tokio::test]
async fn test_update_writes_log_rows() {
    let db = TestDatabase::new().await.unwrap();
    let server = MockSubscriptionServer::start().await;
    server.mock_document(&line_document(&["a.example.com"])).await;

    let sync = sync_for(&db);
    let sub = db.seed_subscription("main", &server.url()).await.unwrap();

    sync.update(sub.id, UpdateTrigger::Manual).await.unwrap();
    server.server.reset().await;
    server.mock_status(500).await;
    let _ = sync.update(sub.id, UpdateTrigger::Scheduled).await;

    let logs = sync.logs(sub.id, 10).await.unwrap();
    assert_eq!(logs.len(), 2);
    // Newest first
    assert!(!logs[0].success);
    assert_eq!(logs[0].update_type, "scheduled");
    assert_eq!(logs[0].http_status, Some(500));
    assert!(logs[1].success);
    assert_eq!(logs[1].update_type, "manual");
    assert_eq!(logs[1].valid_nodes, 1);
}

#[tokio::test]
async fn test_crud_surface() {
    let db = TestDatabase::new().await.unwrap();
    let sync = sync_for(&db);

    let created = sync
        .create(nodepool::database::NewSubscription {
            name: "main".to_string(),
            url: "https://example.com/sub".to_string(),
            user_agent: None,
            auto_update: true,
            update_interval_seconds: Some(600),
        })
        .await
        .unwrap();
    assert_eq!(created.update_interval_seconds, 600);
    assert_eq!(created.user_agent, "clash");

    let fetched = sync.get(created.id).await.unwrap();
    assert_eq!(fetched.name, "main");

    let (listed, total) = sync
        .list(&nodepool::database::SubscriptionFilter {
            page: 1,
            size: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(listed.len(), 1);

    sync.delete(created.id).await.unwrap();
    let err = sync.get(created.id).await.unwrap_err();
    assert!(matches!(err, CoreError::SubscriptionNotFound { .. }));
    let err = sync.delete(created.id).await.unwrap_err();
    assert!(matches!(err, CoreError::SubscriptionNotFound { .. }));
}

#[tokio::test]
async fn test_create_rejects_bad_scheme() {
    let db = TestDatabase::new().await.unwrap();
    let sync = sync_for(&db);

    let err = sync
        .create(nodepool::database::NewSubscription {
            name: "bad".to_string(),
            url: "file:///etc/passwd".to_string(),
            user_agent: None,
            auto_update: false,
            update_interval_seconds: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidConfig { .. }));
}

#[tokio::test]
async fn test_unknown_subscription_errors() {
    let db = TestDatabase::new().await.unwrap();
    let sync = sync_for(&db);

    let err = sync.update(9999, UpdateTrigger::Manual).await.unwrap_err();
    assert!(matches!(err, CoreError::SubscriptionNotFound { id: 9999 }));
}

#[test]
fn test_url_validation() {
    assert!(validate_subscription_url("https://example.com/sub").is_ok());
    assert!(validate_subscription_url("http://example.com/sub").is_ok());
    assert!(validate_subscription_url("ftp://example.com/sub").is_err());
    assert!(validate_subscription_url("").is_err());
    assert!(validate_subscription_url("not a url").is_err());
}
