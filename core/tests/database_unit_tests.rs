//! Unit tests for database operations
//!
//! These tests verify schema initialization, the reconcile transaction's
//! dedup accounting, subscription state transitions, and retention deletes
//! using in-memory SQLite for speed and isolation.

mod common;

use chrono::{Duration, Utc};
use common::fixtures::*;
use sqlx::Row;

use nodepool::database::{NewNodeTest, NewSubscriptionLog, SubscriptionStatus};

#[tokio::test]
async fn test_database_initialization() {
    let db = TestDatabase::new()
        .await
        .expect("Failed to create test database");

    let result = sqlx::query("SELECT name FROM sqlite_master WHERE type='table'")
        .fetch_all(db.pool())
        .await
        .expect("Failed to query tables");

    let table_names: Vec<String> = result
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect();

    assert!(table_names.contains(&"subscriptions".to_string()));
    assert!(table_names.contains(&"nodes".to_string()));
    assert!(table_names.contains(&"node_tests".to_string()));
    assert!(table_names.contains(&"subscription_logs".to_string()));
    assert!(table_names.contains(&"node_pools".to_string()));
}

#[tokio::test]
async fn test_file_backed_database_creates_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("pool.db");

    let database = nodepool::Database::new(path.to_str().unwrap()).await.unwrap();
    let row = sqlx::query("SELECT COUNT(*) AS n FROM subscriptions")
        .fetch_one(database.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<i64, _>("n"), 0);
    assert!(path.exists());
}

#[tokio::test]
async fn test_reconcile_counts_new_and_updated() {
    let db = TestDatabase::new().await.unwrap();
    let database = db.database();
    let sub = db.seed_subscription("a", "https://example.com/a").await.unwrap();

    let entries = vec![
        prepared_node("one.example.com", 443),
        prepared_node("two.example.com", 443),
    ];
    let outcome = database
        .reconcile_subscription_nodes(sub.id, &entries)
        .await
        .unwrap();

    assert_eq!(outcome.new_nodes, 2);
    assert_eq!(outcome.global_new_nodes, 2);
    assert_eq!(outcome.updated_nodes, 0);
    assert_eq!(outcome.removed_nodes, 0);
    assert_eq!(outcome.total_nodes, 2);

    // Same set again updates in place
    let outcome = database
        .reconcile_subscription_nodes(sub.id, &entries)
        .await
        .unwrap();
    assert_eq!(outcome.new_nodes, 0);
    assert_eq!(outcome.updated_nodes, 2);
    assert_eq!(outcome.removed_nodes, 0);
    assert_eq!(outcome.total_nodes, 2);
}

#[tokio::test]
async fn test_reconcile_removes_absent_nodes() {
    let db = TestDatabase::new().await.unwrap();
    let database = db.database();
    let sub = db.seed_subscription("a", "https://example.com/a").await.unwrap();

    let entries = vec![
        prepared_node("one.example.com", 443),
        prepared_node("two.example.com", 443),
        prepared_node("three.example.com", 443),
    ];
    database
        .reconcile_subscription_nodes(sub.id, &entries)
        .await
        .unwrap();

    let outcome = database
        .reconcile_subscription_nodes(sub.id, &entries[..1])
        .await
        .unwrap();
    assert_eq!(outcome.updated_nodes, 1);
    assert_eq!(outcome.removed_nodes, 2);
    assert_eq!(outcome.total_nodes, 1);
}

#[tokio::test]
async fn test_reconcile_cross_subscription_global_count() {
    let db = TestDatabase::new().await.unwrap();
    let database = db.database();
    let first = db.seed_subscription("a", "https://example.com/a").await.unwrap();
    let second = db.seed_subscription("b", "https://example.com/b").await.unwrap();

    let shared = vec![prepared_node("shared.example.com", 443)];
    let outcome = database
        .reconcile_subscription_nodes(first.id, &shared)
        .await
        .unwrap();
    assert_eq!(outcome.global_new_nodes, 1);

    // The same endpoint arriving via another subscription is new within
    // that subscription but not globally new
    let outcome = database
        .reconcile_subscription_nodes(second.id, &shared)
        .await
        .unwrap();
    assert_eq!(outcome.new_nodes, 1);
    assert_eq!(outcome.global_new_nodes, 0);
}

#[tokio::test]
async fn test_error_counter_flips_status_at_threshold() {
    let db = TestDatabase::new().await.unwrap();
    let database = db.database();
    let sub = db.seed_subscription("a", "https://example.com/a").await.unwrap();

    for _ in 0..4 {
        database.record_update_failure(sub.id, "boom").await.unwrap();
    }
    let current = database.get_subscription(sub.id).await.unwrap().unwrap();
    assert_eq!(current.error_count, 4);
    assert_eq!(current.status, SubscriptionStatus::Active);

    database.record_update_failure(sub.id, "boom").await.unwrap();
    let current = database.get_subscription(sub.id).await.unwrap().unwrap();
    assert_eq!(current.error_count, 5);
    assert_eq!(current.status, SubscriptionStatus::Error);
    assert_eq!(current.error_message.as_deref(), Some("boom"));
}

#[tokio::test]
async fn test_success_resets_error_state() {
    let db = TestDatabase::new().await.unwrap();
    let database = db.database();
    let sub = db.seed_subscription("a", "https://example.com/a").await.unwrap();

    for _ in 0..5 {
        database.record_update_failure(sub.id, "boom").await.unwrap();
    }

    let entries = vec![prepared_node("one.example.com", 443)];
    let outcome = database
        .reconcile_subscription_nodes(sub.id, &entries)
        .await
        .unwrap();
    database.record_update_success(sub.id, &outcome).await.unwrap();

    let current = database.get_subscription(sub.id).await.unwrap().unwrap();
    assert_eq!(current.error_count, 0);
    assert_eq!(current.error_message, None);
    assert_eq!(current.status, SubscriptionStatus::Active);
    assert!(current.last_update.is_some());
    assert!(current.last_success.is_some());
    assert_eq!(current.total_nodes, 1);
}

#[tokio::test]
async fn test_deleting_subscription_cascades_to_nodes() {
    let db = TestDatabase::new().await.unwrap();
    let database = db.database();
    let sub = db.seed_subscription("a", "https://example.com/a").await.unwrap();
    let nodes = db.seed_nodes(sub.id, 3).await.unwrap();
    assert_eq!(nodes.len(), 3);

    database.delete_subscription(sub.id).await.unwrap();

    let row = sqlx::query("SELECT COUNT(*) AS n FROM nodes")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!(row.get::<i64, _>("n"), 0);
}

#[tokio::test]
async fn test_retention_deletes_old_rows_only() {
    let db = TestDatabase::new().await.unwrap();
    let database = db.database();
    let sub = db.seed_subscription("a", "https://example.com/a").await.unwrap();
    let nodes = db.seed_nodes(sub.id, 1).await.unwrap();

    let record = NewNodeTest {
        node_id: nodes[0].id,
        test_types: "delay".to_string(),
        test_config: None,
        delay_ms: Some(120),
        upload_bps: None,
        download_bps: None,
        loss_rate: None,
        streaming_results: None,
        success: true,
        error_message: None,
    };
    database.insert_node_test(&record).await.unwrap();

    database
        .insert_subscription_log(&NewSubscriptionLog {
            subscription_id: sub.id,
            update_type: "manual".to_string(),
            success: true,
            ..Default::default()
        })
        .await
        .unwrap();

    // A cutoff in the past deletes nothing
    let deleted = database
        .delete_node_tests_before(Utc::now() - Duration::days(7))
        .await
        .unwrap();
    assert_eq!(deleted, 0);
    let deleted = database
        .delete_subscription_logs_before(Utc::now() - Duration::days(30))
        .await
        .unwrap();
    assert_eq!(deleted, 0);

    // A future cutoff deletes everything
    let deleted = database
        .delete_node_tests_before(Utc::now() + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    let deleted = database
        .delete_subscription_logs_before(Utc::now() + Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(deleted, 1);
}

#[tokio::test]
async fn test_node_pool_stats_refresh() {
    let db = TestDatabase::new().await.unwrap();
    let database = db.database();
    let sub = db.seed_subscription("a", "https://example.com/a").await.unwrap();
    let nodes = db.seed_nodes(sub.id, 4).await.unwrap();

    let pool = database.create_node_pool("main", None).await.unwrap();
    for node in &nodes {
        database
            .assign_node_to_pool(node.id, Some(pool.id))
            .await
            .unwrap();
    }
    db.mark_online(nodes[0].id, 100, 20, 40).await.unwrap();
    db.mark_online(nodes[1].id, 100, 20, 40).await.unwrap();

    let refreshed = database.refresh_node_pool_stats(pool.id).await.unwrap();
    assert_eq!(refreshed.total_nodes, 4);
    assert_eq!(refreshed.active_nodes, 2);
    assert!((refreshed.survival_rate - 50.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_nodes_due_for_testing_ordering() {
    let db = TestDatabase::new().await.unwrap();
    let database = db.database();
    let sub = db.seed_subscription("a", "https://example.com/a").await.unwrap();
    let nodes = db.seed_nodes(sub.id, 3).await.unwrap();

    // First node online with an old test, second offline, third untested
    db.mark_online(nodes[0].id, 100, 20, 40).await.unwrap();
    sqlx::query("UPDATE nodes SET last_test = ? WHERE id = ?")
        .bind(Utc::now() - Duration::hours(3))
        .bind(nodes[0].id)
        .execute(db.pool())
        .await
        .unwrap();
    sqlx::query("UPDATE nodes SET status = 'offline' WHERE id = ?")
        .bind(nodes[1].id)
        .execute(db.pool())
        .await
        .unwrap();

    let due = database.nodes_due_for_testing(2, 50).await.unwrap();
    let ids: Vec<i64> = due.iter().map(|n| n.id).collect();
    // Offline nodes are skipped; online comes before unknown
    assert_eq!(ids, vec![nodes[0].id, nodes[2].id]);
}
