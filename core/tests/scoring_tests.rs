//! Integration tests for node scoring and best-node selection.

mod common;

use common::fixtures::*;

use nodepool::{ScoringEngine, SelectionFilter};

#[tokio::test]
async fn test_select_best_ranks_by_delay_ladder() {
    let db = TestDatabase::new().await.unwrap();
    let sub = db.seed_subscription("a", "https://example.com/a").await.unwrap();
    let nodes = db.seed_nodes(sub.id, 10).await.unwrap();

    // Two nodes in the top delay tier, one alone in the second, the rest
    // far beyond every breakpoint; identical speed keeps the other factors
    // flat so the ranking is driven by delay alone
    for (i, node) in nodes.iter().enumerate() {
        let delay = match i {
            0 => 60,
            1 => 90,
            2 => 150,
            _ => 600 + i as i64,
        };
        db.mark_online(node.id, delay, 30, 60).await.unwrap();
    }

    let engine = ScoringEngine::new(db.database());
    let best = engine
        .select_best(&SelectionFilter::default(), 3)
        .await
        .unwrap();

    assert_eq!(best.len(), 3);
    let best_ids: Vec<i64> = best.iter().map(|s| s.node.id).collect();
    // The 60ms and 90ms nodes tie for the top slots in either order; the
    // 150ms node is alone in the next tier and must land third
    assert!(best_ids.contains(&nodes[0].id));
    assert!(best_ids.contains(&nodes[1].id));
    assert_eq!(best_ids[2], nodes[2].id);
    assert!(best[0].score >= best[1].score && best[1].score > best[2].score);
}

#[tokio::test]
async fn test_scores_carry_factor_breakdown() {
    let db = TestDatabase::new().await.unwrap();
    let sub = db.seed_subscription("a", "https://example.com/a").await.unwrap();
    let nodes = db.seed_nodes(sub.id, 1).await.unwrap();
    db.mark_online(nodes[0].id, 80, 60, 120).await.unwrap();

    let engine = ScoringEngine::new(db.database());
    let best = engine
        .select_best(&SelectionFilter::default(), 1)
        .await
        .unwrap();

    let scored = &best[0];
    assert_eq!(scored.delay_score, 100.0);
    assert_eq!(scored.speed_score, 100.0);
    assert_eq!(scored.stability_score, 100.0);
    assert_eq!(scored.streaming_score, 50.0);
    let expected = 0.4 * 100.0 + 0.3 * 100.0 + 0.2 * 100.0 + 0.1 * 50.0;
    assert!((scored.score - expected).abs() < 1e-9);
}

#[tokio::test]
async fn test_failures_drag_the_score_down() {
    let db = TestDatabase::new().await.unwrap();
    let sub = db.seed_subscription("a", "https://example.com/a").await.unwrap();
    let nodes = db.seed_nodes(sub.id, 2).await.unwrap();
    db.mark_online(nodes[0].id, 80, 30, 60).await.unwrap();
    db.mark_online(nodes[1].id, 80, 30, 60).await.unwrap();
    db.set_continuous_failures(nodes[1].id, 4).await.unwrap();

    let engine = ScoringEngine::new(db.database());
    let best = engine
        .select_best(&SelectionFilter::default(), 2)
        .await
        .unwrap();

    assert_eq!(best[0].node.id, nodes[0].id);
    assert_eq!(best[1].stability_score, 60.0);
    assert!(best[0].score > best[1].score);
}

#[tokio::test]
async fn test_offline_nodes_are_never_candidates() {
    let db = TestDatabase::new().await.unwrap();
    let sub = db.seed_subscription("a", "https://example.com/a").await.unwrap();
    let nodes = db.seed_nodes(sub.id, 3).await.unwrap();
    // Only one node ever goes online
    db.mark_online(nodes[1].id, 80, 30, 60).await.unwrap();

    let engine = ScoringEngine::new(db.database());
    let best = engine
        .select_best(&SelectionFilter::default(), 10)
        .await
        .unwrap();

    assert_eq!(best.len(), 1);
    assert_eq!(best[0].node.id, nodes[1].id);
}

#[tokio::test]
async fn test_protocol_filter_narrows_candidates() {
    let db = TestDatabase::new().await.unwrap();
    let sub = db.seed_subscription("a", "https://example.com/a").await.unwrap();
    let nodes = db.seed_nodes(sub.id, 2).await.unwrap();
    db.mark_online(nodes[0].id, 80, 30, 60).await.unwrap();
    db.mark_online(nodes[1].id, 80, 30, 60).await.unwrap();

    let engine = ScoringEngine::new(db.database());
    let filter = SelectionFilter {
        protocol: Some("vmess".to_string()),
        ..Default::default()
    };
    let best = engine.select_best(&filter, 10).await.unwrap();
    assert!(best.is_empty());

    let filter = SelectionFilter {
        protocol: Some("trojan".to_string()),
        ..Default::default()
    };
    let best = engine.select_best(&filter, 10).await.unwrap();
    assert_eq!(best.len(), 2);
}
