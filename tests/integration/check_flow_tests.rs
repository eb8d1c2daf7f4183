use pricehawk::extract::{reason, ExtractionAttempt};
use pricehawk::models::{CheckRun, CheckRunOutcome, CheckStatus, EventType, TrackedItem};

use super::*;

async fn add_item(store: &Store, path: &str) -> TrackedItem {
    let url = format!("https://shop.example.com{path}");
    let item = TrackedItem::new(url.clone(), url, "shop.example.com".to_string());
    store.insert_item(&item).await.unwrap();
    item
}

#[tokio::test]
async fn test_exactly_one_run_per_invocation() {
    let harness = create_test_state(always_in_stock(4999)).await.unwrap();
    let item = add_item(&harness.store, "/p/1").await;

    for expected_runs in 1..=3 {
        harness.state.runner.run_check_for_item(&item.id).await.unwrap();
        let runs = harness.store.runs_for_item(&item.id, 50).await.unwrap();
        assert_eq!(runs.len(), expected_runs);
    }
}

#[tokio::test]
async fn test_snapshot_only_on_success() {
    let harness = create_test_state(always_in_stock(4999)).await.unwrap();
    let item = add_item(&harness.store, "/p/1").await;

    harness
        .extractor
        .push(ExtractionAttempt::needs_review(reason::LOW_CONFIDENCE_EXTRACTION));
    let review = harness
        .state
        .runner
        .run_check_for_item(&item.id)
        .await
        .unwrap();
    assert_eq!(review.status, CheckStatus::NeedsReview);
    assert!(harness
        .store
        .snapshots_for_item(&item.id, 10)
        .await
        .unwrap()
        .is_empty());

    let success = harness
        .state
        .runner
        .run_check_for_item(&item.id)
        .await
        .unwrap();
    assert_eq!(success.status, CheckStatus::Success);
    assert_eq!(
        harness
            .store
            .snapshots_for_item(&item.id, 10)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_back_in_stock_transition_without_price_event() {
    // Prior snapshot: out of stock, no price. New: in stock at 149.99.
    // BACK_IN_STOCK fires; PRICE_CHANGED does not (prior price was null).
    let harness = create_test_state(always_in_stock(14999)).await.unwrap();
    let item = add_item(&harness.store, "/p/1").await;

    harness.extractor.push(success_attempt(None, Some(false)));
    harness
        .extractor
        .push(success_attempt(Some(14999), Some(true)));

    harness.state.runner.run_check_for_item(&item.id).await.unwrap();
    let second = harness
        .state
        .runner
        .run_check_for_item(&item.id)
        .await
        .unwrap();

    assert!(second.back_in_stock);
    assert!(!second.price_changed);

    let notifications = harness
        .store
        .notifications_for_item(&item.id, 10)
        .await
        .unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].event_type, EventType::BackInStock);
}

#[tokio::test]
async fn test_price_change_detection_is_reflexive_false() {
    let harness = create_test_state(always_in_stock(4999)).await.unwrap();
    let item = add_item(&harness.store, "/p/1").await;

    for _ in 0..3 {
        let result = harness
            .state
            .runner
            .run_check_for_item(&item.id)
            .await
            .unwrap();
        assert!(!result.price_changed);
    }
    assert!(harness
        .store
        .notifications_for_item(&item.id, 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_change_detection_relies_only_on_persisted_state() {
    // Simulate a restart by rebuilding the runner stack over the same store
    let first = create_test_state(always_in_stock(19999)).await.unwrap();
    let item = add_item(&first.store, "/p/1").await;
    first.state.runner.run_check_for_item(&item.id).await.unwrap();

    let config = test_config();
    let extractor = std::sync::Arc::new(ScriptedExtractor::new(always_in_stock(14999)));
    let notifier = std::sync::Arc::new(Notifier::new(first.store.clone(), None));
    let runner = CheckRunner::new(
        first.store.clone(),
        extractor,
        notifier,
        config,
    );

    let result = runner.run_check_for_item(&item.id).await.unwrap();
    assert!(result.price_changed);
}

#[tokio::test]
async fn test_ai_budget_exhaustion_flips_next_run_to_review() {
    let harness = create_test_state(always_in_stock(4999)).await.unwrap();
    let item = add_item(&harness.store, "/p/1").await;

    // A prior run today burned past the daily budget
    let prior = CheckRun::begin(item.id.clone());
    harness.store.insert_check_run(&prior).await.unwrap();
    harness
        .store
        .finalize_check_run(
            &prior.id,
            &CheckRunOutcome {
                status: CheckStatus::Success,
                used_ai: true,
                token_input: Some(5_000_000),
                token_output: Some(500_000),
                estimated_cost_usd: Some(2.25),
                ..Default::default()
            },
            chrono::Utc::now(),
        )
        .await
        .unwrap();

    // The pipeline, seeing allow_ai=false on a low-confidence page, reports
    // the budget reason; the runner must classify it as NEEDS_REVIEW
    harness.extractor.push(ExtractionAttempt::needs_review(
        reason::AI_BUDGET_EXCEEDED_OR_DISABLED,
    ));

    let result = harness
        .state
        .runner
        .run_check_for_item(&item.id)
        .await
        .unwrap();
    assert_eq!(result.status, CheckStatus::NeedsReview);
    assert_eq!(
        result.error_code.as_deref(),
        Some(reason::AI_BUDGET_EXCEEDED_OR_DISABLED)
    );
    assert!(result.snapshot_id.is_none());

    let runs = harness.store.runs_for_item(&item.id, 10).await.unwrap();
    assert_eq!(runs[0].status, CheckStatus::NeedsReview);
    assert_eq!(
        runs[0].error_code.as_deref(),
        Some(reason::AI_BUDGET_EXCEEDED_OR_DISABLED)
    );
}

#[tokio::test]
async fn test_regional_redirect_reason_maps_to_review() {
    let harness = create_test_state(always_in_stock(4999)).await.unwrap();
    let item = add_item(&harness.store, "/p/1").await;

    for code in [reason::REGIONAL_REDIRECT_MISMATCH, reason::URL_REDIRECT_BLOCKED] {
        harness.extractor.push(ExtractionAttempt::needs_review(code));
        let result = harness
            .state
            .runner
            .run_check_for_item(&item.id)
            .await
            .unwrap();
        assert_eq!(result.status, CheckStatus::NeedsReview, "reason {code}");
    }
}

#[tokio::test]
async fn test_content_hash_stable_across_runs() {
    let harness = create_test_state(always_in_stock(4999)).await.unwrap();
    let item = add_item(&harness.store, "/p/1").await;

    harness.state.runner.run_check_for_item(&item.id).await.unwrap();
    harness.state.runner.run_check_for_item(&item.id).await.unwrap();

    let snapshots = harness.store.snapshots_for_item(&item.id, 10).await.unwrap();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0].content_hash, snapshots[1].content_hash);
}
