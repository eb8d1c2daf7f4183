use pricehawk::models::{
    EventType, ExtractionMethod, NewPriceSnapshot, Notification, PriceSnapshot, StockState,
    TrackedItem,
};

use super::*;

fn snapshot_for(item: &TrackedItem, price_cents: Option<i64>) -> PriceSnapshot {
    PriceSnapshot::new(NewPriceSnapshot {
        item_id: item.id.clone(),
        product_name: "Widget".to_string(),
        price_cents,
        in_stock: Some(true),
        stock_state: StockState::InStock,
        extraction_method: ExtractionMethod::Static,
        confidence: 0.9,
        evidence_json: "{}".to_string(),
        content_hash: "hash".to_string(),
    })
}

#[tokio::test]
async fn test_history_survives_soft_delete() {
    let harness = create_test_state(always_in_stock(4999)).await.unwrap();
    let url = "https://shop.example.com/p/1".to_string();
    let item = TrackedItem::new(url.clone(), url, "shop.example.com".to_string());
    harness.store.insert_item(&item).await.unwrap();
    harness
        .store
        .insert_snapshot(&snapshot_for(&item, Some(4999)))
        .await
        .unwrap();

    harness.store.deactivate_item(&item.id).await.unwrap();

    // Snapshot rows keep referencing the retired item
    let snapshots = harness.store.snapshots_for_item(&item.id, 10).await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].item_id, item.id);
}

#[tokio::test]
async fn test_retired_items_leave_the_sweep_set() {
    let harness = create_test_state(always_in_stock(4999)).await.unwrap();
    for i in 0..3 {
        let url = format!("https://shop.example.com/p/{i}");
        let item = TrackedItem::new(url.clone(), url, "shop.example.com".to_string());
        harness.store.insert_item(&item).await.unwrap();
        if i == 1 {
            harness.store.deactivate_item(&item.id).await.unwrap();
        }
    }

    let active = harness.store.list_active_items(200).await.unwrap();
    assert_eq!(active.len(), 2);
}

#[tokio::test]
async fn test_items_listed_in_creation_order() {
    let harness = create_test_state(always_in_stock(4999)).await.unwrap();
    let mut ids = Vec::new();
    for i in 0..5 {
        let url = format!("https://shop.example.com/p/{i}");
        let mut item = TrackedItem::new(url.clone(), url, "shop.example.com".to_string());
        item.created_at = chrono::Utc::now() + chrono::Duration::milliseconds(i);
        harness.store.insert_item(&item).await.unwrap();
        ids.push(item.id);
    }

    let listed = harness.store.list_active_items(200).await.unwrap();
    let listed_ids: Vec<String> = listed.into_iter().map(|i| i.id).collect();
    assert_eq!(listed_ids, ids);
}

#[tokio::test]
async fn test_notification_claim_races_resolve_to_one_row() {
    let harness = create_test_state(always_in_stock(4999)).await.unwrap();
    let url = "https://shop.example.com/p/1".to_string();
    let item = TrackedItem::new(url.clone(), url, "shop.example.com".to_string());
    harness.store.insert_item(&item).await.unwrap();
    let snapshot = snapshot_for(&item, Some(4999));
    harness.store.insert_snapshot(&snapshot).await.unwrap();

    // Two concurrent claimants for the same (item, snapshot, event)
    let store_a = harness.store.clone();
    let store_b = harness.store.clone();
    let claim_a = Notification::claim(item.id.clone(), snapshot.id.clone(), EventType::PriceChanged);
    let claim_b = Notification::claim(item.id.clone(), snapshot.id.clone(), EventType::PriceChanged);

    let (a, b) = tokio::join!(
        store_a.claim_notification(&claim_a),
        store_b.claim_notification(&claim_b),
    );
    let winners = [a.unwrap(), b.unwrap()];
    assert_eq!(winners.iter().filter(|w| **w).count(), 1);

    let rows = harness.store.notifications_for_item(&item.id, 10).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn test_ai_spend_window_is_daily() {
    use pricehawk::models::{CheckRun, CheckRunOutcome, CheckStatus};

    let harness = create_test_state(always_in_stock(4999)).await.unwrap();
    let url = "https://shop.example.com/p/1".to_string();
    let item = TrackedItem::new(url.clone(), url, "shop.example.com".to_string());
    harness.store.insert_item(&item).await.unwrap();

    // Yesterday's spend must not count toward today
    let mut old_run = CheckRun::begin(item.id.clone());
    old_run.started_at = chrono::Utc::now() - chrono::Duration::days(2);
    harness.store.insert_check_run(&old_run).await.unwrap();
    // finalize_check_run does not touch started_at
    harness
        .store
        .finalize_check_run(
            &old_run.id,
            &CheckRunOutcome {
                status: CheckStatus::Success,
                used_ai: true,
                estimated_cost_usd: Some(0.75),
                ..Default::default()
            },
            old_run.started_at + chrono::Duration::seconds(30),
        )
        .await
        .unwrap();

    let today_start = chrono::Utc::now()
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc();
    assert_eq!(harness.store.ai_spend_since(today_start).await.unwrap(), 0.0);
}
