use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use pricehawk::web::create_router;

use super::*;

fn app(harness: &TestHarness) -> Router {
    create_router(harness.state.clone())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let harness = create_test_state(always_in_stock(4999)).await.unwrap();
    let response = app(&harness).oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_create_item_runs_initial_check() {
    let harness = create_test_state(always_in_stock(4999)).await.unwrap();

    let response = app(&harness)
        .oneshot(post_json(
            "/items",
            json!({"url": "https://shop.example.com/p/1?utm_source=mail"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = body_json(response).await;
    assert_eq!(body["created"], true);
    assert_eq!(body["initialCheck"]["status"], "SUCCESS");
    assert!(body["itemId"].is_string());

    let item_id = body["itemId"].as_str().unwrap();
    let snapshots = harness.store.snapshots_for_item(item_id, 10).await.unwrap();
    assert_eq!(snapshots.len(), 1);
}

#[tokio::test]
async fn test_create_item_twice_dedupes_on_canonical_url() {
    let harness = create_test_state(always_in_stock(4999)).await.unwrap();

    let first = app(&harness)
        .oneshot(post_json(
            "/items",
            json!({"url": "https://shop.example.com/p/1?utm_source=mail"}),
        ))
        .await
        .unwrap();
    let first_body = body_json(first).await;

    // Tracking parameters differ, canonical URL does not
    let second = app(&harness)
        .oneshot(post_json(
            "/items",
            json!({"url": "https://shop.example.com/p/1?gclid=zzz"}),
        ))
        .await
        .unwrap();
    let second_body = body_json(second).await;

    assert_eq!(second_body["created"], false);
    assert_eq!(second_body["itemId"], first_body["itemId"]);
}

#[tokio::test]
async fn test_create_item_invalid_url_is_400() {
    let harness = create_test_state(always_in_stock(4999)).await.unwrap();

    let response = app(&harness)
        .oneshot(post_json("/items", json!({"url": "not a url"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_list_items_includes_latest_snapshot_and_run() {
    let harness = create_test_state(always_in_stock(4999)).await.unwrap();
    app(&harness)
        .oneshot(post_json(
            "/items",
            json!({"url": "https://shop.example.com/p/1"}),
        ))
        .await
        .unwrap();

    let response = app(&harness).oneshot(get("/items")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);

    let item = &items[0];
    assert_eq!(item["siteHost"], "shop.example.com");
    assert_eq!(item["snapshots"][0]["priceCents"], 4999);
    assert_eq!(item["checkRuns"][0]["status"], "SUCCESS");
    assert_eq!(item["lastPriceChange"], Value::Null);
}

#[tokio::test]
async fn test_item_detail_and_404() {
    let harness = create_test_state(always_in_stock(4999)).await.unwrap();
    let created = app(&harness)
        .oneshot(post_json(
            "/items",
            json!({"url": "https://shop.example.com/p/1"}),
        ))
        .await
        .unwrap();
    let item_id = body_json(created).await["itemId"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app(&harness)
        .oneshot(get(&format!("/items/{item_id}")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["id"], item_id.as_str());
    assert!(body["snapshots"].is_array());
    assert!(body["checkRuns"].is_array());
    assert!(body["notifications"].is_array());

    let missing = app(&harness).oneshot(get("/items/doesnotexist")).await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    let body = body_json(missing).await;
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_delete_is_soft() {
    let harness = create_test_state(always_in_stock(4999)).await.unwrap();
    let created = app(&harness)
        .oneshot(post_json(
            "/items",
            json!({"url": "https://shop.example.com/p/1"}),
        ))
        .await
        .unwrap();
    let item_id = body_json(created).await["itemId"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app(&harness)
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/items/{item_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["ok"], true);

    // Gone from the active list, still present in detail
    let list = body_json(app(&harness).oneshot(get("/items")).await.unwrap()).await;
    assert_eq!(list["items"].as_array().unwrap().len(), 0);

    let detail = app(&harness)
        .oneshot(get(&format!("/items/{item_id}")))
        .await
        .unwrap();
    assert_eq!(detail.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_manual_check_endpoint() {
    let harness = create_test_state(always_in_stock(19999)).await.unwrap();
    let created = app(&harness)
        .oneshot(post_json(
            "/items",
            json!({"url": "https://shop.example.com/p/1"}),
        ))
        .await
        .unwrap();
    let item_id = body_json(created).await["itemId"]
        .as_str()
        .unwrap()
        .to_string();

    // Next check sees a lower price
    harness.extractor.push(success_attempt(Some(14999), Some(true)));
    let response = app(&harness)
        .oneshot(post_json(&format!("/items/{item_id}/check"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "SUCCESS");
    assert_eq!(body["priceChanged"], true);

    // The price change produced exactly one notification row
    let notifications = harness
        .store
        .notifications_for_item(&item_id, 10)
        .await
        .unwrap();
    assert_eq!(notifications.len(), 1);
}

#[tokio::test]
async fn test_check_on_retired_item_is_404() {
    let harness = create_test_state(always_in_stock(4999)).await.unwrap();
    let created = app(&harness)
        .oneshot(post_json(
            "/items",
            json!({"url": "https://shop.example.com/p/1"}),
        ))
        .await
        .unwrap();
    let item_id = body_json(created).await["itemId"]
        .as_str()
        .unwrap()
        .to_string();

    harness.store.deactivate_item(&item_id).await.unwrap();

    let response = app(&harness)
        .oneshot(post_json(&format!("/items/{item_id}/check"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_discord_test_endpoint_without_webhook() {
    let harness = create_test_state(always_in_stock(4999)).await.unwrap();
    let response = app(&harness)
        .oneshot(post_json("/discord/test", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], 0);
    assert!(body["body"].as_str().unwrap().contains("not configured"));
}
