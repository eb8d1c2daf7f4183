use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{ApiError, AppState};
use crate::check_runner::CheckResult;
use crate::models::{EventType, TrackedItem};
use crate::url_normalizer;

const DETAIL_HISTORY_LIMIT: i64 = 30;
const LIST_LIMIT: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct CreateItemRequest {
    pub url: String,
    /// Accepted for forward compatibility; a single process-wide display
    /// currency is assumed.
    #[allow(dead_code)]
    pub currency: Option<String>,
}

pub async fn create_item(
    State(state): State<AppState>,
    Json(request): Json<CreateItemRequest>,
) -> Result<(axum::http::StatusCode, Json<Value>), ApiError> {
    if request.url.trim().is_empty() {
        return Err(ApiError::bad_request("url is required"));
    }

    let canonical = url_normalizer::canonicalize(&request.url).map_err(ApiError::from)?;

    // Adding the same product twice hands back the existing item
    if let Some(existing) = state
        .store
        .find_active_by_canonical_url(&canonical.url)
        .await
        .map_err(ApiError::from)?
    {
        return Ok((
            axum::http::StatusCode::CREATED,
            Json(json!({ "itemId": existing.id, "created": false })),
        ));
    }

    let item = TrackedItem::new(request.url.trim().to_string(), canonical.url, canonical.host);
    state.store.insert_item(&item).await.map_err(ApiError::from)?;
    tracing::info!(item_id = %item.id, url = %item.canonical_url, "item created");

    // Best-effort inline first check; its failure never fails the create
    let initial_check: Option<CheckResult> =
        match state.runner.run_check_for_item(&item.id).await {
            Ok(result) => Some(result),
            Err(e) => {
                tracing::warn!(item_id = %item.id, error = %e, "initial check failed");
                None
            }
        };

    let mut body = json!({ "itemId": item.id, "created": true });
    if let Some(check) = initial_check {
        body["initialCheck"] = serde_json::to_value(check).map_err(|e| {
            ApiError::internal(format!("failed to serialize check result: {e}"))
        })?;
    }

    Ok((axum::http::StatusCode::CREATED, Json(body)))
}

pub async fn list_items(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let items = state
        .store
        .list_active_items(LIST_LIMIT)
        .await
        .map_err(ApiError::from)?;

    let mut rows = Vec::with_capacity(items.len());
    for item in items {
        let snapshot = state
            .store
            .latest_snapshot(&item.id)
            .await
            .map_err(ApiError::from)?;
        let runs = state
            .store
            .runs_for_item(&item.id, 1)
            .await
            .map_err(ApiError::from)?;
        let last_price_change = state
            .store
            .latest_event_time(&item.id, EventType::PriceChanged)
            .await
            .map_err(ApiError::from)?;

        let mut row = serde_json::to_value(&item)
            .map_err(|e| ApiError::internal(e.to_string()))?;
        row["snapshots"] = json!(snapshot.into_iter().collect::<Vec<_>>());
        row["checkRuns"] = json!(runs);
        row["lastPriceChange"] = json!(last_price_change);
        rows.push(row);
    }

    Ok(Json(json!({ "items": rows })))
}

pub async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let item = state
        .store
        .get_item(&id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("item"))?;

    let snapshots = state
        .store
        .snapshots_for_item(&item.id, DETAIL_HISTORY_LIMIT)
        .await
        .map_err(ApiError::from)?;
    let runs = state
        .store
        .runs_for_item(&item.id, DETAIL_HISTORY_LIMIT)
        .await
        .map_err(ApiError::from)?;
    let notifications = state
        .store
        .notifications_for_item(&item.id, DETAIL_HISTORY_LIMIT)
        .await
        .map_err(ApiError::from)?;

    let mut body =
        serde_json::to_value(&item).map_err(|e| ApiError::internal(e.to_string()))?;
    body["snapshots"] = json!(snapshots);
    body["checkRuns"] = json!(runs);
    body["notifications"] = json!(notifications);

    Ok(Json(body))
}

pub async fn delete_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state
        .store
        .get_item(&id)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::not_found("item"))?;

    // Soft delete; history stays queryable through the detail endpoint
    state
        .store
        .deactivate_item(&id)
        .await
        .map_err(ApiError::from)?;
    tracing::info!(item_id = %id, "item retired");

    Ok(Json(json!({ "ok": true })))
}

pub async fn check_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CheckResult>, ApiError> {
    let result = state
        .runner
        .run_check_for_item(&id)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(result))
}

pub async fn discord_test(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let (status, body) = state.notifier.send_test().await.map_err(ApiError::from)?;
    Ok(Json(json!({ "status": status, "body": body })))
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
