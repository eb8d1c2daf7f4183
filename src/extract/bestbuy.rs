use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::extract::name::normalize_product_name;
use crate::extract::{content_hash, Candidate, Evidence, ExtractResult};
use crate::models::{ExtractionMethod, StockState};

const API_BASE: &str = "https://www.bestbuy.ca/api/v2/json/product";

/// Best Buy Canada adapter: product pages carry a numeric SKU that resolves
/// through a public JSON API, which is far more reliable than the rendered
/// page.
pub struct BestBuyAdapter {
    client: reqwest::Client,
    sku_regex: Regex,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BestBuyProduct {
    name: Option<String>,
    sale_price: Option<f64>,
    regular_price: Option<f64>,
    availability: Option<BestBuyAvailability>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BestBuyAvailability {
    online_availability: Option<String>,
    is_available_online: Option<bool>,
    in_store_availability: Option<serde_json::Value>,
}

impl BestBuyAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            sku_regex: Regex::new(r"\d{6,}").unwrap(),
        }
    }

    pub fn sku_of(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?;
        if !(host == "bestbuy.ca" || host.ends_with(".bestbuy.ca")) {
            return None;
        }

        if let Some(segments) = url.path_segments() {
            for segment in segments {
                if let Some(m) = self.sku_regex.find(segment) {
                    return Some(m.as_str().to_string());
                }
            }
        }

        for (name, value) in url.query_pairs() {
            if matches!(name.as_ref(), "sku" | "id") {
                if let Some(m) = self.sku_regex.find(&value) {
                    return Some(m.as_str().to_string());
                }
            }
        }

        None
    }

    pub async fn try_extract(&self, raw_url: &str, timeout_ms: u64) -> Option<ExtractResult> {
        let url = Url::parse(raw_url).ok()?;
        let sku = self.sku_of(&url)?;
        let endpoint = format!("{API_BASE}/{sku}");
        let timeout = Duration::from_millis((timeout_ms / 2).max(2500));

        let response = match self.client.get(&endpoint).timeout(timeout).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(endpoint = %endpoint, error = %e, "bestbuy probe failed");
                return None;
            }
        };
        if !response.status().is_success() {
            return None;
        }

        let body = response.text().await.ok()?;
        let body_hash = content_hash(&body);
        let product: BestBuyProduct = serde_json::from_str(&body).ok()?;

        let price_cents = product
            .sale_price
            .or(product.regular_price)
            .map(|p| (p * 100.0).round() as i64)
            .filter(|cents| *cents > 0);

        let stock_state = stock_state_of(product.availability.as_ref());

        let product_name = product
            .name
            .map(|n| normalize_product_name(&n))
            .filter(|n| !n.is_empty());

        tracing::debug!(endpoint = %endpoint, sku = %sku, stock = ?stock_state, "bestbuy probe succeeded");

        let evidence = Evidence {
            title: None,
            meta_description: None,
            candidates: vec![Candidate {
                source: "bestbuy".to_string(),
                name: product_name.clone(),
                price_cents,
                score: 0.96,
                evidence: endpoint,
            }],
            stock_signals: Default::default(),
            variant_stock: Vec::new(),
            final_url: None,
        };

        Some(ExtractResult {
            product_name,
            price_cents,
            in_stock: stock_state.in_stock(),
            stock_state,
            variant_stock: Vec::new(),
            confidence: 0.96,
            method: ExtractionMethod::Static,
            evidence,
            content_hash: body_hash,
        })
    }
}

fn stock_state_of(availability: Option<&BestBuyAvailability>) -> StockState {
    let Some(availability) = availability else {
        return StockState::Unknown;
    };

    if let Some(online) = availability.online_availability.as_deref() {
        if online.contains("InStock") {
            return StockState::InStock;
        }
        if online.contains("OutOfStock")
            || online.contains("SoldOut")
            || online.contains("Backorder")
        {
            return StockState::OutOfStock;
        }
    }

    match availability.is_available_online {
        Some(true) => StockState::InStock,
        Some(false) => {
            // Last resort: in-store availability keeps the listing alive
            if truthy(availability.in_store_availability.as_ref()) {
                StockState::InStock
            } else {
                StockState::OutOfStock
            }
        }
        None => StockState::Unknown,
    }
}

fn truthy(value: Option<&serde_json::Value>) -> bool {
    match value {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => s.contains("InStock") || s == "true",
        Some(serde_json::Value::Object(map)) => map
            .get("isAvailable")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        _ => false,
    }
}
