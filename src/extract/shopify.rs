use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::extract::name::normalize_product_name;
use crate::extract::stock::{dedupe_variants, sanitize_variant_label};
use crate::extract::{content_hash, Candidate, Evidence, ExtractResult, VariantStock};
use crate::models::{ExtractionMethod, StockState, VariantAvailability};

/// Shopify storefront adapter. Any `/products/<handle>` URL is probed
/// against the storefront's public product JSON endpoints before we bother
/// parsing HTML: `<base>/products/<handle>.js` (prices in cents) and
/// `.json` (prices in whole currency units).
pub struct ShopifyAdapter {
    client: reqwest::Client,
}

/// `.js` payload: flat product object, integer prices in cents.
#[derive(Debug, Deserialize)]
struct StorefrontJs {
    title: Option<String>,
    price: Option<serde_json::Value>,
    #[serde(default)]
    variants: Vec<JsVariant>,
    available: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct JsVariant {
    title: Option<String>,
    price: Option<serde_json::Value>,
    available: Option<bool>,
}

/// `.json` payload: wrapped product object, decimal-string prices.
#[derive(Debug, Deserialize)]
struct AdminJson {
    product: AdminProduct,
}

#[derive(Debug, Deserialize)]
struct AdminProduct {
    title: Option<String>,
    #[serde(default)]
    variants: Vec<JsVariant>,
}

#[derive(Debug)]
struct ProbeResult {
    name: Option<String>,
    price_cents: Option<i64>,
    stock_state: StockState,
    variants: Vec<VariantStock>,
    confidence: f64,
    endpoint: String,
    body_hash: String,
}

impl ShopifyAdapter {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Extract the product handle when the URL looks like a Shopify
    /// storefront product page.
    pub fn handle_of(url: &Url) -> Option<String> {
        let mut segments = url.path_segments()?;
        while let Some(segment) = segments.next() {
            if segment == "products" {
                let handle = segments.next()?;
                let handle = handle.trim_end_matches(".json").trim_end_matches(".js");
                if !handle.is_empty() {
                    return Some(handle.to_string());
                }
            }
        }
        None
    }

    /// Probe both endpoints and keep the better response; `None` means the
    /// caller should fall through to the next strategy.
    pub async fn try_extract(&self, raw_url: &str, timeout_ms: u64) -> Option<ExtractResult> {
        let url = Url::parse(raw_url).ok()?;
        let handle = Self::handle_of(&url)?;
        let base = format!("{}://{}", url.scheme(), url.host_str()?);
        let probe_timeout = Duration::from_millis((timeout_ms / 2).max(2500));

        let js_url = format!("{base}/products/{handle}.js");
        let json_url = format!("{base}/products/{handle}.json");

        let mut best: Option<ProbeResult> = None;
        for (endpoint, cents_prices) in [(js_url, true), (json_url, false)] {
            let Some(result) = self.probe(&endpoint, cents_prices, probe_timeout).await else {
                continue;
            };
            best = match best {
                Some(current) if probe_score(&current) >= probe_score(&result) => Some(current),
                _ => Some(result),
            };
        }

        let probe = best?;
        tracing::debug!(endpoint = %probe.endpoint, confidence = probe.confidence, "shopify probe succeeded");
        Some(into_result(probe))
    }

    async fn probe(
        &self,
        endpoint: &str,
        cents_prices: bool,
        timeout: Duration,
    ) -> Option<ProbeResult> {
        let response = match self.client.get(endpoint).timeout(timeout).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(endpoint, error = %e, "shopify probe failed");
                return None;
            }
        };

        // Redirects mean "not this storefront"; non-2xx means no product
        if !response.status().is_success() {
            return None;
        }

        let body = response.text().await.ok()?;
        let body_hash = content_hash(&body);

        let (name, own_price, variants_raw, available) = if cents_prices {
            let parsed: StorefrontJs = serde_json::from_str(&body).ok()?;
            (parsed.title, parsed.price, parsed.variants, parsed.available)
        } else {
            let parsed: AdminJson = serde_json::from_str(&body).ok()?;
            (
                parsed.product.title,
                None,
                parsed.product.variants,
                None,
            )
        };

        let variants: Vec<(Option<i64>, Option<bool>, Option<String>)> = variants_raw
            .into_iter()
            .map(|v| {
                (
                    v.price.as_ref().and_then(|p| parse_price(p, cents_prices)),
                    v.available,
                    v.title,
                )
            })
            .collect();

        // Prefer the first purchasable variant's price
        let price_cents = variants
            .iter()
            .find(|(price, available, _)| price.is_some() && *available == Some(true))
            .and_then(|(price, _, _)| *price)
            .or_else(|| own_price.as_ref().and_then(|p| parse_price(p, cents_prices)))
            .or_else(|| variants.iter().find_map(|(price, _, _)| *price));

        let known_in = variants.iter().filter(|(_, a, _)| *a == Some(true)).count();
        let known_out = variants.iter().filter(|(_, a, _)| *a == Some(false)).count();

        let stock_state = if known_in > 0 && known_out > 0 {
            StockState::Partial
        } else if known_in > 0 {
            StockState::InStock
        } else if known_out > 0 {
            StockState::OutOfStock
        } else {
            match available {
                Some(true) => StockState::InStock,
                Some(false) => StockState::OutOfStock,
                None => StockState::Unknown,
            }
        };

        let variant_stock = dedupe_variants(
            variants
                .iter()
                .filter_map(|(_, available, title)| {
                    let label = sanitize_variant_label(title.as_deref()?)?;
                    let stock = match available {
                        Some(true) => VariantAvailability::In,
                        Some(false) => VariantAvailability::Out,
                        None => VariantAvailability::Unknown,
                    };
                    Some(VariantStock { label, stock })
                })
                .collect(),
        );

        let mut confidence: f64 = 0.84;
        if price_cents.is_some() {
            confidence += 0.06;
        }
        if stock_state != StockState::Unknown {
            confidence += 0.07;
        }
        if !variant_stock.is_empty() {
            confidence += 0.03;
        }

        Some(ProbeResult {
            name,
            price_cents,
            stock_state,
            variants: variant_stock,
            confidence: confidence.min(0.99),
            endpoint: endpoint.to_string(),
            body_hash,
        })
    }
}

/// Ranking for picking the better of the two probe responses.
fn probe_score(probe: &ProbeResult) -> f64 {
    let stock_score = match probe.stock_state {
        StockState::Partial => 3.0,
        StockState::InStock | StockState::OutOfStock => 2.4,
        StockState::Unknown => 0.0,
    };
    let known_variants = probe
        .variants
        .iter()
        .filter(|v| v.stock != VariantAvailability::Unknown)
        .count()
        .min(8);

    let price_score = if probe.price_cents.is_some() { 2.0 } else { 0.0 };
    price_score + stock_score + 0.25 * known_variants as f64 + probe.confidence
}

fn into_result(probe: ProbeResult) -> ExtractResult {
    let product_name = probe
        .name
        .map(|n| normalize_product_name(&n))
        .filter(|n| !n.is_empty());

    let evidence = Evidence {
        title: None,
        meta_description: None,
        candidates: vec![Candidate {
            source: "shopify".to_string(),
            name: product_name.clone(),
            price_cents: probe.price_cents,
            score: probe.confidence,
            evidence: probe.endpoint,
        }],
        stock_signals: Default::default(),
        variant_stock: probe.variants.clone(),
        final_url: None,
    };

    ExtractResult {
        product_name,
        price_cents: probe.price_cents,
        in_stock: probe.stock_state.in_stock(),
        stock_state: probe.stock_state,
        variant_stock: probe.variants,
        confidence: probe.confidence,
        method: ExtractionMethod::ShopifyJson,
        evidence,
        content_hash: probe.body_hash,
    }
}

/// Shopify serializes prices either as integer cents (`.js`) or as decimal
/// whole-currency strings (`.json`); numbers without a fraction are
/// ambiguous and follow the endpoint convention.
fn parse_price(value: &serde_json::Value, cents: bool) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => {
            if cents {
                let v = n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64))?;
                (v > 0).then_some(v)
            } else {
                let v = (n.as_f64()? * 100.0).round() as i64;
                (v > 0).then_some(v)
            }
        }
        serde_json::Value::String(s) => {
            let value = Decimal::from_str(s.trim()).ok()?;
            if value <= Decimal::ZERO {
                return None;
            }
            let scaled = if cents {
                value
            } else {
                value * Decimal::from(100)
            };
            scaled.round().to_i64()
        }
        _ => None,
    }
}
