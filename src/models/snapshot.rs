use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::{generate_id, ExtractionMethod, StockState};

/// Immutable record of one successful extraction. Rows are append-only;
/// history for an item is totally ordered by `checked_at`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PriceSnapshot {
    pub id: String,
    pub item_id: String,
    pub checked_at: DateTime<Utc>,
    pub product_name: String,
    /// Minor currency units; None when the product was not purchasable.
    pub price_cents: Option<i64>,
    pub in_stock: Option<bool>,
    pub stock_state: StockState,
    pub extraction_method: ExtractionMethod,
    pub confidence: f64,
    /// Auditable trace of the inputs that produced this snapshot.
    pub evidence_json: String,
    /// sha-256 of the fetched HTML, stable under byte-identical input.
    pub content_hash: String,
}

#[derive(Debug, Clone)]
pub struct NewPriceSnapshot {
    pub item_id: String,
    pub product_name: String,
    pub price_cents: Option<i64>,
    pub in_stock: Option<bool>,
    pub stock_state: StockState,
    pub extraction_method: ExtractionMethod,
    pub confidence: f64,
    pub evidence_json: String,
    pub content_hash: String,
}

impl PriceSnapshot {
    pub fn new(new: NewPriceSnapshot) -> Self {
        Self {
            id: generate_id(),
            item_id: new.item_id,
            checked_at: Utc::now(),
            product_name: new.product_name,
            price_cents: new.price_cents,
            in_stock: new.in_stock,
            stock_state: new.stock_state,
            extraction_method: new.extraction_method,
            confidence: new.confidence,
            evidence_json: new.evidence_json,
            content_hash: new.content_hash,
        }
    }

    pub fn evidence(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.evidence_json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PriceSnapshot {
        PriceSnapshot::new(NewPriceSnapshot {
            item_id: "item123".to_string(),
            product_name: "Widget Pro".to_string(),
            price_cents: Some(4999),
            in_stock: Some(true),
            stock_state: StockState::InStock,
            extraction_method: ExtractionMethod::Static,
            confidence: 0.95,
            evidence_json: "{\"title\":\"Widget Pro\"}".to_string(),
            content_hash: "abc".to_string(),
        })
    }

    #[test]
    fn test_snapshot_creation() {
        let snapshot = sample();
        assert_eq!(snapshot.item_id, "item123");
        assert_eq!(snapshot.price_cents, Some(4999));
        assert_eq!(snapshot.stock_state, StockState::InStock);
        assert_eq!(snapshot.id.len(), 32);
    }

    #[test]
    fn test_evidence_parses() {
        let snapshot = sample();
        let evidence = snapshot.evidence().unwrap();
        assert_eq!(evidence["title"], "Widget Pro");
    }
}
