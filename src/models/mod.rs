use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod check_run;
pub mod item;
pub mod notification;
pub mod snapshot;

// Re-exports for convenience
pub use check_run::*;
pub use item::*;
pub use notification::*;
pub use snapshot::*;

// Common enums used across models

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
pub enum StockState {
    #[serde(rename = "IN_STOCK")]
    #[sqlx(rename = "IN_STOCK")]
    InStock,
    #[serde(rename = "OUT_OF_STOCK")]
    #[sqlx(rename = "OUT_OF_STOCK")]
    OutOfStock,
    #[serde(rename = "PARTIAL")]
    #[sqlx(rename = "PARTIAL")]
    Partial,
    #[serde(rename = "UNKNOWN")]
    #[sqlx(rename = "UNKNOWN")]
    Unknown,
}

impl StockState {
    /// Trinary projection used by the snapshot row and change detection.
    pub fn in_stock(self) -> Option<bool> {
        match self {
            StockState::InStock | StockState::Partial => Some(true),
            StockState::OutOfStock => Some(false),
            StockState::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
pub enum ExtractionMethod {
    #[serde(rename = "shopify_json")]
    #[sqlx(rename = "shopify_json")]
    ShopifyJson,
    #[serde(rename = "bestbuy_api")]
    #[sqlx(rename = "bestbuy_api")]
    BestbuyApi,
    #[serde(rename = "static")]
    #[sqlx(rename = "static")]
    Static,
    #[serde(rename = "playwright")]
    #[sqlx(rename = "playwright")]
    Playwright,
    #[serde(rename = "ai")]
    #[sqlx(rename = "ai")]
    Ai,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
pub enum CheckStatus {
    #[serde(rename = "SUCCESS")]
    #[sqlx(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED")]
    #[sqlx(rename = "FAILED")]
    Failed,
    #[serde(rename = "NEEDS_REVIEW")]
    #[sqlx(rename = "NEEDS_REVIEW")]
    NeedsReview,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
pub enum EventType {
    #[serde(rename = "PRICE_CHANGED")]
    #[sqlx(rename = "PRICE_CHANGED")]
    PriceChanged,
    #[serde(rename = "BACK_IN_STOCK")]
    #[sqlx(rename = "BACK_IN_STOCK")]
    BackInStock,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::PriceChanged => "PRICE_CHANGED",
            EventType::BackInStock => "BACK_IN_STOCK",
        }
    }
}

/// Per-variant availability; coarser than [`StockState`] because a single
/// variant is never "partial".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum VariantAvailability {
    #[serde(rename = "IN")]
    In,
    #[serde(rename = "OUT")]
    Out,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

// Helper function to generate IDs in the format expected by the database
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stock_state_serialization() {
        assert_eq!(
            serde_json::to_string(&StockState::InStock).unwrap(),
            "\"IN_STOCK\""
        );
        assert_eq!(
            serde_json::to_string(&StockState::OutOfStock).unwrap(),
            "\"OUT_OF_STOCK\""
        );
        assert_eq!(
            serde_json::from_str::<StockState>("\"PARTIAL\"").unwrap(),
            StockState::Partial
        );
    }

    #[test]
    fn test_stock_state_projection() {
        assert_eq!(StockState::InStock.in_stock(), Some(true));
        assert_eq!(StockState::Partial.in_stock(), Some(true));
        assert_eq!(StockState::OutOfStock.in_stock(), Some(false));
        assert_eq!(StockState::Unknown.in_stock(), None);
    }

    #[test]
    fn test_extraction_method_serialization() {
        assert_eq!(
            serde_json::to_string(&ExtractionMethod::ShopifyJson).unwrap(),
            "\"shopify_json\""
        );
        assert_eq!(
            serde_json::to_string(&ExtractionMethod::Static).unwrap(),
            "\"static\""
        );
        assert_eq!(
            serde_json::from_str::<ExtractionMethod>("\"playwright\"").unwrap(),
            ExtractionMethod::Playwright
        );
    }

    #[test]
    fn test_check_status_values() {
        let values = vec![
            CheckStatus::Success,
            CheckStatus::Failed,
            CheckStatus::NeedsReview,
        ];
        for value in values {
            let serialized = serde_json::to_string(&value).unwrap();
            let deserialized: CheckStatus = serde_json::from_str(&serialized).unwrap();
            assert_eq!(value, deserialized);
        }
    }

    #[test]
    fn test_event_type_as_str() {
        assert_eq!(EventType::PriceChanged.as_str(), "PRICE_CHANGED");
        assert_eq!(EventType::BackInStock.as_str(), "BACK_IN_STOCK");
    }

    #[test]
    fn test_generate_id() {
        let id1 = generate_id();
        let id2 = generate_id();

        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 32);
        assert!(id1.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
