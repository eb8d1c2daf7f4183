use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::{ExtractionMethod, StockState, VariantAvailability};
use crate::utils::error::Result;

pub mod ai;
pub mod bestbuy;
pub mod html;
pub mod name;
pub mod pipeline;
pub mod rendered;
pub mod shopify;
pub mod stock;

/// Diagnostic reason codes carried on a `needs_review` attempt. These are
/// propagated, never raised.
pub mod reason {
    pub const URL_REDIRECT_BLOCKED: &str = "URL_REDIRECT_BLOCKED";
    pub const REGIONAL_REDIRECT_MISMATCH: &str = "REGIONAL_REDIRECT_MISMATCH";
    pub const AI_BUDGET_EXCEEDED_OR_DISABLED: &str = "AI_BUDGET_EXCEEDED_OR_DISABLED";
    pub const LOW_CONFIDENCE_EXTRACTION: &str = "LOW_CONFIDENCE_EXTRACTION";
    pub const UNKNOWN_EXTRACTION_ERROR: &str = "UNKNOWN_EXTRACTION_ERROR";
}

/// Availability of a single purchasable variant (size, colour, model).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VariantStock {
    pub label: String,
    pub stock: VariantAvailability,
}

/// One scored `(name, price)` proposal from a candidate source. The final
/// result is a pure fold over these records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub source: String,
    pub name: Option<String>,
    pub price_cents: Option<i64>,
    pub score: f64,
    pub evidence: String,
}

impl Candidate {
    /// Base score plus completeness bonuses, capped below certainty.
    pub fn adjusted_score(&self) -> f64 {
        let mut score = self.score;
        if self.name.is_some() {
            score += 0.05;
        }
        if self.price_cents.is_some() {
            score += 0.05;
        }
        score.min(0.99)
    }
}

/// Raw counters behind a stock verdict; persisted as evidence and consulted
/// by the pipeline's AI-fallback gate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StockSignals {
    pub in_score: f64,
    pub out_score: f64,
    pub explicit_in: bool,
    pub explicit_out: bool,
    pub embedded_in: u32,
    pub embedded_out: u32,
    pub enabled_cta: u32,
    pub disabled_cta: u32,
}

/// Compact, auditable trace of the inputs that produced a snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Evidence {
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub candidates: Vec<Candidate>,
    pub stock_signals: StockSignals,
    pub variant_stock: Vec<VariantStock>,
    pub final_url: Option<String>,
}

/// A trusted extraction: the tuple every strategy in the cascade resolves
/// to, plus the evidence that justifies it.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractResult {
    pub product_name: Option<String>,
    pub price_cents: Option<i64>,
    pub in_stock: Option<bool>,
    pub stock_state: StockState,
    pub variant_stock: Vec<VariantStock>,
    pub confidence: f64,
    pub method: ExtractionMethod,
    pub evidence: Evidence,
    pub content_hash: String,
}

pub fn content_hash(html: &str) -> String {
    format!("{:x}", Sha256::digest(html.as_bytes()))
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub timeout_ms: u64,
    pub allow_playwright: bool,
    pub allow_ai: bool,
    pub model: String,
    pub ai_hints: Vec<String>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 20_000,
            allow_playwright: false,
            allow_ai: false,
            model: "gpt-5-mini".to_string(),
            ai_hints: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AttemptStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "needs_review")]
    NeedsReview,
}

/// Outcome of one pipeline invocation, including the usage counters the
/// check-run row records.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionAttempt {
    pub status: AttemptStatus,
    pub result: Option<ExtractResult>,
    pub reason: Option<String>,
    pub used_playwright: bool,
    pub used_ai: bool,
    pub token_input: Option<i64>,
    pub token_output: Option<i64>,
    pub estimated_cost_usd: Option<f64>,
}

/// Seam between the check runner and the extraction cascade; production
/// code wires in [`pipeline::ExtractionPipeline`], tests inject fakes.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, url: &str, opts: &ExtractOptions) -> Result<ExtractionAttempt>;
}

impl ExtractionAttempt {
    pub fn success(result: ExtractResult) -> Self {
        Self {
            status: AttemptStatus::Success,
            result: Some(result),
            reason: None,
            used_playwright: false,
            used_ai: false,
            token_input: None,
            token_output: None,
            estimated_cost_usd: None,
        }
    }

    pub fn needs_review(reason: &str) -> Self {
        Self {
            status: AttemptStatus::NeedsReview,
            result: None,
            reason: Some(reason.to_string()),
            used_playwright: false,
            used_ai: false,
            token_input: None,
            token_output: None,
            estimated_cost_usd: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_stable() {
        let html = "<html><body>$19.99</body></html>";
        assert_eq!(content_hash(html), content_hash(html));
        assert_ne!(content_hash(html), content_hash("<html></html>"));
        // sha-256 hex digest
        assert_eq!(content_hash(html).len(), 64);
    }

    #[test]
    fn test_candidate_bonuses() {
        let bare = Candidate {
            source: "dom".to_string(),
            name: None,
            price_cents: None,
            score: 0.72,
            evidence: String::new(),
        };
        assert!((bare.adjusted_score() - 0.72).abs() < 1e-9);

        let full = Candidate {
            name: Some("Widget".to_string()),
            price_cents: Some(4999),
            ..bare.clone()
        };
        assert!((full.adjusted_score() - 0.82).abs() < 1e-9);
    }

    #[test]
    fn test_candidate_score_cap() {
        let candidate = Candidate {
            source: "json_ld".to_string(),
            name: Some("Widget".to_string()),
            price_cents: Some(4999),
            score: 0.95,
            evidence: String::new(),
        };
        assert_eq!(candidate.adjusted_score(), 0.99);
    }
}
