use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::extract::name::normalize_product_name;
use crate::extract::stock::dedupe_variants;
use crate::extract::{Candidate, ExtractResult, VariantStock};
use crate::models::{ExtractionMethod, StockState, VariantAvailability};
use crate::utils::error::{AppError, Result};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const MAX_RETRIES: u32 = 3;

const SYSTEM_PROMPT: &str = "You extract product facts from page evidence. \
Respond with a single JSON object: {\"productName\": string, \"price\": number|null, \
\"inStock\": boolean|null, \"stockState\": \"IN_STOCK\"|\"OUT_OF_STOCK\"|\"PARTIAL\"|\"UNKNOWN\", \
\"variantStock\": [{\"label\": string, \"stock\": \"IN\"|\"OUT\"|\"UNKNOWN\"}]}. \
Price is in whole currency units. Use null when the evidence is insufficient.";

/// One completed model call.
#[derive(Debug, Clone)]
pub struct AiCompletion {
    pub content: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

/// Seam over the model provider so tests can inject canned completions.
#[async_trait]
pub trait AiModelClient: Send + Sync {
    async fn complete_json(
        &self,
        system: &str,
        user: &str,
        model: &str,
        max_tokens: u32,
    ) -> Result<AiCompletion>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: ChatUsage,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: i64,
    completion_tokens: i64,
}

/// Production client for the OpenAI chat-completions API. Retries 429 and
/// 5xx with exponential backoff.
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .unwrap_or_default(),
            api_key,
        }
    }
}

#[async_trait]
impl AiModelClient for OpenAiClient {
    async fn complete_json(
        &self,
        system: &str,
        user: &str,
        model: &str,
        max_tokens: u32,
    ) -> Result<AiCompletion> {
        let request_body = ChatRequest {
            model,
            temperature: 0.0,
            max_tokens,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
        };

        let mut last_error: Option<AppError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = std::time::Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "model call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .client
                .post(OPENAI_API_URL)
                .bearer_auth(&self.api_key)
                .json(&request_body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(AppError::Http(e));
                    continue;
                }
            };

            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                last_error = Some(AppError::Ai(format!("API {status}: {body}")));
                continue;
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(AppError::Ai(format!("API {status}: {body}")));
            }

            let parsed: ChatResponse = response.json().await?;
            let content = parsed
                .choices
                .first()
                .and_then(|c| c.message.content.clone())
                .ok_or_else(|| AppError::Ai("model returned empty content".to_string()))?;

            debug!(
                input_tokens = parsed.usage.prompt_tokens,
                output_tokens = parsed.usage.completion_tokens,
                "model call succeeded"
            );

            return Ok(AiCompletion {
                content,
                input_tokens: parsed.usage.prompt_tokens,
                output_tokens: parsed.usage.completion_tokens,
            });
        }

        Err(last_error.unwrap_or_else(|| AppError::Ai("model call retries exhausted".to_string())))
    }
}

/// What the model is asked to produce.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AiPayload {
    product_name: String,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    in_stock: Option<bool>,
    #[serde(default)]
    stock_state: Option<StockState>,
    #[serde(default)]
    variant_stock: Vec<AiVariant>,
}

#[derive(Debug, Deserialize)]
struct AiVariant {
    label: String,
    stock: VariantAvailability,
}

#[derive(Debug)]
pub struct AiOutcome {
    pub result: ExtractResult,
    pub token_input: i64,
    pub token_output: i64,
    pub estimated_cost_usd: f64,
}

/// Last-resort extractor: compresses the static evidence into a small
/// prompt, asks the model for the product tuple, and prices the call.
pub struct AiExtractor {
    client: Arc<dyn AiModelClient>,
    evidence_max_chars: usize,
    max_output_tokens: u32,
    input_rate_override: Option<f64>,
    output_rate_override: Option<f64>,
}

impl AiExtractor {
    pub fn new(
        client: Arc<dyn AiModelClient>,
        evidence_max_chars: usize,
        max_output_tokens: u32,
        input_rate_override: Option<f64>,
        output_rate_override: Option<f64>,
    ) -> Self {
        Self {
            client,
            evidence_max_chars,
            max_output_tokens,
            input_rate_override,
            output_rate_override,
        }
    }

    pub async fn extract(
        &self,
        url: &str,
        prior: &ExtractResult,
        hints: &[String],
        model: &str,
    ) -> Result<AiOutcome> {
        let evidence_text = self.assemble_evidence(url, prior, hints);
        let completion = self
            .client
            .complete_json(SYSTEM_PROMPT, &evidence_text, model, self.max_output_tokens)
            .await?;

        let payload: AiPayload = serde_json::from_str(completion.content.trim())
            .map_err(|e| AppError::Ai(format!("schema mismatch: {e}")))?;

        let result = reconcile(payload, prior);
        let cost = self.estimate_cost(model, completion.input_tokens, completion.output_tokens);

        Ok(AiOutcome {
            result,
            token_input: completion.input_tokens,
            token_output: completion.output_tokens,
            estimated_cost_usd: cost,
        })
    }

    /// Compact evidence: one fact per line, bounded counts per section,
    /// whole thing clipped to the configured budget.
    pub fn assemble_evidence(&self, url: &str, prior: &ExtractResult, hints: &[String]) -> String {
        let mut lines = Vec::new();
        lines.push(format!("url={url}"));
        if let Some(title) = &prior.evidence.title {
            lines.push(format!("title={title}"));
        }
        if let Some(meta) = &prior.evidence.meta_description {
            lines.push(format!("meta={meta}"));
        }
        lines.push(format!("stockState={:?}", prior.stock_state));

        for hint in hints.iter().take(4) {
            lines.push(format!("hint={hint}"));
        }

        for variant in prior.variant_stock.iter().take(6) {
            let stock = match variant.stock {
                VariantAvailability::In => "IN",
                VariantAvailability::Out => "OUT",
                VariantAvailability::Unknown => "UNK",
            };
            lines.push(format!("variant={}|{}", variant.label, stock));
        }

        for candidate in prior.evidence.candidates.iter().take(12) {
            lines.push(format!(
                "candidate={}|price={}|name={}|{}",
                candidate.source,
                candidate
                    .price_cents
                    .map(|c| format!("{}.{:02}", c / 100, c % 100))
                    .unwrap_or_else(|| "?".to_string()),
                candidate.name.as_deref().unwrap_or("?"),
                candidate.evidence
            ));
        }

        let mut text = lines.join("\n");
        if text.chars().count() > self.evidence_max_chars {
            text = text.chars().take(self.evidence_max_chars).collect();
        }
        text
    }

    fn estimate_cost(&self, model: &str, input_tokens: i64, output_tokens: i64) -> f64 {
        let (default_in, default_out) = model_rates(model);
        let input_rate = self.input_rate_override.unwrap_or(default_in);
        let output_rate = self.output_rate_override.unwrap_or(default_out);

        (input_tokens as f64 / 1e6) * input_rate + (output_tokens as f64 / 1e6) * output_rate
    }
}

/// USD per 1M tokens (input, output).
fn model_rates(model: &str) -> (f64, f64) {
    match model {
        "gpt-5-mini" => (0.25, 2.0),
        "gpt-5-nano" => (0.05, 0.4),
        "gpt-5" => (1.25, 10.0),
        "gpt-4.1-mini" => (0.4, 1.6),
        "gpt-4.1-nano" => (0.1, 0.4),
        "gpt-4o-mini" => (0.15, 0.6),
        _ => (0.25, 2.0),
    }
}

/// Merge the model's answer back into a result: name normalized, stock
/// state reconciled against variants and the boolean flag, confidence
/// pinned at the AI tier.
fn reconcile(payload: AiPayload, prior: &ExtractResult) -> ExtractResult {
    let variants = dedupe_variants(
        payload
            .variant_stock
            .into_iter()
            .map(|v| VariantStock {
                label: v.label,
                stock: v.stock,
            })
            .collect(),
    );

    let mut stock_state = payload.stock_state.unwrap_or(StockState::Unknown);
    if stock_state == StockState::Unknown {
        let known_in = variants
            .iter()
            .any(|v| v.stock == VariantAvailability::In);
        let known_out = variants
            .iter()
            .any(|v| v.stock == VariantAvailability::Out);
        stock_state = if known_in && known_out {
            StockState::Partial
        } else if known_in {
            StockState::InStock
        } else if known_out {
            StockState::OutOfStock
        } else {
            match payload.in_stock {
                Some(true) => StockState::InStock,
                Some(false) => StockState::OutOfStock,
                None => StockState::Unknown,
            }
        };
    }

    let price_cents = payload
        .price
        .map(|p| (p * 100.0).round() as i64)
        .filter(|cents| *cents > 0);

    let product_name = {
        let normalized = normalize_product_name(&payload.product_name);
        if normalized.is_empty() {
            prior.product_name.clone()
        } else {
            Some(normalized)
        }
    };

    let mut evidence = prior.evidence.clone();
    evidence.candidates.push(Candidate {
        source: "ai".to_string(),
        name: product_name.clone(),
        price_cents,
        score: 0.87,
        evidence: "model completion".to_string(),
    });

    ExtractResult {
        product_name,
        price_cents,
        in_stock: stock_state.in_stock(),
        stock_state,
        variant_stock: variants,
        confidence: 0.87,
        method: ExtractionMethod::Ai,
        evidence,
        content_hash: prior.content_hash.clone(),
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// Canned model client for pipeline and extractor tests.
    pub struct FakeAiClient {
        pub content: String,
        pub input_tokens: i64,
        pub output_tokens: i64,
    }

    #[async_trait]
    impl AiModelClient for FakeAiClient {
        async fn complete_json(
            &self,
            _system: &str,
            _user: &str,
            _model: &str,
            _max_tokens: u32,
        ) -> Result<AiCompletion> {
            Ok(AiCompletion {
                content: self.content.clone(),
                input_tokens: self.input_tokens,
                output_tokens: self.output_tokens,
            })
        }
    }
}
