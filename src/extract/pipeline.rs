use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::AppConfig;
use crate::extract::ai::AiExtractor;
use crate::extract::bestbuy::BestBuyAdapter;
use crate::extract::html::HtmlExtractor;
use crate::extract::rendered::RenderedFetcher;
use crate::extract::shopify::ShopifyAdapter;
use crate::extract::{reason, ExtractOptions, ExtractResult, ExtractionAttempt};
use crate::models::{ExtractionMethod, StockState};
use crate::utils::error::{AppError, Result};

/// Regional storefront subdomains; a 3xx hop between two of these on the
/// same root is a geo-hijack, not a page move.
const REGIONAL_SUBDOMAINS: [&str; 12] = [
    "us", "ca", "uk", "eu", "au", "de", "fr", "it", "es", "jp", "sg", "hk",
];

/// The layered extractor: site adapters, then static HTML, then an opt-in
/// rendered pass, then the budget-gated model fallback. Each stage only
/// runs while confidence stays below the configured bar.
pub struct ExtractionPipeline {
    http: reqwest::Client,
    html: HtmlExtractor,
    shopify: ShopifyAdapter,
    bestbuy: BestBuyAdapter,
    rendered: Option<Arc<dyn RenderedFetcher>>,
    ai: Option<AiExtractor>,
    ai_confidence_threshold: f64,
    oos_verify_threshold: f64,
}

impl ExtractionPipeline {
    pub fn new(
        config: &AppConfig,
        rendered: Option<Arc<dyn RenderedFetcher>>,
        ai: Option<AiExtractor>,
    ) -> Result<Self> {
        // Redirects are never followed automatically: a 3xx is a signal the
        // check runner must see, not something to silently chase
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            shopify: ShopifyAdapter::new(http.clone()),
            bestbuy: BestBuyAdapter::new(http.clone()),
            http,
            html: HtmlExtractor::new(),
            rendered,
            ai,
            ai_confidence_threshold: config.ai_fallback_confidence_threshold,
            oos_verify_threshold: config.out_of_stock_verify_confidence_threshold,
        })
    }

    pub async fn extract(&self, url: &str, opts: &ExtractOptions) -> Result<ExtractionAttempt> {
        if let Some(result) = self.bestbuy.try_extract(url, opts.timeout_ms).await {
            return Ok(ExtractionAttempt::success(result));
        }
        if let Some(result) = self.shopify.try_extract(url, opts.timeout_ms).await {
            return Ok(ExtractionAttempt::success(result));
        }

        let html_body = match self.fetch_static(url, opts.timeout_ms).await? {
            FetchOutcome::Body(body) => body,
            FetchOutcome::Blocked(review_reason) => {
                return Ok(ExtractionAttempt::needs_review(review_reason));
            }
        };

        let mut result = self.html.extract(&html_body, url);
        let mut attempt_flags = AttemptFlags::default();

        if result.confidence < self.ai_confidence_threshold
            && opts.allow_playwright
            && self.rendered.is_some()
            && (result.in_stock != Some(false) || result.confidence < self.oos_verify_threshold)
        {
            attempt_flags.used_playwright = true;
            result = self.rendered_pass(url, opts.timeout_ms, result).await;
        }

        if result.confidence < self.ai_confidence_threshold && self.ai_gate(&result) {
            let extractor = match self.ai.as_ref().filter(|_| opts.allow_ai) {
                Some(extractor) => extractor,
                None => {
                    let mut attempt =
                        ExtractionAttempt::needs_review(reason::AI_BUDGET_EXCEEDED_OR_DISABLED);
                    attempt_flags.apply(&mut attempt);
                    return Ok(attempt);
                }
            };

            attempt_flags.used_ai = true;
            match extractor
                .extract(url, &result, &opts.ai_hints, &opts.model)
                .await
            {
                Ok(outcome) => {
                    attempt_flags.token_input = Some(outcome.token_input);
                    attempt_flags.token_output = Some(outcome.token_output);
                    attempt_flags.estimated_cost_usd = Some(outcome.estimated_cost_usd);
                    result = outcome.result;
                }
                Err(e) => {
                    // The static result is still the best we have
                    warn!(url, error = %e, "model fallback failed");
                }
            }
        }

        let fails_gate = result.product_name.is_none()
            || result.confidence < 0.70
            || (result.in_stock != Some(false) && result.price_cents.is_none());

        let mut attempt = if fails_gate {
            ExtractionAttempt::needs_review(reason::LOW_CONFIDENCE_EXTRACTION)
        } else {
            ExtractionAttempt::success(result)
        };
        attempt_flags.apply(&mut attempt);
        Ok(attempt)
    }

    async fn fetch_static(&self, url: &str, timeout_ms: u64) -> Result<FetchOutcome> {
        let response = self
            .http
            .get(url)
            .timeout(Duration::from_millis(timeout_ms))
            .send()
            .await?;

        let status = response.status();
        if status.is_redirection() {
            let review_reason = match redirect_target(&response, url) {
                Some(target) if is_regional_sibling_swap(url, &target) => {
                    reason::REGIONAL_REDIRECT_MISMATCH
                }
                _ => reason::URL_REDIRECT_BLOCKED,
            };
            debug!(url, status = %status, review_reason, "redirect refused");
            return Ok(FetchOutcome::Blocked(review_reason));
        }

        if !status.is_success() {
            return Err(AppError::Extraction(format!(
                "static fetch returned {status} for {url}"
            )));
        }

        Ok(FetchOutcome::Body(response.text().await?))
    }

    async fn rendered_pass(
        &self,
        url: &str,
        timeout_ms: u64,
        static_result: ExtractResult,
    ) -> ExtractResult {
        let Some(fetcher) = &self.rendered else {
            return static_result;
        };

        let page = match fetcher.fetch(url, timeout_ms).await {
            Ok(Some(page)) => page,
            Ok(None) => return static_result,
            Err(e) => {
                debug!(url, error = %e, "rendered fetch failed");
                return static_result;
            }
        };

        // A browser that landed somewhere else is not looking at our product
        if !same_url_ignoring_fragment(url, &page.final_url) {
            debug!(url, final_url = %page.final_url, "rendered fetch redirected, discarding");
            return static_result;
        }

        let mut rendered = self.html.extract(&page.html, url);
        if rendered.confidence > static_result.confidence {
            rendered.method = ExtractionMethod::Playwright;
            rendered
        } else {
            static_result
        }
    }

    /// Decide whether an out-of-stock-looking result still deserves model
    /// spend. Confident embedded out-of-stock evidence is the one shape we
    /// trust enough to skip the call.
    fn ai_gate(&self, result: &ExtractResult) -> bool {
        if result.in_stock != Some(false) {
            return true;
        }
        let signals = &result.evidence.stock_signals;
        if result.stock_state == StockState::OutOfStock
            && signals.embedded_out > 0
            && signals.embedded_in == 0
        {
            return false;
        }
        if result.stock_state == StockState::Partial || !result.variant_stock.is_empty() {
            return true;
        }
        result.confidence < self.oos_verify_threshold
    }
}

#[async_trait::async_trait]
impl crate::extract::Extractor for ExtractionPipeline {
    async fn extract(&self, url: &str, opts: &ExtractOptions) -> Result<ExtractionAttempt> {
        ExtractionPipeline::extract(self, url, opts).await
    }
}

enum FetchOutcome {
    Body(String),
    Blocked(&'static str),
}

/// Usage flags accumulated across pipeline stages and stamped onto
/// whichever attempt is returned.
#[derive(Default)]
struct AttemptFlags {
    used_playwright: bool,
    used_ai: bool,
    token_input: Option<i64>,
    token_output: Option<i64>,
    estimated_cost_usd: Option<f64>,
}

impl AttemptFlags {
    fn apply(&self, attempt: &mut ExtractionAttempt) {
        attempt.used_playwright = self.used_playwright;
        attempt.used_ai = self.used_ai;
        attempt.token_input = self.token_input;
        attempt.token_output = self.token_output;
        attempt.estimated_cost_usd = self.estimated_cost_usd;
    }
}

fn redirect_target(response: &reqwest::Response, request_url: &str) -> Option<String> {
    let location = response.headers().get(reqwest::header::LOCATION)?;
    let location = location.to_str().ok()?;
    let base = Url::parse(request_url).ok()?;
    base.join(location).ok().map(|u| u.to_string())
}

/// True when the two hosts differ only by a regional subdomain swap:
/// `us.store.com` -> `ca.store.com`.
pub fn is_regional_sibling_swap(request_url: &str, final_url: &str) -> bool {
    let Some((request_prefix, request_root)) = host_parts(request_url) else {
        return false;
    };
    let Some((final_prefix, final_root)) = host_parts(final_url) else {
        return false;
    };

    request_prefix != final_prefix
        && request_root == final_root
        && REGIONAL_SUBDOMAINS.contains(&request_prefix.as_str())
        && REGIONAL_SUBDOMAINS.contains(&final_prefix.as_str())
}

fn host_parts(raw: &str) -> Option<(String, String)> {
    let url = Url::parse(raw).ok()?;
    let host = url.host_str()?.to_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 3 {
        return None;
    }
    let root = labels[labels.len() - 2..].join(".");
    Some((labels[0].to_string(), root))
}

fn same_url_ignoring_fragment(a: &str, b: &str) -> bool {
    let strip = |raw: &str| -> Option<String> {
        let mut url = Url::parse(raw).ok()?;
        url.set_fragment(None);
        Some(url.to_string())
    };
    match (strip(a), strip(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
