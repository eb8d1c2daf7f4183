use async_trait::async_trait;
use std::sync::{Arc, Mutex};

pub use pricehawk::extract::{
    content_hash, Evidence, ExtractOptions, ExtractResult, ExtractionAttempt, Extractor,
};
pub use pricehawk::models::{ExtractionMethod, StockState};
pub use pricehawk::web::AppState;
pub use pricehawk::{AppConfig, CheckRunner, Notifier, Store};

pub mod api_tests;
pub mod check_flow_tests;
pub mod store_tests;

/// Scripted extractor: pops queued attempts first, then falls back to a
/// repeating default. No network is touched anywhere in these tests.
pub struct ScriptedExtractor {
    queue: Mutex<Vec<ExtractionAttempt>>,
    fallback: ExtractionAttempt,
}

impl ScriptedExtractor {
    pub fn new(fallback: ExtractionAttempt) -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
            fallback,
        }
    }

    pub fn push(&self, attempt: ExtractionAttempt) {
        self.queue.lock().unwrap().push(attempt);
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(
        &self,
        _url: &str,
        _opts: &ExtractOptions,
    ) -> pricehawk::Result<ExtractionAttempt> {
        let mut queue = self.queue.lock().unwrap();
        if queue.is_empty() {
            Ok(self.fallback.clone())
        } else {
            Ok(queue.remove(0))
        }
    }
}

pub fn success_attempt(price_cents: Option<i64>, in_stock: Option<bool>) -> ExtractionAttempt {
    let stock_state = match in_stock {
        Some(true) => StockState::InStock,
        Some(false) => StockState::OutOfStock,
        None => StockState::Unknown,
    };
    ExtractionAttempt::success(ExtractResult {
        product_name: Some("Widget Pro".to_string()),
        price_cents,
        in_stock,
        stock_state,
        variant_stock: Vec::new(),
        confidence: 0.95,
        method: ExtractionMethod::Static,
        evidence: Evidence::default(),
        content_hash: content_hash("<html><body>Widget Pro</body></html>"),
    })
}

pub fn always_in_stock(price_cents: i64) -> ExtractionAttempt {
    success_attempt(Some(price_cents), Some(true))
}

pub fn test_config() -> AppConfig {
    AppConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        database_url: "sqlite::memory:".to_string(),
        user_agent: "pricehawk/test".to_string(),
        check_schedule_cron: "0 9 * * *".to_string(),
        worker_run_on_boot: "false".to_string(),
        scrape_timeout_ms: 5000,
        enable_playwright: "false".to_string(),
        discord_webhook_url: None,
        openai_api_key: None,
        openai_model_small: "gpt-5-mini".to_string(),
        ai_daily_budget_usd: 1.0,
        ai_fallback_confidence_threshold: 0.88,
        out_of_stock_verify_confidence_threshold: 0.78,
        ai_evidence_max_chars: 6000,
        ai_max_output_tokens: 180,
        openai_input_cost_per_1m: None,
        openai_output_cost_per_1m: None,
    }
}

pub struct TestHarness {
    pub state: AppState,
    pub store: Store,
    pub extractor: Arc<ScriptedExtractor>,
}

pub async fn create_test_state(fallback: ExtractionAttempt) -> anyhow::Result<TestHarness> {
    let config = test_config();
    let store = Store::connect(&config.database_url).await?;
    let extractor = Arc::new(ScriptedExtractor::new(fallback));
    let notifier = Arc::new(Notifier::new(store.clone(), None));
    let runner = Arc::new(CheckRunner::new(
        store.clone(),
        extractor.clone(),
        Arc::clone(&notifier),
        config.clone(),
    ));

    Ok(TestHarness {
        state: AppState {
            store: store.clone(),
            runner,
            notifier,
            config,
        },
        store,
        extractor,
    })
}
