use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

/// Runtime configuration, sourced from environment variables with sensible
/// defaults. Threshold values are clamped rather than rejected so a typo'd
/// override degrades to the nearest safe value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    // Server
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub user_agent: String,

    // Worker
    pub check_schedule_cron: String,
    pub worker_run_on_boot: String,
    pub scrape_timeout_ms: u64,
    pub enable_playwright: String,

    // Notifications
    pub discord_webhook_url: Option<String>,

    // AI fallback
    pub openai_api_key: Option<String>,
    pub openai_model_small: String,
    pub ai_daily_budget_usd: f64,
    pub ai_fallback_confidence_threshold: f64,
    pub out_of_stock_verify_confidence_threshold: f64,
    pub ai_evidence_max_chars: usize,
    pub ai_max_output_tokens: u32,
    pub openai_input_cost_per_1m: Option<f64>,
    pub openai_output_cost_per_1m: Option<f64>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", 3000)?
            .set_default("database_url", "sqlite://data/pricehawk.db")?
            .set_default("user_agent", "pricehawk/0.1")?
            .set_default("check_schedule_cron", "0 9 * * *")?
            .set_default("worker_run_on_boot", "false")?
            .set_default("scrape_timeout_ms", 20_000)?
            .set_default("enable_playwright", "true")?
            .set_default("openai_model_small", "gpt-5-mini")?
            .set_default("ai_daily_budget_usd", 1.0)?
            .set_default("ai_fallback_confidence_threshold", 0.88)?
            .set_default("out_of_stock_verify_confidence_threshold", 0.78)?
            .set_default("ai_evidence_max_chars", 6000)?
            .set_default("ai_max_output_tokens", 180)?
            .add_source(Environment::default())
            .build()?;

        let config: AppConfig = s.try_deserialize()?;
        let config = config.clamped();
        config.validate()?;
        Ok(config)
    }

    /// Clamp tunables into their supported ranges.
    pub fn clamped(mut self) -> Self {
        self.ai_fallback_confidence_threshold =
            self.ai_fallback_confidence_threshold.clamp(0.70, 0.98);
        self.out_of_stock_verify_confidence_threshold = self
            .out_of_stock_verify_confidence_threshold
            .clamp(0.60, 0.95);
        self.ai_evidence_max_chars = self.ai_evidence_max_chars.clamp(2500, 12_000);
        self.ai_max_output_tokens = self.ai_max_output_tokens.clamp(80, 300);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Message(
                "Server port must be greater than 0".into(),
            ));
        }

        if !is_valid_cron(&self.check_schedule_cron) {
            return Err(ConfigError::Message(
                "Invalid cron expression in CHECK_SCHEDULE_CRON".into(),
            ));
        }

        if self.scrape_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "SCRAPE_TIMEOUT_MS must be greater than 0".into(),
            ));
        }

        if self.ai_daily_budget_usd < 0.0 {
            return Err(ConfigError::Message(
                "AI_DAILY_BUDGET_USD cannot be negative".into(),
            ));
        }

        Ok(())
    }

    /// Rendered fetching is on unless explicitly disabled with the literal
    /// string "false".
    pub fn playwright_enabled(&self) -> bool {
        self.enable_playwright != "false"
    }

    pub fn run_on_boot(&self) -> bool {
        matches!(self.worker_run_on_boot.as_str(), "true" | "1")
    }
}

/// Basic 5-field cron validation (minute hour day month weekday).
pub fn is_valid_cron(cron_expr: &str) -> bool {
    let parts: Vec<&str> = cron_expr.split_whitespace().collect();
    if parts.len() != 5 {
        return false;
    }

    for part in parts {
        if part.is_empty() {
            return false;
        }
        // Allow numbers, ranges, lists, and wildcards
        if !part
            .chars()
            .all(|c| c.is_ascii_digit() || c == '*' || c == '-' || c == ',' || c == '/')
        {
            return false;
        }
    }

    true
}
