pub mod check_runner;
pub mod config;
pub mod extract;
pub mod models;
pub mod notifier;
pub mod price_parser;
pub mod scheduler;
pub mod store;
pub mod sweep;
pub mod url_normalizer;
pub mod utils;
pub mod web;

// Re-export commonly used types
pub use check_runner::{CheckResult, CheckRunner};
pub use config::AppConfig;
pub use extract::pipeline::ExtractionPipeline;
pub use extract::{ExtractOptions, ExtractResult, ExtractionAttempt, Extractor};
pub use models::*;
pub use notifier::Notifier;
pub use price_parser::{ParsedPrice, PriceParser};
pub use scheduler::SweepScheduler;
pub use store::Store;
pub use sweep::{DailySweep, SweepSummary};
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
