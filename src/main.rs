use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use pricehawk::extract::ai::{AiExtractor, OpenAiClient};
use pricehawk::extract::rendered::{ChromeRenderer, RenderedFetcher};
use pricehawk::{
    AppConfig, CheckRunner, DailySweep, ExtractionPipeline, Notifier, Store, SweepScheduler,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pricehawk=info".parse()?),
        )
        .init();

    let config = AppConfig::from_env()?;
    info!("Starting pricehawk...");

    let store = Store::connect(&config.database_url).await?;

    let rendered: Option<Arc<dyn RenderedFetcher>> = if config.playwright_enabled() {
        Some(Arc::new(ChromeRenderer::new(config.user_agent.clone())))
    } else {
        None
    };

    let ai = config.openai_api_key.clone().map(|api_key| {
        AiExtractor::new(
            Arc::new(OpenAiClient::new(api_key)),
            config.ai_evidence_max_chars,
            config.ai_max_output_tokens,
            config.openai_input_cost_per_1m,
            config.openai_output_cost_per_1m,
        )
    });
    if ai.is_none() {
        info!("OPENAI_API_KEY not set, model fallback disabled");
    }

    let pipeline = Arc::new(ExtractionPipeline::new(&config, rendered, ai)?);
    let notifier = Arc::new(Notifier::new(
        store.clone(),
        config.discord_webhook_url.clone(),
    ));
    let runner = Arc::new(CheckRunner::new(
        store.clone(),
        pipeline,
        Arc::clone(&notifier),
        config.clone(),
    ));

    let sweep = Arc::new(DailySweep::new(store.clone(), Arc::clone(&runner)));
    let mut scheduler = SweepScheduler::new(Arc::clone(&sweep), &config.check_schedule_cron).await?;
    scheduler.start().await?;

    if config.run_on_boot() {
        let boot_sweep = Arc::clone(&sweep);
        tokio::spawn(async move {
            if let Err(e) = boot_sweep.run().await {
                tracing::error!(error = %e, "boot sweep failed");
            }
        });
    }

    let state = pricehawk::web::AppState {
        store,
        runner,
        notifier,
        config,
    };
    pricehawk::web::serve(state).await?;

    Ok(())
}
