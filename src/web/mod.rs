use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing::Level;

use crate::check_runner::CheckRunner;
use crate::config::AppConfig;
use crate::notifier::Notifier;
use crate::store::Store;

pub mod handlers;
pub mod responses;

pub use handlers::{
    check_item, create_item, delete_item, discord_test, get_item, health, list_items,
};
pub use responses::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub runner: Arc<CheckRunner>,
    pub notifier: Arc<Notifier>,
    pub config: AppConfig,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/items", post(create_item).get(list_items))
        .route("/items/:id", get(get_item).delete(delete_item))
        .route("/items/:id/check", post(check_item))
        .route("/discord/test", post(discord_test))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(
                            tower_http::trace::DefaultOnResponse::new().level(Level::INFO),
                        ),
                )
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "server starting");
    axum::serve(listener, app).await?;

    Ok(())
}
