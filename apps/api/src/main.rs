mod config;
mod errors;
mod evaluation;
mod extraction;
mod llm_client;
mod models;
mod routes;
mod state;
mod uploads;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::evaluation::judge::LlmJudge;
use crate::evaluation::orchestrator::BatchEvaluator;
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::state::AppState;
use crate::uploads::UploadStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting CV Analyzer v{}", env!("CARGO_PKG_VERSION"));

    // Initialize LLM judge
    let llm = LlmClient::new(&config.llm_api_url, &config.llm_model, config.llm_timeout)?;
    info!("LLM client initialized (model: {})", llm.model());
    if config.llm_api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; every evaluation request must supply apiKey");
    }

    let evaluator = BatchEvaluator::new(Arc::new(LlmJudge::new(llm)), config.evaluator_settings());
    info!(
        "Batch evaluator initialized (concurrency: {}, retries: {})",
        evaluator.settings().concurrency_limit,
        evaluator.settings().retry.max_retries
    );

    let uploads = UploadStore::new(&config.upload_dir);
    tokio::fs::create_dir_all(&config.upload_dir).await?;
    info!("Uploads stored under {}", config.upload_dir.display());

    let state = AppState {
        config: Arc::new(config.clone()),
        evaluator: Arc::new(evaluator),
        uploads,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
