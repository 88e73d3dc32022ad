use std::sync::Arc;

use anyhow::Result;
use honeypot_orchestrator::callback::CallbackDispatcher;
use honeypot_orchestrator::config::Config;
use honeypot_orchestrator::council::Council;
use honeypot_orchestrator::extractor::Extractor;
use honeypot_orchestrator::http::{self, AppState};
use honeypot_orchestrator::judge::Judge;
use honeypot_orchestrator::key_rotator::KeyRotator;
use honeypot_orchestrator::orchestrator::Orchestrator;
use honeypot_orchestrator::reply_generator::{ReplyGenerator, TemplateReplyGenerator};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        worker_pool_size = config.worker_pool_size,
        voters = config.voters.len(),
        "starting honeypot orchestrator"
    );

    let key_rotator = Arc::new(KeyRotator::new(
        config.groq_api_keys.clone(),
        config.nvidia_api_keys.clone(),
    ));
    let council = Council::new(&config, key_rotator)?;
    let extractor = Extractor::new(&config);
    let judge = Judge::new(&config);
    let callback = CallbackDispatcher::new(&config);
    let reply_generator: Arc<dyn ReplyGenerator> = Arc::new(TemplateReplyGenerator::new());

    let host = config.host.clone();
    let port = config.port;
    let api_secret_key = config.api_secret_key.clone();
    let max_message_bytes = config.max_message_bytes;

    let orchestrator = Orchestrator::new(config, council, extractor, judge, callback, reply_generator);
    let state = Arc::new(AppState { orchestrator, api_secret_key, max_message_bytes });

    let router = http::build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, router).await?;
    Ok(())
}
