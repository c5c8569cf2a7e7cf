use anyhow::Context;
use reddit_client::{RateLimitConfig, RateLimiter, RedditApiClient};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracker_core::TrackerConfig;
use tracker_service::{JsonFilePersister, TrackerService};

const CRATES: &[&str] = &["removal_tracker", "tracker_service", "reddit_client", "tracker_core"];

fn load_config() -> anyhow::Result<TrackerConfig> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("TRACKER_CONFIG").ok())
        .map(PathBuf::from);

    let mut config = match path {
        Some(path) => TrackerConfig::load(&path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => TrackerConfig::default(),
    };
    if let Ok(user_agent) = std::env::var("REDDIT_USER_AGENT") {
        config.user_agent = user_agent;
    }
    Ok(config)
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    let default_filter = CRATES
        .iter()
        .map(|name| format!("{}={}", name, level))
        .collect::<Vec<_>>()
        .join(",");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    init_logging(config.debug);

    tracing::info!("Starting removal tracker");

    let limiter = Arc::new(RateLimiter::new(RateLimitConfig::with_interval(
        config.rate_limit_interval(),
    )));
    let client = RedditApiClient::new(config.user_agent.clone())
        .context("building Reddit client")?
        .with_feed_limiter(limiter.clone())
        .with_feed_poll_interval(config.stream_poll_interval());
    let persister = JsonFilePersister::new(config.data_dir.clone());

    let mut service = TrackerService::new(config, Arc::new(client), Arc::new(persister), limiter);
    service.start()?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    tracing::info!("Shutdown requested");

    service.stop().await?;
    Ok(())
}
