use anyhow::{Error, Result};
use blog_notifier::{app::App, config::Config};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load()?;
    info!(
        workers = config.worker_concurrency,
        port = config.server_port,
        "Configuration loaded"
    );

    App::build(config).await?.run().await
}
