//! PDF Toolkit - Entry point
//!
//! HTTP service for merging, unlocking and grayscaling PDFs.

use pdf_toolkit::{run_server_with_config, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pdf_toolkit=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ServerConfig::from_env()?;
    tracing::info!(addr = %config.bind_addr, "Starting PDF Toolkit");

    run_server_with_config(config).await
}
