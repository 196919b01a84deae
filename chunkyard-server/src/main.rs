//! chunkyard server binary

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use chunkyard_engine::Chunkyard;
use chunkyard_server::{ChunkyardServer, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    init_tracing(config.log_json);

    info!("Starting chunkyard server");
    info!("Artifact directory: {}", config.artifact_dir.display());
    info!("Staging directory: {} ({:?})", config.staging_dir.display(), config.staging_backend);
    info!("Bind address: {}", config.bind);

    let chunkyard = Chunkyard::open(
        config.staging_backend.into(),
        &config.staging_dir,
        &config.artifact_dir,
    )
    .context("Failed to initialize chunkyard engine")?;

    info!("Engine initialized");

    let listener = ChunkyardServer::bind(config.bind).await?;
    let server = ChunkyardServer::from_config(chunkyard, &config);

    server.serve(listener, shutdown_signal()).await?;
    info!("Server shutdown gracefully");

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
