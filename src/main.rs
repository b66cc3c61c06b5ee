// src/main.rs

//! # Liveserver Entry Point
//!
//! Loads configuration, initializes logging, resolves what to serve, and runs
//! the live-reload server until Ctrl-C. Any failure before or during serving
//! is printed to stderr and exits with status 1.

use anyhow::Result;
use liveserver::config::AppConfig;
use liveserver::error::ConfigError;
use liveserver::server::{self, LiveServer};
use liveserver::version::{NpmGlobal, VersionProvider};
use owo_colors::{OwoColorize, Stream};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let app_config = match AppConfig::load() {
        Ok(cfg) => cfg,
        Err(ConfigError::Args(e)) => {
            // --help and --version also arrive here and exit cleanly.
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&app_config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install tracing subscriber: {}", e);
    }

    tracing::debug!("Liveserver starting with configuration: {:?}", app_config);

    if let Err(e) = run(app_config).await {
        eprintln!("{}", e.if_supports_color(Stream::Stderr, |t| t.red()));
        std::process::exit(1);
    }
}

async fn run(app_config: AppConfig) -> Result<()> {
    let npm = NpmGlobal::new(app_config.package.clone());
    let target = server::resolve_target(&app_config, &npm).await?;
    tracing::debug!("Resolved target: {:?}", target);

    let versions: Arc<dyn VersionProvider> = Arc::new(npm);
    let server = LiveServer::start(
        target,
        app_config.http_port,
        app_config.reload_port,
        versions,
    )
    .await?;

    server.run(shutdown_signal()).await?;
    tracing::info!("Liveserver shut down gracefully.");
    Ok(())
}

/// Resolves on Ctrl-C.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Ctrl-C received, initiating shutdown..."),
        Err(err) => {
            tracing::error!("Failed to listen for Ctrl-C signal: {}", err);
            std::future::pending::<()>().await;
        }
    }
}
