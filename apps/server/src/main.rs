//! llmgate binary
//!
//! Loads `.env`, installs tracing, and serves the gateway until Ctrl-C.

use std::path::PathBuf;

use anyhow::Context;
use llmgate_core::Settings;
use llmgate_gateway::{GatewayConfig, GatewayServer};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Prefix for the rolling log files (`llmgate.2026-01-22.log`)
const LOG_PREFIX: &str = "llmgate";

/// Log directory, overridable with `LLMGATE_LOG_DIR`
fn logs_dir() -> PathBuf {
    std::env::var_os("LLMGATE_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("logs"))
}

/// Console plus daily-rotating file logging
///
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing() -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let logs_dir = logs_dir();
    if let Err(e) = std::fs::create_dir_all(&logs_dir) {
        eprintln!("Warning: Failed to create logs directory: {}", e);
    }

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_PREFIX)
        .filename_suffix("log")
        .build(&logs_dir)
        .context("failed to create log file appender")?;
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    // RUST_LOG wins over the defaults
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("info")
            .add_directive("llmgate_core=debug".parse()?)
            .add_directive("llmgate_gateway=debug".parse()?)
            .add_directive("tower_http=info".parse()?)
            .add_directive("hyper=warn".parse()?)
            .add_directive("reqwest=warn".parse()?),
    };

    let console_layer = fmt::layer()
        .with_ansi(true)
        .compact()
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _guard = init_tracing()?;

    info!("Starting llmgate v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::from_env().context("invalid settings")?;
    let config = GatewayConfig::from_env()?;
    let server = GatewayServer::from_settings(config, &settings)?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                trigger.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.run_until(shutdown).await
}
