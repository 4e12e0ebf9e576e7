//! atriumd - Atrium Voice Room Daemon
//!
//! Binary entry point: configuration, tracing, metrics, the control
//! plane, and the signal-driven shutdown. A deployment links a platform
//! adapter that feeds `App::enqueue`; without one the daemon runs
//! against the no-op client and manages nothing.

use atriumd::App;
use atriumd::cache::MemoryCache;
use atriumd::config::Config;
use atriumd::platform::noop::NoOpPlatform;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Resolve the configuration path from CLI arguments.
/// Supports `-c <path>`, `--config <path>`, or a bare path.
/// Falls back to `config.toml` when no argument is provided.
fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);

    let raw_path = match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => args.next().unwrap_or_else(|| {
            eprintln!("Missing path after {}", flag);
            std::process::exit(1);
        }),
        Some(path) => path,
        None => "config.toml".to_string(),
    };

    match std::fs::canonicalize(Path::new(&raw_path)) {
        Ok(p) => p.to_string_lossy().into_owned(),
        Err(_) => raw_path,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first (before tracing, so we can use log_format)
    let config_path = resolve_config_path();

    let config = Config::load(&config_path).map_err(|e| {
        eprintln!("ERROR: Failed to load config from {}: {}", config_path, e);
        e
    })?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match config.server.log_format {
        atriumd::config::LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .json()
                .init();
        }
        atriumd::config::LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .init();
        }
    }

    if let Err(errors) = atriumd::config::validate(&config) {
        for err in &errors {
            error!(error = %err, "Configuration validation failed");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    info!(
        guild_id = config.realm.guild_id,
        spawn_channels = config.realm.spawn_channel_ids.len(),
        "Starting atriumd"
    );

    // Prometheus metrics are optional.
    // Convention: metrics_port = 0 disables the HTTP endpoint (used by tests).
    let metrics_port = config.server.metrics_port.unwrap_or(9090);
    if metrics_port == 0 {
        info!("Metrics disabled");
    } else {
        atriumd::metrics::init();
        info!("Metrics initialized");

        tokio::spawn(async move {
            atriumd::metrics::serve(metrics_port).await;
        });
        info!(port = metrics_port, "Prometheus HTTP server started");
    }

    // The platform adapter is linked by the deployment; standalone runs
    // get the no-op client and an empty realm.
    warn!("No platform adapter linked; running with the no-op client");
    let platform = Arc::new(NoOpPlatform);
    let cache_backend = Arc::new(MemoryCache::new());

    let app = App::start(config, platform, cache_backend).await?;

    // Wait for SIGINT/SIGTERM, then run the cleanup sequence.
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => info!("Received SIGINT - initiating graceful shutdown"),
            _ = sigterm.recv() => info!("Received SIGTERM - initiating graceful shutdown"),
        }
    }

    app.shutdown().await;
    Ok(())
}
