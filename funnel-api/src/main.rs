//! funnel-api - acquisition funnel backend
//!
//! Serves the landing page tracking endpoints, dashboard CRUD and analytics,
//! the email CRM proxy and the voice relay from one process.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use funnel_common::config::ConfigResolver;
use funnel_common::db::{FunnelStore, MemoryStore, RestStore};
use funnel_api::{build_router, AppState};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for funnel-api
#[derive(Parser, Debug)]
#[command(name = "funnel-api")]
#[command(about = "Acquisition funnel tracking and analytics service")]
#[command(version)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long, env = "FUNNEL_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on (overrides config)
    #[arg(short, long, env = "FUNNEL_BIND")]
    bind: Option<String>,

    /// Keep all data in process memory instead of the hosted backend
    #[arg(long)]
    memory: bool,

    /// Log filter (overrides config; RUST_LOG wins over both)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let from_env = EnvFilter::try_from_default_env().ok();
    let log_fixed = from_env.is_some() || args.log_level.is_some();
    let initial = from_env.unwrap_or_else(|| EnvFilter::new(args.log_level.as_deref().unwrap_or("info")));
    let (filter, filter_handle) = reload::Layer::new(initial);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Build identification first, before any network setup
    info!(
        "Starting funnel-api v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let resolver = ConfigResolver::new(args.config.clone());
    let config = resolver.resolve().context("Failed to load configuration")?;
    match resolver.config_path() {
        Some(path) => info!("Config: {}", path.display()),
        None => info!("Config: built-in defaults"),
    }
    if !log_fixed {
        if let Err(e) = filter_handle.reload(EnvFilter::new(&config.logging.level)) {
            warn!("Could not apply logging.level={}: {}", config.logging.level, e);
        }
    }

    let store: Arc<dyn FunnelStore> = if args.memory {
        warn!("Using in-memory store; data is lost on exit");
        Arc::new(MemoryStore::new())
    } else {
        match RestStore::from_config(&config.backend) {
            Ok(store) => {
                info!("✓ Backend configured");
                Arc::new(store)
            }
            Err(e) => {
                error!("Backend unavailable: {}", e);
                return Err(e).context("Set backend url/api_key or run with --memory");
            }
        }
    };

    if config.crm.api_key.is_none() {
        warn!("BREVO_API_KEY not set; /api/subscribe will answer 500");
    }
    if config.voice.api_key.is_none() {
        warn!("OPENAI_API_KEY not set; /voice will refuse sessions");
    }

    let state = AppState::new(store, &config).context("Failed to initialize services")?;
    let app = build_router(state);

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;
    info!("funnel-api listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
