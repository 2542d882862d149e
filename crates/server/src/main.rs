//! Lightbox server binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use lightbox_core::config::AppConfig;
use lightbox_server::catalog::MemoryCatalog;
use lightbox_server::{AppState, create_router};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Lightbox - an image hosting service
#[derive(Parser, Debug)]
#[command(name = "lightboxd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "LIGHTBOX_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Lightbox v{}", env!("CARGO_PKG_VERSION"));

    // File is optional; every setting has a default and env vars override both.
    let config_path = std::path::Path::new(&args.config);
    let mut figment = Figment::new();
    if config_path.exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::info!(
            config_path = %args.config,
            "No config file found, using defaults and LIGHTBOX_* environment variables"
        );
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("LIGHTBOX_").split("__"))
        .extract()
        .context("failed to load configuration")?;

    // Reject bad settings before touching the network.
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    lightbox_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    // An unreachable store is not fatal: the limiter and cache fail open.
    let kv = match lightbox_kv::from_config(&config.kv).await {
        Ok(store) => {
            tracing::info!(backend = store.backend_name(), "Shared store initialized");
            Some(store)
        }
        Err(lightbox_kv::KvError::Config(msg)) => {
            anyhow::bail!("invalid kv configuration: {msg}");
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Shared store unreachable; continuing without rate limiting or caching"
            );
            None
        }
    };

    let catalog = Arc::new(MemoryCatalog::new());
    let state = AppState::new(config.clone(), catalog, kv)
        .context("failed to initialize application state")?;

    tracing::info!(
        rate_limit = ?state.rate_limiter.limit(),
        rate_limit_window_secs = ?state.rate_limiter.window().map(|w| w.as_secs()),
        upload_concurrency = state.admission.limit(),
        upload_timeout_ms = state.admission.default_timeout().as_millis() as u64,
        cache_ttl_secs = ?state.cache.default_ttl().map(|ttl| ttl.as_secs()),
        "Protection tiers configured"
    );

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    // ConnectInfo is required for per-client rate limiting.
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections");
}
