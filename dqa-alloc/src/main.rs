//! dqa-alloc - annotation task allocation service
//!
//! Serves `GET /api/tasks` manifests and `GET /health`. Starts without store
//! credentials; requests are then answered with the seed manifest.

use anyhow::{Context, Result};
use clap::Parser;
use dqa_common::config::{load_toml_table, resolve_config_path, SettingsResolver};
use std::sync::Arc;
use tracing::{info, warn};

use dqa_alloc::store::rest::RestStore;
use dqa_alloc::store::Stores;
use dqa_alloc::{build_router, AllocConfig, AppState, Allocator};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "dqa-alloc")]
#[command(about = "Dialect QA task allocation service")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "DQA_CONFIG")]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref(), "DQA_CONFIG", "dqa-alloc.toml");
    // Parsed before the subscriber exists so the file can set the log level
    let loaded = config_path.map(|path| {
        let table = load_toml_table(&path);
        (path, table)
    });
    let settings = match &loaded {
        Some((_, Ok(table))) => SettingsResolver::with_table(table.clone()),
        _ => SettingsResolver::env_only(),
    };
    let logging = settings.logging();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level)),
        )
        .init();

    info!("Starting dqa-alloc v{}", env!("CARGO_PKG_VERSION"));
    match &loaded {
        Some((path, Ok(_))) => info!("Loaded config file: {}", path.display()),
        Some((_, Err(e))) => warn!("{}, using environment and defaults", e),
        None => info!("No config file found, using environment and defaults"),
    }

    let mut config = AllocConfig::resolve(&settings);
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }

    let http = reqwest::Client::builder()
        .user_agent(concat!("dqa-alloc/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let stores = match RestStore::new(http.clone(), &config) {
        Ok(store) => {
            info!(table = %config.items.table, "Store configured");
            Some(Stores::from_backend(Arc::new(store)))
        }
        Err(e) => {
            warn!("{}; serving seed manifests until configured", e);
            None
        }
    };

    match &config.coverage.endpoint {
        Some(endpoint) => info!("Coverage endpoint: {}", endpoint),
        None => info!("No coverage endpoint, using snapshot files only"),
    }

    let bind_address = config.bind_address.clone();
    let state = AppState::new(Allocator::new(config, stores, http));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    info!("dqa-alloc listening on http://{}", bind_address);
    info!("Health check: http://{}/health", bind_address);

    axum::serve(listener, app).await?;

    Ok(())
}
