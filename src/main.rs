use anyhow::{Context, Result};
use axum::Router;
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use services::{
    storage_service::LocalObjectStore,
    sweeper::{Sweeper, SweeperConfig},
};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting ephemeral-store with config: {:?}", cfg);

    // --- Open the object store and apply its schema ---
    let backend = LocalObjectStore::open(&cfg.database_url, &cfg.storage_dir)
        .await
        .with_context(|| format!("opening object store at {}", cfg.database_url))?
        .with_page_size(cfg.list_page_size);
    let statements = backend.migrate().await.context("applying metadata schema")?;
    tracing::debug!("Applied {} schema statements", statements);

    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize lifecycle services ---
    let sweeper_config = SweeperConfig {
        initial_delay: cfg.sweep_initial_delay,
        interval: cfg.sweep_interval,
        concurrency: cfg.sweep_concurrency,
        fallback_max_age: cfg.max_age,
    };
    let addr = cfg.addr();
    let host = cfg.host.clone();
    let port = cfg.port;

    let state = AppState::assemble(cfg, Arc::new(backend))?;
    let sweeper = Arc::new(Sweeper::new(state.store.clone(), sweeper_config));
    sweeper.start();

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
