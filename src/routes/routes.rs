//! Defines the HTTP surface.
//!
//! ## Structure
//! - `GET        /`            — usage text (curl) or redirect to the upload page
//! - `PUT|POST   /`            — upload; `POST` bodies are stored as text
//! - `PUT|POST   /short`       — upload and answer with a short URL
//! - `GET        /{*key}`      — download (or a static asset of the upload page)
//! - `PUT|POST   /{*key}`      — upload; the path is ignored
//! - `GET        /api/config`  — limits for the upload page
//! - `GET        /healthz`, `GET /readyz`

use crate::{
    handlers::{
        config_handlers::public_config,
        health_handlers::{healthz, readyz},
        object_handlers::{download, root, upload, upload_short},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, put},
};

/// Build the router. Upload size is enforced by the lifecycle service, so
/// axum's own body limit is lifted.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/config", get(public_config))
        .route("/", get(root).put(upload).post(upload))
        .route("/short", put(upload_short).post(upload_short))
        .route("/short/", put(upload_short).post(upload_short))
        .route("/{*key}", get(download).put(upload).post(upload))
        .layer(DefaultBodyLimit::disable())
}
