//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that probes the object store

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

/// `GET /healthz`
///
/// Always 200; performs no I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 200 when the store answers its probe, 503 otherwise. Also reports how
/// many one-time deletes are still queued.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let store = match state.store.probe().await {
        Ok(()) => CheckStatus {
            ok: true,
            error: None,
        },
        Err(err) => {
            tracing::warn!("readiness probe failed: {}", err);
            CheckStatus {
                ok: false,
                error: Some(err.to_string()),
            }
        }
    };

    let status = if store.ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = ReadyResponse {
        status: if store.ok { "ok".into() } else { "error".into() },
        store,
        pending_deletes: state.lifecycle.reclaimer().pending(),
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    store: CheckStatus,
    pending_deletes: usize,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use crate::routes::routes::tests::spawn_app;

    #[tokio::test]
    async fn liveness_and_readiness() {
        let app = spawn_app(|_| {}).await;

        let resp = app
            .client
            .get(format!("{}/healthz", app.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        let resp = app
            .client
            .get(format!("{}/readyz", app.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["store"]["ok"], true);
        assert_eq!(body["pending_deletes"], 0);
    }
}
