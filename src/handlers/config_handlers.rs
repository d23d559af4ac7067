//! `GET /api/config` — the limits the upload page renders.

use crate::state::AppState;
use axum::{
    Json,
    extract::State,
    http::header,
    response::IntoResponse,
};
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PublicConfig {
    max_age_for_multi_download: i64,
    max_upload_size: u64,
    max_age: i64,
    need_password: bool,
}

pub async fn public_config(State(state): State<AppState>) -> impl IntoResponse {
    let settings = state.lifecycle.settings();
    let body = PublicConfig {
        max_age_for_multi_download: settings.max_age_for_multi_download,
        max_upload_size: settings.max_upload_size,
        max_age: settings.max_age,
        need_password: state.config.password.is_some(),
    };

    (
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "GET"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
        ],
        Json(body),
    )
}

#[cfg(test)]
mod tests {
    use crate::routes::routes::tests::spawn_app;

    #[tokio::test]
    async fn reports_limits_and_password_requirement() {
        let app = spawn_app(|cfg| {
            cfg.max_upload_size = 1024;
            cfg.password = Some(crate::config::Secret("pw".into()));
        })
        .await;

        let resp = app
            .client
            .get(format!("{}/api/config", app.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(resp.headers()["access-control-allow-origin"], "*");

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["maxUploadSize"], 1024);
        assert_eq!(body["maxAge"], app.config.max_age);
        assert_eq!(
            body["maxAgeForMultiDownload"],
            app.config.max_age_for_multi_download
        );
        assert_eq!(body["needPassword"], true);
    }
}
