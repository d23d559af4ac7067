//! Client for the external short-link (redirect) service.

use base64::{Engine as _, engine::general_purpose};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ShortLinkError {
    #[error("short link request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("short link service returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("invalid response from short link service")]
    Rejected,
}

#[derive(Debug, Deserialize)]
struct ShortenResponse {
    #[serde(rename = "Code")]
    code: i64,
    #[serde(rename = "ShortUrl", default)]
    short_url: String,
}

#[derive(Clone)]
pub struct ShortLinkClient {
    http: Client,
    endpoint: String,
}

impl ShortLinkClient {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ShortLinkError> {
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }

    /// Ask the service for a short form of `long_url`.
    ///
    /// The service takes a form field `longUrl` holding the base64 of the
    /// URL and answers `{"Code": 1, "ShortUrl": "..."}` on success.
    pub async fn shorten(&self, long_url: &str) -> Result<String, ShortLinkError> {
        let encoded = general_purpose::STANDARD.encode(long_url);
        let response = self
            .http
            .post(&self.endpoint)
            .form(&[("longUrl", encoded.as_str())])
            .send()
            .await?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(ShortLinkError::Status(response.status()));
        }

        let body: ShortenResponse = response.json().await?;
        if body.code == 1 && !body.short_url.is_empty() {
            Ok(body.short_url)
        } else {
            Err(ShortLinkError::Rejected)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{Form, Json, Router, routing::post};
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    /// Fake shortener: answers `https://sho.rt/<decoded url length>`, or `Code: 0`
    /// when the decoded URL contains "reject".
    pub(crate) async fn spawn_fake_shortener() -> String {
        async fn shorten(Form(form): Form<HashMap<String, String>>) -> Json<Value> {
            let decoded = form
                .get("longUrl")
                .and_then(|v| general_purpose::STANDARD.decode(v).ok())
                .and_then(|b| String::from_utf8(b).ok())
                .unwrap_or_default();
            if decoded.contains("reject") || decoded.is_empty() {
                Json(json!({ "Code": 0 }))
            } else {
                Json(json!({ "Code": 1, "ShortUrl": format!("https://sho.rt/{}", decoded.len()) }))
            }
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/short", post(shorten));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/short", addr)
    }

    #[tokio::test]
    async fn shortens_through_service() {
        let endpoint = spawn_fake_shortener().await;
        let client = ShortLinkClient::new(endpoint).unwrap();
        let short = client.shorten("http://host/abc123.txt").await.unwrap();
        assert_eq!(short, "https://sho.rt/22");
    }

    #[tokio::test]
    async fn code_other_than_one_is_rejected() {
        let endpoint = spawn_fake_shortener().await;
        let client = ShortLinkClient::new(endpoint).unwrap();
        let err = client.shorten("http://host/reject").await.unwrap_err();
        assert!(matches!(err, ShortLinkError::Rejected));
    }

    #[tokio::test]
    async fn unreachable_service_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ShortLinkClient::new(format!("http://{}/short", addr)).unwrap();
        assert!(client.shorten("http://host/abc").await.is_err());
    }
}
