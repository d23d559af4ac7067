//! HTTP handlers for uploads and downloads.
//! Streams object bodies in both directions and delegates lifecycle rules to
//! `ObjectLifecycle`.

use crate::{
    errors::AppError,
    handlers::auth::require_password,
    models::retention::Retention,
    services::lifecycle_service::IngestRequest,
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::{StreamExt, TryStreamExt};
use std::{io, path::PathBuf};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

const STATIC_FILES: [&str; 3] = ["index.html", "style.css", "upload.js"];

const X_EXPIRATION_SECONDS: HeaderName = HeaderName::from_static("x-expiration-seconds");
const X_ONE_TIME_UPLOAD: HeaderName = HeaderName::from_static("x-one-time-upload");
const X_ONE_TIME_DOWNLOAD: HeaderName = HeaderName::from_static("x-one-time-download");
const X_EXPIRATION_DOWNLOAD: HeaderName = HeaderName::from_static("x-expiration-download");
const X_EXPIRATION_TIME: HeaderName = HeaderName::from_static("x-expiration-time");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

const USAGE: &str = "\
ephemeral-store - one-time file sharing

Usage:
  curl <host> -T file.txt                                  # upload a file
  curl <host> -d \"text content\"                          # upload text (saved as .txt)
  curl <host>/short -T file.txt                            # answer with a short URL
  curl -H \"X-Expiration-Seconds: 3600\" <host> -T file.txt  # keep it for an hour

Features:
  * files can be downloaded once (default)
  * or set an expiration time and download them many times
  * files are deleted after download or expiration
";

/// `GET /` — usage text for curl, the upload page for everyone else.
pub async fn root(headers: HeaderMap) -> Response {
    let is_curl = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ua| ua.to_ascii_lowercase().contains("curl"));

    if is_curl {
        (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            USAGE,
        )
            .into_response()
    } else {
        (StatusCode::FOUND, [(header::LOCATION, "/index.html")]).into_response()
    }
}

/// `PUT|POST /` and `PUT|POST /{*path}` — store the body as a new object.
pub async fn upload(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    handle_upload(state, method, headers, body, false).await
}

/// `PUT|POST /short` — like `upload`, and always asks for a short URL.
pub async fn upload_short(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    handle_upload(state, method, headers, body, true).await
}

async fn handle_upload(
    state: AppState,
    method: Method,
    headers: HeaderMap,
    body: Body,
    force_short_link: bool,
) -> Result<Response, AppError> {
    require_password(&headers, state.config.password.as_ref())?;

    let declared_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let content_type = header_string(&headers, &header::CONTENT_TYPE);
    let requested_ttl = header_string(&headers, &X_EXPIRATION_SECONDS);

    let stream = body
        .into_data_stream()
        .map_err(io::Error::other)
        .boxed();

    let outcome = state
        .lifecycle
        .ingest(IngestRequest {
            body: stream,
            declared_length,
            content_type,
            requested_ttl,
            raw_text: method == Method::POST,
            force_short_link,
            base_url: base_url(&headers),
        })
        .await?;

    tracing::debug!("upload of {} answered with {}", outcome.key, outcome.url);

    let one_time = outcome.retention.is_one_time();
    let mut response = Response::new(Body::from(upload_message(&outcome.url, &outcome.retention)));
    let resp_headers = response.headers_mut();
    resp_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp_headers.insert(X_ONE_TIME_UPLOAD, bool_header(one_time));
    Ok(response)
}

/// `GET /{*key}` — static assets, or a stored object as a streaming response.
///
/// `HEAD` on a stored object is refused: answering it would open the object
/// and count as its one read.
pub async fn download(
    State(state): State<AppState>,
    method: Method,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if STATIC_FILES.contains(&key.as_str()) {
        return serve_static(&state.config.public_dir, &key).await;
    }
    if method == Method::HEAD {
        return Err(AppError::new(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed",
        ));
    }

    require_password(&headers, state.config.password.as_ref())
        .map_err(AppError::with_challenge)?;

    let served = state.lifecycle.fetch(&key).await?;
    tracing::debug!("streaming {} ({} bytes)", served.key, served.size_bytes);

    let mut response = Response::new(Body::from_stream(served.body));
    *response.status_mut() = StatusCode::OK;
    let resp_headers = response.headers_mut();
    resp_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&served.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    resp_headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(served.size_bytes.max(0) as u64),
    );
    if let Some(value) = served
        .etag
        .as_ref()
        .and_then(|etag| HeaderValue::from_str(&format!("\"{}\"", etag)).ok())
    {
        resp_headers.insert(header::ETAG, value);
    }
    resp_headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    resp_headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    resp_headers.insert(header::EXPIRES, HeaderValue::from_static("0"));

    match served.retention {
        Retention::OneTime => {
            resp_headers.insert(X_ONE_TIME_DOWNLOAD, bool_header(true));
        }
        Retention::TimeBounded { .. } => {
            resp_headers.insert(X_EXPIRATION_DOWNLOAD, bool_header(true));
            if let Some(value) = served
                .expiration_time
                .as_deref()
                .and_then(|v| HeaderValue::from_str(v).ok())
            {
                resp_headers.insert(X_EXPIRATION_TIME, value);
            }
        }
    }

    Ok(response)
}

async fn serve_static(public_dir: &str, name: &str) -> Result<Response, AppError> {
    let path = PathBuf::from(public_dir).join(name);
    let file = File::open(&path).await.map_err(|err| {
        if err.kind() == io::ErrorKind::NotFound {
            AppError::not_found("File not found")
        } else {
            AppError::internal(err.to_string())
        }
    })?;

    let content_type = mime_guess::from_path(name).first_or_octet_stream();
    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    if let Ok(value) = HeaderValue::from_str(content_type.essence_str()) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}

fn header_string(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn bool_header(value: bool) -> HeaderValue {
    HeaderValue::from_static(if value { "true" } else { "false" })
}

/// `scheme://host` as the client addressed us.
fn base_url(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = match headers.get(X_FORWARDED_PROTO).and_then(|v| v.to_str().ok()) {
        Some(proto) if proto.eq_ignore_ascii_case("https") => "https",
        _ => "http",
    };
    format!("{}://{}", scheme, host)
}

fn upload_message(url: &str, retention: &Retention) -> String {
    match retention {
        Retention::OneTime => format!(
            "\n\n{}\n\nNote: This file can only be downloaded once!\n",
            url
        ),
        Retention::TimeBounded { window_seconds, .. } => {
            let lifetime = format_lifetime(*window_seconds);
            format!(
                "\n\n{}\n\nNote: This file will expire after {} and can be downloaded multiple times.\n",
                url, lifetime
            )
        }
    }
}

/// Render a lifetime as hours and minutes.
pub fn format_lifetime(seconds: i64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let plural = |n: i64, unit: &str| format!("{} {}{}", n, unit, if n == 1 { "" } else { "s" });

    match (hours, minutes) {
        (0, 0) => plural(seconds, "second"),
        (0, m) => plural(m, "minute"),
        (h, 0) => plural(h, "hour"),
        (h, m) => format!("{} {}", plural(h, "hour"), plural(m, "minute")),
    }
}

/// Render a byte count with binary units, e.g. `5.00GB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    const SIZES: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    if bytes < UNIT {
        return format!("{}B", bytes);
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT && exp + 2 < SIZES.len() {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.2}{}", bytes as f64 / div as f64, SIZES[exp + 1])
}
