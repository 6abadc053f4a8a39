use std::{collections::BTreeMap, time::Duration};

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::IntoResponse,
    routing::{delete, get, patch, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::debug;

/// Largest payload `/bytes/{n}` will generate, and the largest request
/// body the echo routes accept (64 MiB).
pub const MAX_BYTES: usize = 64 * 1024 * 1024;

/// Longest sleep `/delay/{ms}` will honour.
pub const MAX_DELAY_MS: u64 = 30_000;

/// Body returned by every echo route.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub length: usize,
    pub json: Option<serde_json::Value>,
}

pub fn app() -> Router {
    Router::new()
        .route("/get", get(echo))
        .route("/post", post(echo))
        .route("/put", put(echo))
        .route("/patch", patch(echo))
        .route("/delete", delete(echo))
        .route("/bytes/{n}", get(bytes))
        .route("/delay/{ms}", get(delay))
        .route("/status/{code}", get(status))
        .layer(DefaultBodyLimit::max(MAX_BYTES))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

/// Deterministic content served by `/bytes/{n}`: byte `i` is `i % 256`.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Echo> {
    debug!("echo {} {} ({} bytes)", method, uri.path(), body.len());
    Json(Echo {
        method: method.to_string(),
        path: uri.path().to_string(),
        headers: headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect(),
        length: body.len(),
        json: serde_json::from_slice(&body).ok(),
    })
}

async fn bytes(Path(n): Path<usize>) -> Result<impl IntoResponse, StatusCode> {
    if n > MAX_BYTES {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        pattern(n),
    ))
}

async fn delay(Path(ms): Path<u64>, method: Method, uri: Uri, headers: HeaderMap) -> Json<Echo> {
    tokio::time::sleep(Duration::from_millis(ms.min(MAX_DELAY_MS))).await;
    echo(method, uri, headers, Bytes::new()).await
}

async fn status(Path(code): Path<u16>) -> Result<StatusCode, StatusCode> {
    StatusCode::from_u16(code).map_err(|_| StatusCode::BAD_REQUEST)
}
