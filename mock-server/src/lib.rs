use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    extract::{Path, Query, RawQuery},
    http::{header, HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpListener;

/// Body that is not valid UTF-8 (`0xc3` starts a two-byte sequence that
/// `0x28` does not continue).
pub const INVALID_UTF8: &[u8] = &[b'{', 0xc3, 0x28, b'}'];

/// Largest item count `/large/{n}` will produce.
pub const MAX_LARGE_ITEMS: usize = 1_000_000;

/// What `/echo` saw of a request without a body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub query: Option<String>,
    pub params: BTreeMap<String, String>,
}

#[derive(Deserialize)]
pub struct StatusParams {
    pub msg: Option<String>,
}

pub fn app() -> Router {
    Router::new()
        .route(
            "/echo",
            get(echo)
                .delete(echo)
                .options(echo)
                .post(echo_body)
                .put(echo_body),
        )
        .route("/headers", get(headers))
        .route("/status/{code}", get(status).post(status))
        .route("/slow/{millis}", get(slow))
        .route("/text", get(text))
        .route("/bytes", get(bytes))
        .route("/large/{n}", get(large))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn echo(
    method: Method,
    RawQuery(query): RawQuery,
    Query(params): Query<BTreeMap<String, String>>,
) -> Json<Echo> {
    Json(Echo {
        method: method.to_string(),
        query,
        params,
    })
}

async fn echo_body(Json(body): Json<Value>) -> Json<Value> {
    Json(body)
}

/// Request headers as a JSON object keyed by lowercase name. Repeated
/// headers are joined with `, `.
async fn headers(headers: HeaderMap) -> Json<BTreeMap<String, String>> {
    Json(header_map(&headers))
}

pub fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut map: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    map
}

async fn status(Path(code): Path<u16>, Query(params): Query<StatusParams>) -> impl IntoResponse {
    let status = status_code(code);
    let msg = params
        .msg
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string());
    (status, Json(serde_json::json!({ "msg": msg })))
}

/// `code` as a status, or 400 when it is not a valid HTTP status.
pub fn status_code(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

async fn slow(Path(millis): Path<u64>) -> Json<Value> {
    tracing::debug!(millis, "delaying response");
    tokio::time::sleep(Duration::from_millis(millis)).await;
    Json(serde_json::json!({ "slept": millis }))
}

async fn text() -> &'static str {
    "plain text, not json"
}

async fn bytes() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/json")], INVALID_UTF8)
}

async fn large(Path(n): Path<usize>) -> Result<Json<Vec<usize>>, StatusCode> {
    if n > MAX_LARGE_ITEMS {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }
    Ok(Json((0..n).collect()))
}
