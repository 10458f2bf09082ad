//! HTTP interface.
//!
//! `POST /download` takes `{searchKey, ordinal?}` (also accepted as
//! `{numeroprocesso, indiceArquivo?}`) and answers with the document bytes
//! or a JSON failure report. `GET /health` reports liveness and load.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use formfetch::{FetchError, FetchRequest, FetchedDocument, Fetcher};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub fetcher: Arc<Fetcher>,
    pub started: Instant,
}

impl AppState {
    pub fn new(fetcher: Fetcher) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            started: Instant::now(),
        }
    }
}

/// Build the axum Router with all endpoints.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/download", post(download))
        .route("/download-susep", post(download))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `router` on `addr` until `shutdown` resolves.
pub async fn serve<F>(addr: std::net::SocketAddr, state: AppState, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("HTTP API listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ── Request parsing ─────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadBody {
    #[serde(default, alias = "numeroprocesso")]
    search_key: Option<String>,
    #[serde(default, alias = "indiceArquivo")]
    ordinal: Option<Value>,
}

/// Parse the request body. Ordinals may arrive as numbers or numeric
/// strings; anything else is treated as absent.
fn parse_request(body: &[u8]) -> Result<FetchRequest, FetchError> {
    let parsed: DownloadBody = if body.iter().all(u8::is_ascii_whitespace) {
        DownloadBody::default()
    } else {
        serde_json::from_slice(body)
            .map_err(|e| FetchError::Validation(format!("request body is not valid JSON: {e}")))?
    };

    let ordinal = parsed.ordinal.as_ref().and_then(|v| match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    });

    Ok(FetchRequest {
        search_key: parsed.search_key.unwrap_or_default(),
        ordinal,
    })
}

// ── Handlers ────────────────────────────────────────────────────

async fn download(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(e) => return failure(&e, ""),
    };
    let key = request.search_key.trim().to_string();

    match state.fetcher.fetch(request).await {
        Ok(doc) => document_response(doc),
        Err(e) => failure(&e, &key),
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub active_sessions: usize,
    pub queued_requests: usize,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    let stats = state.fetcher.limiter_stats();
    Json(Health {
        status: "ok".to_string(),
        version: formfetch::VERSION.to_string(),
        uptime_secs: state.started.elapsed().as_secs(),
        active_sessions: state.fetcher.open_sessions(),
        queued_requests: stats.queued,
    })
}

// ── Responses ───────────────────────────────────────────────────

/// HTTP status for each failure category.
pub fn status_for(err: &FetchError) -> StatusCode {
    match err {
        FetchError::Validation(_) => StatusCode::BAD_REQUEST,
        FetchError::NoCandidates => StatusCode::NOT_FOUND,
        FetchError::InvalidContent { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        FetchError::ElementNotFound { .. } | FetchError::RetrievalFailed { .. } => {
            StatusCode::BAD_GATEWAY
        }
        FetchError::Session(_) => StatusCode::SERVICE_UNAVAILABLE,
        FetchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
    }
}

fn failure(err: &FetchError, key: &str) -> Response {
    (status_for(err), Json(err.report(key))).into_response()
}

fn document_response(doc: FetchedDocument) -> Response {
    let artifact = doc.artifact;
    let mut headers = HeaderMap::new();

    let mut set = |name: HeaderName, value: String| {
        if let Ok(v) = HeaderValue::from_str(&value) {
            headers.insert(name, v);
        }
    };
    set(header::CONTENT_TYPE, artifact.content_type.clone());
    set(header::CONTENT_LENGTH, artifact.size_bytes.to_string());
    set(
        header::CONTENT_DISPOSITION,
        format!("attachment; filename=\"{}\"", artifact.filename),
    );
    set(
        HeaderName::from_static("x-process-time"),
        format!("{:.2}s", artifact.elapsed_ms as f64 / 1000.0),
    );
    set(
        HeaderName::from_static("x-file-size"),
        format!("{:.2}KB", artifact.size_bytes as f64 / 1024.0),
    );
    set(HeaderName::from_static("x-file-name"), artifact.filename.clone());
    set(
        HeaderName::from_static("x-total-files"),
        doc.candidate_count.to_string(),
    );
    set(
        HeaderName::from_static("x-selected-ordinal"),
        doc.selected_ordinal.to_string(),
    );

    (StatusCode::OK, headers, artifact.bytes).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_aliases_and_string_ordinal() {
        let req = parse_request(br#"{"numeroprocesso":"15414.900381/2013-67","indiceArquivo":"2"}"#)
            .unwrap();
        assert_eq!(req.search_key, "15414.900381/2013-67");
        assert_eq!(req.ordinal, Some(2));
    }

    #[test]
    fn test_parse_camel_case_and_junk_ordinal() {
        let req = parse_request(br#"{"searchKey":"abc","ordinal":"segundo"}"#).unwrap();
        assert_eq!(req.search_key, "abc");
        assert_eq!(req.ordinal, None);
        let req = parse_request(br#"{"searchKey":"abc","ordinal":3}"#).unwrap();
        assert_eq!(req.ordinal, Some(3));
    }

    #[test]
    fn test_parse_rejects_malformed_json() {
        let err = parse_request(b"{not json").unwrap_err();
        assert_eq!(err.category(), "validation_error");
        assert_eq!(parse_request(b"  ").unwrap().search_key, "");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&FetchError::NoCandidates), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&FetchError::Timeout(Duration::from_secs(1))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            status_for(&FetchError::RetrievalFailed { attempts: vec![] }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&FetchError::Session("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
