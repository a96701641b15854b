//! HTTP surface: webhook trigger, Prometheus metrics and status.
//!
//! Only started when an address is configured. `/metrics` and `/status` sit
//! behind the optional Basic/Bearer authentication; `/webhook` and `/` are
//! always open.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use libgitsync_core::{
    ChangeRecord, RepositoryState, SyncMetrics, SyncReason, TriggerHandle, TriggerStatus,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::HttpAuth;
use crate::error::DaemonError;
use crate::prometheus;

pub const WEBHOOK_MESSAGE: &str = "Synchronization triggered by webhook";

/// Paths served, listed on the index page (except `/`)
const ROUTES: &[&str] = &["/", "/metrics", "/status", "/webhook"];

const BASIC_CHALLENGE: &str = "Basic realm=\"Restricted\"";

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    repo: Arc<RepositoryState>,
    metrics: Arc<SyncMetrics>,
    triggers: TriggerHandle,
    auth: Arc<HttpAuth>,
}

impl AppState {
    pub fn new(
        repo: Arc<RepositoryState>,
        metrics: Arc<SyncMetrics>,
        triggers: TriggerHandle,
        auth: HttpAuth,
    ) -> Self {
        Self {
            repo,
            metrics,
            triggers,
            auth: Arc::new(auth),
        }
    }
}

#[derive(Serialize)]
struct WebhookResponse {
    message: &'static str,
    time: DateTime<Utc>,
    queued: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

#[derive(Serialize)]
struct CommitView {
    hash: String,
    date: DateTime<Utc>,
    message: String,
    author: String,
    email: String,
    reason: SyncReason,
    changes: Vec<ChangeRecord>,
}

#[derive(Serialize)]
struct StatusResponse {
    repository: String,
    branch: String,
    has_changes: bool,
    commit: Option<CommitView>,
}

/// Build the router
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/status", get(status_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/", get(index_handler))
        .route("/webhook", get(webhook_handler).post(webhook_handler))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind the listener up front so a bad address fails startup
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, DaemonError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| DaemonError::BindFailed {
            addr: addr.to_string(),
            source,
        })
}

/// Serve until `shutdown` fires, then drain in-flight requests
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP server listening");
    }
    if state.auth.basic.is_some() {
        info!("HTTP basic authentication enabled");
    }
    if state.auth.bearer.is_some() {
        info!("HTTP bearer token authentication enabled");
    }

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.recv().await;
    })
    .await?;

    info!("HTTP server stopped");
    Ok(())
}

async fn index_handler() -> Html<String> {
    let mut paths: Vec<&str> = ROUTES.iter().copied().filter(|p| *p != "/").collect();
    paths.sort_unstable();

    let mut body = String::from("<h1>Available endpoints:</h1>\n<ul>\n");
    for path in paths {
        body.push_str(&format!("<li><a href=\"{0}\">{0}</a></li>\n", path));
    }
    body.push_str("</ul>\n");
    Html(body)
}

async fn webhook_handler(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let client = peer
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    match state.triggers.request(client.as_str()) {
        TriggerStatus::Closed => {
            warn!(client = %client, "webhook received after scheduler stopped");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse {
                    error: "unavailable",
                    message: "synchronization is shutting down".to_string(),
                }),
            )
                .into_response()
        }
        status => {
            info!(client = %client, queued = status == TriggerStatus::Queued, "webhook received");
            Json(WebhookResponse {
                message: WEBHOOK_MESSAGE,
                time: Utc::now(),
                queued: status == TriggerStatus::Queued,
            })
            .into_response()
        }
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = prometheus::render(&state.repo, &state.metrics.snapshot());
    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
        )],
        body,
    )
        .into_response()
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let options = state.repo.options_ref();
    let commit = state.repo.snapshot().ok().map(|s| CommitView {
        hash: s.hash,
        date: s.timestamp,
        message: s.message,
        author: s.author_name,
        email: s.author_email,
        reason: s.reason,
        changes: s.changes,
    });

    Json(StatusResponse {
        repository: options.url().to_string(),
        branch: options.branch().to_string(),
        has_changes: state.repo.has_changes(),
        commit,
    })
}

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if authorized(&state.auth, request.headers()) {
        return next.run(request).await;
    }

    let mut response = (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    if state.auth.basic.is_some() {
        response.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static(BASIC_CHALLENGE),
        );
    }
    response
}

/// Whether the request carries any configured credential. Open when no
/// authentication is configured.
fn authorized(auth: &HttpAuth, headers: &HeaderMap) -> bool {
    if !auth.is_enabled() {
        return true;
    }
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };

    if let (Some((user, password)), Some(encoded)) = (&auth.basic, value.strip_prefix("Basic ")) {
        let decoded = BASE64
            .decode(encoded.trim())
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok());
        if let Some((u, p)) = decoded.as_deref().and_then(|d| d.split_once(':')) {
            return secure_eq(u, user) & secure_eq(p, password);
        }
        return false;
    }

    match (&auth.bearer, value.strip_prefix("Bearer ")) {
        (Some(token), Some(presented)) => secure_eq(presented, token),
        _ => false,
    }
}

/// Compare credentials without short-circuiting on the first differing byte
fn secure_eq(presented: &str, expected: &str) -> bool {
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
