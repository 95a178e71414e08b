//! HTTP gateway for the DomeKit runtime.
//!
//! Exposes the OpenAI-compatible chat endpoint plus the observability
//! surface: health, audit queries, an SSE live tail, derived security
//! alerts, and metrics.
//!
//! Built on Axum. Each chat request snapshots the manifest (and its
//! compiled policy engine) once and keeps that snapshot for its whole
//! lifetime; replacing the manifest atomically swaps the handles for
//! future requests only.

pub mod stdio;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use domekit_adapters::{OllamaAdapter, OllamaEmbedding};
use domekit_audit::{AuditLog, QueryFilter};
use domekit_core::adapter::{EmbeddingAdapter, ModelAdapter};
use domekit_core::audit::{AuditEntry, AuditEvent};
use domekit_core::message::ChatRequest;
use domekit_core::tool::ToolRegistry;
use domekit_core::vector::VectorDb;
use domekit_manifest::Manifest;
use domekit_policy::PolicyEngine;
use domekit_router::{CancelToken, RouterError, ToolRouter};
use domekit_vector::FileVectorStore;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Gateway construction failures — fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("policy error: {0}")]
    Policy(#[from] domekit_policy::PolicyError),

    #[error("audit log error: {0}")]
    Audit(#[from] domekit_core::error::AuditError),

    #[error("vector store error: {0}")]
    Vector(#[from] domekit_core::error::VectorError),

    #[error("bind error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared application state for the gateway.
pub struct GatewayState {
    manifest: RwLock<Arc<Manifest>>,
    policy: RwLock<Arc<PolicyEngine>>,
    pub registry: Arc<ToolRegistry>,
    pub audit: Arc<AuditLog>,
    pub adapter: Arc<dyn ModelAdapter>,
    chat_permits: Arc<Semaphore>,
    start_time: DateTime<Utc>,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    /// Assemble state from pre-built components (used directly by tests;
    /// production wiring goes through [`build_state`]).
    pub fn new(
        manifest: Arc<Manifest>,
        audit: Arc<AuditLog>,
        registry: Arc<ToolRegistry>,
        adapter: Arc<dyn ModelAdapter>,
    ) -> Result<SharedState, GatewayError> {
        let policy = Arc::new(PolicyEngine::new(manifest.clone())?);
        let permits = manifest.runtime.max_concurrent_requests.max(1);
        Ok(Arc::new(Self {
            manifest: RwLock::new(manifest),
            policy: RwLock::new(policy),
            registry,
            audit,
            adapter,
            chat_permits: Arc::new(Semaphore::new(permits)),
            start_time: Utc::now(),
        }))
    }

    /// The current manifest snapshot.
    pub async fn manifest(&self) -> Arc<Manifest> {
        self.manifest.read().await.clone()
    }

    /// The policy engine compiled from the current manifest snapshot.
    pub async fn policy(&self) -> Arc<PolicyEngine> {
        self.policy.read().await.clone()
    }

    /// Atomically install a new manifest. In-flight requests keep the
    /// snapshot they started with.
    pub async fn install_manifest(&self, manifest: Arc<Manifest>) -> Result<(), GatewayError> {
        let policy = Arc::new(PolicyEngine::new(manifest.clone())?);
        *self.policy.write().await = policy;
        *self.manifest.write().await = manifest;
        Ok(())
    }
}

/// Wire up all runtime components from a manifest.
pub fn build_state(manifest: Manifest) -> Result<SharedState, GatewayError> {
    let manifest = Arc::new(manifest);
    let audit = Arc::new(AuditLog::open(&manifest.audit.path)?);

    let adapter: Arc<dyn ModelAdapter> =
        Arc::new(OllamaAdapter::new(&manifest.models.base_url));

    let embedding: Option<Arc<dyn EmbeddingAdapter>> = match manifest.embedding.backend.as_str() {
        "ollama" => Some(Arc::new(OllamaEmbedding::new(
            &manifest.models.base_url,
            &manifest.embedding.model,
        ))),
        _ => None,
    };

    let vector: Option<Arc<dyn VectorDb>> = match manifest.vector_db.backend.as_str() {
        "file" => Some(Arc::new(FileVectorStore::open(&manifest.vector_db.path)?)),
        _ => None,
    };

    let registry = Arc::new(domekit_tools::default_registry(embedding, vector));
    GatewayState::new(manifest, audit, registry, adapter)
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
            origin
                .to_str()
                .map(|o| {
                    o.starts_with("http://localhost") || o.starts_with("http://127.0.0.1")
                })
                .unwrap_or(false)
        }))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/v1/chat/completions", post(chat_completions_handler))
        .route("/v1/domekit/health", get(health_handler))
        .route("/v1/domekit/audit/logs", get(audit_logs_handler))
        .route("/v1/domekit/audit/stream", get(audit_stream_handler))
        .route("/v1/domekit/audit/{request_id}", get(audit_by_request_handler))
        .route("/v1/domekit/security/alerts", get(security_alerts_handler))
        .route("/v1/domekit/metrics", get(metrics_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the gateway HTTP server.
pub async fn start(manifest: Manifest, host: &str, port: u16) -> Result<(), GatewayError> {
    let state = build_state(manifest)?;
    let app = build_router(state);

    let addr = format!("{host}:{port}");
    info!(addr = %addr, "gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

// ── Handlers ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ErrorResponse {
    error: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            request_id: None,
        }
    }
}

/// `POST /v1/chat/completions` — the OpenAI-compatible chat surface.
///
/// The body is parsed by hand so malformed requests are a 400 (not a
/// framework-shaped 422); adapter failures are a 500 carrying the
/// request_id for audit correlation.
async fn chat_completions_handler(
    State(state): State<SharedState>,
    body: axum::body::Bytes,
) -> Result<Json<domekit_core::message::ChatResponse>, (StatusCode, Json<ErrorResponse>)> {
    let request: ChatRequest = serde_json::from_slice(&body).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(format!("malformed request: {e}"))),
        )
    })?;

    if request.messages.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new("messages must not be empty")),
        ));
    }

    let _permit = state.chat_permits.clone().acquire_owned().await.map_err(|_| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new("runtime shutting down")),
        )
    })?;

    let policy = state.policy().await;
    let router = ToolRouter::new(
        policy,
        state.registry.clone(),
        state.audit.clone(),
        state.adapter.clone(),
    );

    match router.run(request, CancelToken::new()).await {
        Ok(response) => Ok(Json(response)),
        Err(err) => {
            error!(error = %err, "chat request failed");
            let request_id = err.request_id().map(|s| s.to_string());
            let body = match err {
                RouterError::Adapter { source, .. } => ErrorResponse {
                    error: format!("model backend failure: {source}"),
                    request_id,
                },
                RouterError::Audit(source) => ErrorResponse {
                    error: format!("audit log failure: {source}"),
                    request_id,
                },
            };
            Err((StatusCode::INTERNAL_SERVER_ERROR, Json(body)))
        }
    }
}

#[derive(Serialize)]
struct HealthManifest {
    app: String,
    app_version: String,
    policy_mode: String,
    allowed_tools: Vec<String>,
    model_backend: String,
    default_model: String,
}

#[derive(Serialize)]
struct HealthBackend {
    reachable: bool,
    models: Vec<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: f64,
    manifest: HealthManifest,
    audit_log_size_bytes: u64,
    audit_log_entries: usize,
    ollama: HealthBackend,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    let manifest = state.manifest().await;

    let models = state.adapter.list_models().await;
    let ollama = HealthBackend {
        reachable: models.is_ok(),
        models: models.unwrap_or_default(),
    };

    let uptime = (Utc::now() - state.start_time).num_milliseconds() as f64 / 1000.0;

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: (uptime * 10.0).round() / 10.0,
        manifest: HealthManifest {
            app: manifest.app.name.clone(),
            app_version: manifest.app.version.clone(),
            policy_mode: manifest.runtime.policy_mode.as_str().into(),
            allowed_tools: manifest.policy.tools.allow.clone(),
            model_backend: manifest.models.backend.clone(),
            default_model: manifest.models.default.clone(),
        },
        audit_log_size_bytes: state.audit.size_bytes(),
        audit_log_entries: state.audit.entry_count().unwrap_or(0),
        ollama,
    })
}

#[derive(Deserialize)]
struct LogsQuery {
    event: Option<String>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    request_id: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    100
}

#[derive(Serialize)]
struct LogsResponse {
    entries: Vec<AuditEntry>,
    total: usize,
}

async fn audit_logs_handler(
    State(state): State<SharedState>,
    Query(params): Query<LogsQuery>,
) -> Result<Json<LogsResponse>, (StatusCode, Json<ErrorResponse>)> {
    let event = match params.event.as_deref() {
        None => None,
        Some(raw) => Some(raw.parse::<AuditEvent>().map_err(|e| {
            (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(e)))
        })?),
    };

    let filter = QueryFilter {
        event,
        since: params.since,
        until: params.until,
        request_id: params.request_id,
        limit: Some(params.limit.clamp(1, 1000)),
        offset: params.offset,
    };

    let (entries, total) =
        domekit_audit::query_filtered(state.audit.path(), &filter).map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(e.to_string())),
            )
        })?;

    Ok(Json(LogsResponse { entries, total }))
}

async fn audit_by_request_handler(
    State(state): State<SharedState>,
    Path(request_id): Path<String>,
) -> Result<Json<Vec<AuditEntry>>, (StatusCode, Json<ErrorResponse>)> {
    state
        .audit
        .by_request(&request_id)
        .map(Json)
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new(e.to_string())),
            )
        })
}

/// `GET /v1/domekit/audit/stream` — Server-Sent Events live tail.
///
/// One JSON entry per `data:` frame, unbounded until the client
/// disconnects (or falls behind and is dropped by the log writer).
async fn audit_stream_handler(
    State(state): State<SharedState>,
) -> Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = state.audit.subscribe();
    let stream = ReceiverStream::new(rx).map(|entry| {
        let data = serde_json::to_string(&entry).unwrap_or_default();
        Ok(SseEvent::default().data(data))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Deserialize)]
struct AlertsQuery {
    since: Option<DateTime<Utc>>,
    #[serde(default = "default_alert_limit")]
    limit: usize,
}

fn default_alert_limit() -> usize {
    50
}

#[derive(Serialize)]
struct AlertsResponse {
    alerts: Vec<domekit_audit::Alert>,
    total: usize,
}

async fn security_alerts_handler(
    State(state): State<SharedState>,
    Query(params): Query<AlertsQuery>,
) -> Result<Json<AlertsResponse>, (StatusCode, Json<ErrorResponse>)> {
    let entries = domekit_audit::read_all(state.audit.path()).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(e.to_string())),
        )
    })?;
    let alerts =
        domekit_audit::detect_alerts(&entries, params.since, params.limit.clamp(1, 500));
    let total = alerts.len();
    Ok(Json(AlertsResponse { alerts, total }))
}

#[derive(Deserialize)]
struct MetricsQuery {
    since: Option<DateTime<Utc>>,
    #[serde(default = "default_window")]
    window: i64,
}

fn default_window() -> i64 {
    60
}

async fn metrics_handler(
    State(state): State<SharedState>,
    Query(params): Query<MetricsQuery>,
) -> Result<Json<domekit_audit::Metrics>, (StatusCode, Json<ErrorResponse>)> {
    let entries = domekit_audit::read_all(state.audit.path()).map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse::new(e.to_string())),
        )
    })?;
    let window = params.window.clamp(1, 3600);
    Ok(Json(domekit_audit::compute_metrics(
        &entries,
        params.since,
        window,
    )))
}
