//! HTTP gateway for the review front-end
//!
//! Axum router with optional bearer authentication. Session routes wrap the
//! review state holder and the workflow service; health and metrics are
//! plain JSON.

use axum::{
    Json, Router,
    body::Body,
    extract::{DefaultBodyLimit, MatchedPath, Multipart, Path, State},
    http::{HeaderMap, HeaderName, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
};
use serde::Deserialize;
use serde_json::json;
use std::{cmp::Ordering, collections::HashMap, sync::Arc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::clients::WorkflowEngine;
use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::report::{DOCX_CONTENT_TYPE, ReportData, render_docx_with, report_file_name};
use crate::review::{NeedPatch, SessionView, UseCasePatch};
use crate::schemas::UseCaseCategory;
use crate::sessions::SessionStore;
use crate::upload::{IncomingFile, UploadReport, UploadStore};
use crate::workflow::{StartAnalysis, WorkflowService};

const LATENCY_WINDOW: usize = 256;

/// Shared state for HTTP server
#[derive(Clone)]
pub struct HttpState {
    pub config: Arc<Config>,
    pub workflow: WorkflowService,
    pub uploads: UploadStore,
    pub metrics: Arc<Mutex<HttpMetrics>>,
}

impl HttpState {
    pub fn new(
        config: Arc<Config>,
        engine: Arc<dyn WorkflowEngine>,
        shutdown: CancellationToken,
    ) -> Self {
        let store = SessionStore::new(config.runtime.session_capacity);
        Self {
            workflow: WorkflowService::new(engine, store, &config, shutdown),
            uploads: UploadStore::new(&config.uploads),
            metrics: Arc::new(Mutex::new(HttpMetrics::new())),
            config,
        }
    }

    fn store(&self) -> &SessionStore {
        self.workflow.store()
    }
}

/// Metrics for HTTP server
#[derive(Debug, Clone)]
pub struct HttpMetrics {
    pub total_requests: u64,
    pub last_request_unix: u64,
    pub errors_total: u64,
    pub latencies: Vec<f64>, // ring buffer for p95
    pub routes_count: HashMap<String, u64>,
}

impl HttpMetrics {
    fn new() -> Self {
        Self {
            total_requests: 0,
            last_request_unix: unix_now(),
            errors_total: 0,
            latencies: Vec::with_capacity(LATENCY_WINDOW),
            routes_count: HashMap::new(),
        }
    }

    fn record(&mut self, route: String, latency_ms: f64, failed: bool) {
        self.latencies.push(latency_ms);
        if self.latencies.len() > LATENCY_WINDOW {
            self.latencies.remove(0);
        }
        if failed {
            self.errors_total = self.errors_total.saturating_add(1);
        }
        self.total_requests = self.total_requests.saturating_add(1);
        *self.routes_count.entry(route).or_insert(0) += 1;
        self.last_request_unix = unix_now();
    }
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Debug, Default, Deserialize)]
pub struct FeedbackRequest {
    #[serde(default)]
    pub feedback: Option<String>,
}

fn feedback_of(body: Option<Json<FeedbackRequest>>) -> Option<String> {
    body.and_then(|Json(b)| b.feedback)
}

fn parse_category(raw: &str) -> Result<UseCaseCategory> {
    UseCaseCategory::parse(raw).ok_or_else(|| GatewayError::InvalidParams {
        message: format!(
            "unknown use case category '{}', expected quick_win or structuration_ia",
            raw
        ),
    })
}

// ---- plain endpoints ---------------------------------------------------------

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    "ok"
}

/// Metrics endpoint
pub async fn metrics_handler(State(state): State<HttpState>) -> impl IntoResponse {
    let metrics = state.metrics.lock().await.clone();
    let active_sessions = state.store().len().await;

    // Compute latency stats
    let (avg_latency_ms, p95_latency_ms) = if metrics.latencies.is_empty() {
        (None, None)
    } else {
        let sum: f64 = metrics.latencies.iter().sum();
        let avg = sum / metrics.latencies.len() as f64;
        let mut sorted = metrics.latencies.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        let p95_idx = (sorted.len() as f64 * 0.95) as usize;
        let p95 = sorted.get(p95_idx.min(sorted.len() - 1)).copied();
        (Some(avg), p95)
    };

    let mut routes_vec: Vec<_> = metrics.routes_count.iter().collect();
    routes_vec.sort_by(|a, b| b.1.cmp(a.1));
    let routes_top_5: Vec<_> = routes_vec
        .into_iter()
        .take(5)
        .map(|(k, v)| json!({ "route": k, "count": v }))
        .collect();

    Json(json!({
        "metrics_version": "1",
        "total_requests": metrics.total_requests,
        "last_request_unix": metrics.last_request_unix,
        "active_sessions": active_sessions,
        "errors_total": metrics.errors_total,
        "avg_latency_ms": avg_latency_ms,
        "p95_latency_ms": p95_latency_ms,
        "routes_top_5": routes_top_5
    }))
}

pub async fn engine_health_handler(State(state): State<HttpState>) -> impl IntoResponse {
    let healthy = state.workflow.engine().health().await;
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "healthy": healthy,
            "url": state.config.engine.base_url,
            "assistant_id": state.config.engine.assistant_id,
        })),
    )
}

pub async fn upload_handler(
    State(state): State<HttpState>,
    mut multipart: Multipart,
) -> Result<Json<UploadReport>> {
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        // Plain form fields carry no file name
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field.bytes().await?;
        files.push(IncomingFile {
            file_name,
            bytes: bytes.to_vec(),
        });
    }
    let report = state.uploads.save_all(files).await?;
    Ok(Json(report))
}

// ---- sessions ----------------------------------------------------------------

pub async fn create_session_handler(
    State(state): State<HttpState>,
    Json(request): Json<StartAnalysis>,
) -> Response {
    let session = state.store().create().await;
    let id_header = (HeaderName::from_static("x-session-id"), session.id.to_string());
    match state.workflow.start_analysis(session.id, request).await {
        Ok(session) => (
            StatusCode::CREATED,
            [id_header],
            Json(SessionView::from(&session)),
        )
            .into_response(),
        Err(e) => ([id_header], e).into_response(),
    }
}

pub async fn get_session_handler(
    State(state): State<HttpState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>> {
    let session = state.store().get(id).await?;
    Ok(Json(SessionView::from(&session)))
}

pub async fn delete_session_handler(
    State(state): State<HttpState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.store().remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reset_session_handler(
    State(state): State<HttpState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>> {
    let session = state
        .store()
        .update(id, |s| {
            s.reset();
            Ok(s.clone())
        })
        .await?;
    Ok(Json(SessionView::from(&session)))
}

pub async fn refresh_session_handler(
    State(state): State<HttpState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>> {
    let session = state.workflow.refresh(id).await?;
    Ok(Json(SessionView::from(&session)))
}

pub async fn advance_session_handler(
    State(state): State<HttpState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>> {
    let session = state.workflow.advance(id).await?;
    Ok(Json(SessionView::from(&session)))
}

pub async fn patch_need_handler(
    State(state): State<HttpState>,
    Path((id, need_id)): Path<(Uuid, String)>,
    Json(patch): Json<NeedPatch>,
) -> Result<Json<SessionView>> {
    let session = state
        .store()
        .update(id, |s| {
            s.apply_need_patch(&need_id, &patch)?;
            Ok(s.clone())
        })
        .await?;
    Ok(Json(SessionView::from(&session)))
}

pub async fn validate_needs_handler(
    State(state): State<HttpState>,
    Path(id): Path<Uuid>,
    body: Option<Json<FeedbackRequest>>,
) -> Result<Json<SessionView>> {
    let session = state.workflow.submit_needs(id, feedback_of(body)).await?;
    Ok(Json(SessionView::from(&session)))
}

pub async fn regenerate_needs_handler(
    State(state): State<HttpState>,
    Path(id): Path<Uuid>,
    body: Option<Json<FeedbackRequest>>,
) -> Result<Json<SessionView>> {
    let session = state
        .workflow
        .regenerate_needs(id, feedback_of(body))
        .await?;
    Ok(Json(SessionView::from(&session)))
}

pub async fn unselect_validated_need_handler(
    State(state): State<HttpState>,
    Path((id, need_id)): Path<(Uuid, String)>,
) -> Result<Json<SessionView>> {
    let session = state
        .store()
        .update(id, |s| {
            s.unselect_validated_need(&need_id)?;
            Ok(s.clone())
        })
        .await?;
    Ok(Json(SessionView::from(&session)))
}

pub async fn patch_use_case_handler(
    State(state): State<HttpState>,
    Path((id, category, uc_id)): Path<(Uuid, String, String)>,
    Json(patch): Json<UseCasePatch>,
) -> Result<Json<SessionView>> {
    let category = parse_category(&category)?;
    let session = state
        .store()
        .update(id, |s| {
            s.edit_use_case(&uc_id, category, &patch)?;
            Ok(s.clone())
        })
        .await?;
    Ok(Json(SessionView::from(&session)))
}

pub async fn validate_use_cases_handler(
    State(state): State<HttpState>,
    Path(id): Path<Uuid>,
    body: Option<Json<FeedbackRequest>>,
) -> Result<Json<SessionView>> {
    let session = state
        .workflow
        .submit_use_cases(id, feedback_of(body))
        .await?;
    Ok(Json(SessionView::from(&session)))
}

pub async fn regenerate_use_cases_handler(
    State(state): State<HttpState>,
    Path(id): Path<Uuid>,
    body: Option<Json<FeedbackRequest>>,
) -> Result<Json<SessionView>> {
    let session = state
        .workflow
        .regenerate_use_cases(id, feedback_of(body))
        .await?;
    Ok(Json(SessionView::from(&session)))
}

pub async fn unselect_validated_use_case_handler(
    State(state): State<HttpState>,
    Path((id, category, uc_id)): Path<(Uuid, String, String)>,
) -> Result<Json<SessionView>> {
    let category = parse_category(&category)?;
    let session = state
        .store()
        .update(id, |s| {
            s.unselect_validated_use_case(&uc_id, category)?;
            Ok(s.clone())
        })
        .await?;
    Ok(Json(SessionView::from(&session)))
}

pub async fn report_handler(
    State(state): State<HttpState>,
    Path(id): Path<Uuid>,
) -> Result<Response> {
    let session = state.store().get(id).await?;
    let now = chrono::Utc::now();
    let data = ReportData::from_session(&session, now)?;
    let bytes = render_docx_with(&data, &state.config.report)?;
    let disposition = format!("attachment; filename=\"{}\"", report_file_name(now));
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, DOCX_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

// ---- router --------------------------------------------------------------------

fn unauthorized() -> Response {
    GatewayError::Unauthorized.into_response()
}

/// Build the full router. Exposed separately from `start_http_server` so
/// tests can drive it in-process.
pub fn build_router(state: HttpState) -> Router {
    // Room for several files per request
    let upload_limit = state
        .config
        .uploads
        .max_file_bytes
        .saturating_mul(10)
        .saturating_add(1024 * 1024);

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/engine/health", get(engine_health_handler))
        .route(
            "/api/upload",
            post(upload_handler).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/sessions", post(create_session_handler))
        .route(
            "/api/sessions/:id",
            get(get_session_handler).delete(delete_session_handler),
        )
        .route("/api/sessions/:id/reset", post(reset_session_handler))
        .route("/api/sessions/:id/refresh", post(refresh_session_handler))
        .route("/api/sessions/:id/advance", post(advance_session_handler))
        .route("/api/sessions/:id/needs/validate", post(validate_needs_handler))
        .route(
            "/api/sessions/:id/needs/regenerate",
            post(regenerate_needs_handler),
        )
        .route("/api/sessions/:id/needs/:need_id", patch(patch_need_handler))
        .route(
            "/api/sessions/:id/validated-needs/:need_id",
            delete(unselect_validated_need_handler),
        )
        .route(
            "/api/sessions/:id/use-cases/validate",
            post(validate_use_cases_handler),
        )
        .route(
            "/api/sessions/:id/use-cases/regenerate",
            post(regenerate_use_cases_handler),
        )
        .route(
            "/api/sessions/:id/use-cases/:category/:uc_id",
            patch(patch_use_case_handler),
        )
        .route(
            "/api/sessions/:id/validated-use-cases/:category/:uc_id",
            delete(unselect_validated_use_case_handler),
        )
        .route("/api/sessions/:id/report", get(report_handler))
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            |State(metrics): State<Arc<Mutex<HttpMetrics>>>,
             req: axum::http::Request<Body>,
             next: axum::middleware::Next| async move {
                let route = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(|p| p.as_str().to_string())
                    .unwrap_or_else(|| "unmatched".to_string());
                let start = std::time::Instant::now();
                let resp = next.run(req).await;
                let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                let failed = resp.status().is_client_error() || resp.status().is_server_error();
                metrics.lock().await.record(route, latency_ms, failed);
                resp
            },
        ))
        // Bearer auth layer; a missing token disables auth
        .layer(middleware::from_fn_with_state(
            state.config.runtime.bearer_token.clone(),
            |State(token): State<Option<String>>,
             req: axum::http::Request<Body>,
             next: axum::middleware::Next| async move {
                // Allow /health and CORS preflight without auth
                if req.uri().path() == "/health" || req.method() == axum::http::Method::OPTIONS {
                    return next.run(req).await;
                }
                let Some(expected) = token else {
                    return next.run(req).await;
                };
                let headers: &HeaderMap = req.headers();
                let header_ok = headers
                    .get(header::AUTHORIZATION)
                    .and_then(|h| h.to_str().ok())
                    .map(|v| v == format!("Bearer {}", expected))
                    .unwrap_or(false);
                if !header_ok {
                    return unauthorized();
                }
                next.run(req).await
            },
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers([header::CONTENT_DISPOSITION]),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server and run until `shutdown` is cancelled.
pub async fn start_http_server(
    config: Arc<Config>,
    engine: Arc<dyn WorkflowEngine>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    if config.runtime.bearer_token.is_none() {
        tracing::warn!("No bearer token configured; API routes are unauthenticated");
    }

    let bind = config.runtime.http_bind;
    let state = HttpState::new(config, engine, shutdown.clone());
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind HTTP listener: {}", e))?;

    tracing::info!("Starting HTTP gateway on {}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

    tracing::info!("HTTP gateway stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_keep_a_bounded_latency_window() {
        let mut m = HttpMetrics::new();
        for i in 0..(LATENCY_WINDOW + 10) {
            m.record("/health".into(), i as f64 + 1.0, i % 2 == 0);
        }
        assert_eq!(m.latencies.len(), LATENCY_WINDOW);
        assert_eq!(m.total_requests as usize, LATENCY_WINDOW + 10);
        assert_eq!(m.errors_total as usize, (LATENCY_WINDOW + 10) / 2);
        assert_eq!(m.routes_count["/health"] as usize, LATENCY_WINDOW + 10);
    }

    #[test]
    fn sub_millisecond_requests_are_sampled() {
        let mut m = HttpMetrics::new();
        m.record("/health".into(), 0.0, false);
        m.record("/health".into(), 0.25, false);
        assert_eq!(m.latencies, vec![0.0, 0.25]);
    }

    #[test]
    fn category_segments_are_validated() {
        assert_eq!(
            parse_category("quick_win").unwrap(),
            UseCaseCategory::QuickWin
        );
        assert!(matches!(
            parse_category("bogus"),
            Err(GatewayError::InvalidParams { .. })
        ));
    }
}
