//! Admin HTTP server: REST API for scheduled reports.
//!
//! Authentication is handled upstream (hosted auth / reverse proxy). The
//! optional `X-Admin-Id` header only attributes audit entries.

use std::sync::{Arc, Mutex};

use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, SubsecRound, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::db::PlatformDb;
use escrowise_core::error::{EscrowiseError, Result};
use escrowise_reports::schedule::deserialize_recipients;
use escrowise_reports::{Dispatcher, Frequency, ScheduledReport};

const ENTITY: &str = "scheduled_report";

/// Shared application state for the admin server.
pub struct AdminState {
    pub dispatcher: Arc<Dispatcher>,
    pub audit: Mutex<PlatformDb>,
}

impl AdminState {
    pub fn new(dispatcher: Arc<Dispatcher>, audit: PlatformDb) -> Self {
        Self {
            dispatcher,
            audit: Mutex::new(audit),
        }
    }

    /// Audit failures are logged, never surfaced to the caller.
    fn record_audit(
        &self,
        action: &str,
        entity_id: &str,
        old_value: Option<&Value>,
        new_value: Option<&Value>,
        performed_by: Option<&str>,
    ) {
        let Ok(db) = self.audit.lock() else {
            tracing::warn!("audit: database mutex poisoned, dropping '{action}' for {entity_id}");
            return;
        };
        if let Err(e) = db.log_action(action, ENTITY, entity_id, old_value, new_value, performed_by) {
            tracing::warn!("audit: failed to record '{action}' for {entity_id}: {e}");
        }
    }
}

/// Error response: `{"ok": false, "error": ...}` with a status per error kind.
pub struct ApiError(pub EscrowiseError);

impl From<EscrowiseError> for ApiError {
    fn from(err: EscrowiseError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            EscrowiseError::UnknownReportType(_)
            | EscrowiseError::InvalidParameters(_)
            | EscrowiseError::NoRecipients(_)
            | EscrowiseError::InvalidSchedule(_) => StatusCode::BAD_REQUEST,
            EscrowiseError::ReportNotFound(_) => StatusCode::NOT_FOUND,
            EscrowiseError::ReportInProgress(_) => StatusCode::CONFLICT,
            EscrowiseError::Notifier(_) => StatusCode::BAD_GATEWAY,
            EscrowiseError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            // Log the real error server-side, send a generic message.
            tracing::error!("[admin] {}", self.0);
            "An internal error occurred".to_string()
        } else {
            self.0.to_string()
        };
        (status, Json(json!({"ok": false, "error": message}))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Admin server.
pub struct AdminServer;

impl AdminServer {
    /// Build the router.
    pub fn router(state: Arc<AdminState>) -> Router {
        let cors_methods = [
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ];
        // Same-origin only unless ESCROWISE_CORS_ORIGINS lists allowed origins.
        let cors = match std::env::var("ESCROWISE_CORS_ORIGINS") {
            Ok(origins) if !origins.is_empty() => {
                let allowed: Vec<axum::http::HeaderValue> = origins
                    .split(',')
                    .filter_map(|s| s.trim().parse().ok())
                    .collect();
                CorsLayer::new()
                    .allow_origin(allowed)
                    .allow_methods(cors_methods)
                    .allow_headers(Any)
            }
            _ => CorsLayer::new().allow_methods(cors_methods).allow_headers(Any),
        };

        Router::new()
            .route("/health", get(health))
            .route("/api/admin/reports", post(generate_report))
            .route("/api/admin/reports/run-due", post(run_due))
            .route("/api/admin/reports/deliveries", get(list_deliveries))
            .route(
                "/api/admin/reports/scheduled",
                get(list_scheduled).post(create_scheduled),
            )
            .route(
                "/api/admin/reports/scheduled/{id}",
                get(get_scheduled)
                    .put(update_scheduled)
                    .delete(delete_scheduled),
            )
            .route("/api/admin/reports/scheduled/{id}/run", post(run_scheduled))
            .route("/api/admin/audit-logs", get(list_audit_logs))
            .route("/api/admin/audit-logs/stats", get(audit_stats))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(1_048_576)) // 1MB max request body
            .with_state(state)
    }

    /// Start the admin server.
    pub async fn start(state: Arc<AdminState>, host: &str, port: u16) -> Result<()> {
        let app = Self::router(state);
        let addr = format!("{host}:{port}");
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| EscrowiseError::Gateway(format!("Bind error on {addr}: {e}")))?;
        tracing::info!("🏢 Escrowise admin API running at http://{addr}");

        axum::serve(listener, app)
            .await
            .map_err(|e| EscrowiseError::Gateway(format!("Server error: {e}")))?;
        Ok(())
    }
}

fn performed_by(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-admin-id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn snapshot(report: &ScheduledReport) -> Value {
    serde_json::to_value(report).unwrap_or(Value::Null)
}

fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

fn parse_body<T: serde::de::DeserializeOwned>(body: Value) -> Result<T> {
    serde_json::from_value(body).map_err(|e| EscrowiseError::InvalidParameters(e.to_string()))
}

fn load(state: &AdminState, id: &str) -> Result<ScheduledReport> {
    state
        .dispatcher
        .store()
        .get_report(id)?
        .ok_or_else(|| EscrowiseError::ReportNotFound(id.to_string()))
}

/// Recipients as a comma-separated string or a list.
#[derive(Debug, Deserialize)]
struct Recipients(#[serde(deserialize_with = "deserialize_recipients")] Vec<String>);

#[derive(Debug, Deserialize)]
struct CreateReportRequest {
    report_type: String,
    #[serde(default)]
    parameters: Value,
    recipients: Recipients,
    frequency: String,
    #[serde(default)]
    is_active: Option<bool>,
    #[serde(default)]
    next_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
struct UpdateReportRequest {
    report_type: Option<String>,
    parameters: Option<Value>,
    recipients: Option<Recipients>,
    frequency: Option<String>,
    is_active: Option<bool>,
    next_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct AdhocReportRequest {
    report_type: String,
    #[serde(default)]
    parameters: Value,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
    entity_type: Option<String>,
}

fn require_recipients(recipients: &[String]) -> Result<()> {
    if recipients.is_empty() {
        return Err(EscrowiseError::InvalidParameters(
            "at least one recipient is required".into(),
        ));
    }
    Ok(())
}

fn empty_as_object(parameters: Value) -> Value {
    if parameters.is_null() { json!({}) } else { parameters }
}

// ── Handlers ───────────────────────────────────────────

async fn health(State(state): State<Arc<AdminState>>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "service": "escrowise",
        "notifier": state.dispatcher.notifier_name(),
    }))
}

async fn list_scheduled(State(state): State<Arc<AdminState>>) -> ApiResult<Json<Value>> {
    let reports = state.dispatcher.store().list_reports()?;
    Ok(Json(json!({"ok": true, "reports": reports})))
}

async fn get_scheduled(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let report = load(&state, &id)?;
    Ok(Json(json!({"ok": true, "report": report})))
}

async fn create_scheduled(
    State(state): State<Arc<AdminState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let req: CreateReportRequest = parse_body(body)?;
    let parameters = empty_as_object(req.parameters);
    state.dispatcher.generator().validate(&req.report_type, &parameters)?;
    require_recipients(&req.recipients.0)?;
    let frequency: Frequency = req.frequency.parse()?;

    let mut report =
        ScheduledReport::new(&req.report_type, parameters, req.recipients.0, frequency, now())?;
    if let Some(next) = req.next_run_at {
        report.next_run_at = next.trunc_subsecs(0);
    }
    if let Some(active) = req.is_active {
        report.is_active = active;
    }
    report.created_by = performed_by(&headers);
    state.dispatcher.store().insert_report(&report)?;

    tracing::info!("📅 Scheduled report created: {} ({})", report.id, report.report_type);
    state.record_audit("create", &report.id, None, Some(&snapshot(&report)), report.created_by.as_deref());
    Ok((StatusCode::CREATED, Json(json!({"ok": true, "report": report}))))
}

async fn update_scheduled(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let req: UpdateReportRequest = parse_body(body)?;
    let old = load(&state, &id)?;
    let mut report = old.clone();

    if let Some(report_type) = req.report_type {
        report.report_type = report_type;
    }
    if let Some(parameters) = req.parameters {
        report.parameters = empty_as_object(parameters);
    }
    state
        .dispatcher
        .generator()
        .validate(&report.report_type, &report.parameters)?;
    if let Some(recipients) = req.recipients {
        require_recipients(&recipients.0)?;
        report.recipients = recipients.0;
    }
    if let Some(frequency) = req.frequency {
        report.frequency = frequency.parse()?;
    }
    if let Some(active) = req.is_active {
        report.is_active = active;
    }
    if let Some(next) = req.next_run_at {
        report.next_run_at = next.trunc_subsecs(0);
    }
    report.updated_at = now();

    if !state.dispatcher.store().update_report(&report)? {
        return Err(EscrowiseError::ReportNotFound(id).into());
    }
    state.record_audit(
        "update",
        &id,
        Some(&snapshot(&old)),
        Some(&snapshot(&report)),
        performed_by(&headers).as_deref(),
    );
    Ok(Json(json!({"ok": true, "report": report})))
}

async fn delete_scheduled(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let old = load(&state, &id)?;
    if !state.dispatcher.store().delete_report(&id)? {
        return Err(EscrowiseError::ReportNotFound(id).into());
    }
    tracing::info!("🗑️ Scheduled report deleted: {id}");
    state.record_audit("delete", &id, Some(&snapshot(&old)), None, performed_by(&headers).as_deref());
    Ok(Json(json!({"ok": true})))
}

async fn run_scheduled(
    State(state): State<Arc<AdminState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<Value>> {
    let before = load(&state, &id)?;
    let report = state.dispatcher.run_report_now(&id).await?;
    state.record_audit(
        "run",
        &id,
        Some(&snapshot(&before)),
        Some(&snapshot(&report)),
        performed_by(&headers).as_deref(),
    );
    Ok(Json(json!({"ok": true, "report": report})))
}

async fn run_due(State(state): State<Arc<AdminState>>) -> Json<Value> {
    let summary = state.dispatcher.run_scheduled_reports(None).await;
    Json(json!({"ok": true, "summary": summary}))
}

async fn generate_report(
    State(state): State<Arc<AdminState>>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let req: AdhocReportRequest = parse_body(body)?;
    let generator = state.dispatcher.generator().clone();
    let parameters = empty_as_object(req.parameters);
    let payload = tokio::task::spawn_blocking(move || generator.generate(&req.report_type, &parameters))
        .await
        .map_err(|e| EscrowiseError::query("ad-hoc report", format!("generator task: {e}")))??;
    Ok(Json(json!({"ok": true, "report": payload})))
}

async fn list_deliveries(
    State(state): State<Arc<AdminState>>,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let limit = q.limit.unwrap_or(50).min(500);
    let deliveries = state.dispatcher.store().recent_deliveries(limit)?;
    Ok(Json(json!({"ok": true, "deliveries": deliveries})))
}

async fn list_audit_logs(
    State(state): State<Arc<AdminState>>,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let limit = q.limit.unwrap_or(100).min(1000);
    let entries = {
        let db = state
            .audit
            .lock()
            .map_err(|_| EscrowiseError::query("audit", "database mutex poisoned"))?;
        db.list_audit(limit, q.entity_type.as_deref())?
    };
    Ok(Json(json!({"ok": true, "entries": entries})))
}

async fn audit_stats(State(state): State<Arc<AdminState>>) -> ApiResult<Json<Value>> {
    let stats = {
        let db = state
            .audit
            .lock()
            .map_err(|_| EscrowiseError::query("audit", "database mutex poisoned"))?;
        db.audit_stats()?
    };
    Ok(Json(json!({"ok": true, "stats": stats})))
}
