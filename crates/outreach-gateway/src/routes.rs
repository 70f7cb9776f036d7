//! API route handlers for the gateway.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use outreach_core::error::OutreachError;
use outreach_core::{AuthContext, LeadStatus};
use outreach_scheduler::ProcessQueueRequest;

use super::server::AppState;

/// `{"ok": false, "error": ...}` with the given status.
pub fn json_error(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(json!({"ok": false, "error": error.into()}))).into_response()
}

fn error_response(e: &OutreachError) -> Response {
    let status = match e {
        OutreachError::NotFound(_) => StatusCode::NOT_FOUND,
        OutreachError::Invalid(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!("Request failed: {e}");
    }
    json_error(status, e.to_string())
}

/// Serialize `value` as an object and mark it `ok: true`.
fn ok_json<T: Serialize>(value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(Value::Object(mut map)) => {
            map.insert("ok".into(), Value::Bool(true));
            Json(Value::Object(map)).into_response()
        }
        Ok(other) => Json(json!({"ok": true, "data": other})).into_response(),
        Err(e) => json_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Caller context from the request: bearer token and `X-Org-Id`.
pub fn auth_context(headers: &HeaderMap) -> AuthContext {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    let bearer = header("authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());
    AuthContext::new(bearer, header("x-org-id").map(String::from))
}

/// Parse an optional JSON body; an empty body means defaults.
fn optional_body<T: for<'de> Deserialize<'de> + Default>(body: &Bytes) -> Result<T, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| json_error(StatusCode::BAD_REQUEST, format!("Invalid JSON body: {e}")))
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "outreach",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Run one batch of due schedules.
pub async fn process_queue(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let req: ProcessQueueRequest = match optional_body(&body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let ctx = auth_context(&headers);
    match state.runner.run(&ctx, &req).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => {
            tracing::error!("Process queue failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "error": e.to_string()})),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    #[serde(alias = "leadId")]
    pub lead_id: String,
}

/// Enroll a lead at the first step of a cadence.
pub async fn enroll_lead(
    State(state): State<Arc<AppState>>,
    Path(cadence_id): Path<String>,
    Json(body): Json<EnrollRequest>,
) -> Response {
    if body.lead_id.trim().is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "lead_id is required");
    }
    match state.automation.enroll_lead(&cadence_id, body.lead_id.trim()) {
        Ok(lead) => ok_json(&lead),
        Err(e) => error_response(&e),
    }
}

/// Schedule every step for every active lead of an automated cadence.
pub async fn start_automation(
    State(state): State<Arc<AppState>>,
    Path(cadence_id): Path<String>,
) -> Response {
    match state.automation.start_automation(&cadence_id, chrono::Utc::now()) {
        Ok(summary) => ok_json(&summary),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CancelRequest {
    /// `replied` or `removed`; defaults to `removed`.
    #[serde(alias = "reason")]
    pub status: Option<String>,
}

/// Take a lead out of a cadence and cancel its open schedules.
pub async fn cancel_lead(
    State(state): State<Arc<AppState>>,
    Path((cadence_id, lead_id)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let req: CancelRequest = match optional_body(&body) {
        Ok(r) => r,
        Err(resp) => return resp,
    };
    let raw = req.status.as_deref().unwrap_or("removed");
    let Some(status) = LeadStatus::parse(raw) else {
        return json_error(StatusCode::BAD_REQUEST, format!("Unknown lead status: {raw}"));
    };
    match state.automation.cancel_lead(&cadence_id, &lead_id, status) {
        Ok(summary) => ok_json(&summary),
        Err(e) => error_response(&e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub limit: Option<usize>,
}

/// Most recent activity log entries, newest first.
pub async fn recent_activity(
    State(state): State<Arc<AppState>>,
    Query(q): Query<ActivityQuery>,
) -> Response {
    let limit = q.limit.unwrap_or(50).clamp(1, 500);
    match state.db.recent_activity(limit) {
        Ok(entries) => Json(json!({"ok": true, "activity": entries})).into_response(),
        Err(e) => error_response(&e),
    }
}
