use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use conduit_core::document::parse_flow_value;
use conduit_core::error::ConduitError;
use conduit_core::work::Resolution;

use crate::middleware::Authenticated;
use crate::state::AppState;

type ApiResult = Result<Json<Value>, (StatusCode, Json<Value>)>;

fn api_error(e: ConduitError) -> (StatusCode, Json<Value>) {
    let status = match &e {
        ConduitError::FlowNotFound(_) | ConduitError::ExecutionNotFound(_) => StatusCode::NOT_FOUND,
        ConduitError::FlowAlreadyRegistered(_) => StatusCode::CONFLICT,
        e if e.is_definition_error() => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": e.to_string() })))
}

// GET /api/health (no auth)
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// GET /api/flows
pub async fn list_flows(_auth: Authenticated, State(state): State<Arc<AppState>>) -> Json<Value> {
    let flows: Vec<Value> = state
        .orchestrator
        .flows()
        .await
        .iter()
        .map(|f| {
            json!({
                "id": f.id,
                "name": f.name,
                "version": f.version,
                "steps": f.steps.len(),
                "triggers": f.triggers,
            })
        })
        .collect();
    Json(json!({ "flows": flows }))
}

// POST /api/flows, body is a flow document
pub async fn register_flow(
    _auth: Authenticated,
    State(state): State<Arc<AppState>>,
    Json(doc): Json<Value>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let flow = parse_flow_value(doc).map_err(api_error)?;
    let flow_id = state
        .orchestrator
        .register_flow(flow)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(json!({ "flowId": flow_id }))))
}

// POST /api/flows/{id}/run, body is the trigger input
pub async fn run_flow(
    _auth: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<Value>>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let input = body.map(|Json(v)| v).unwrap_or(Value::Null);
    let execution_id = state
        .orchestrator
        .start(&id, input)
        .await
        .map_err(api_error)?;
    info!(flow_id = %id, execution_id = %execution_id, "Execution started via API");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "executionId": execution_id })),
    ))
}

/// POST /api/hooks/{*path}: starts every flow with a matching webhook trigger.
pub async fn webhook(
    _auth: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    body: Option<Json<Value>>,
) -> ApiResult {
    let payload = body.map(|Json(v)| v).unwrap_or(Value::Null);
    let started = state
        .orchestrator
        .handle_webhook(&path, payload)
        .await
        .map_err(|e| {
            warn!(path = %path, error = %e, "Webhook not handled");
            api_error(e)
        })?;
    Ok(Json(json!({ "executionIds": started })))
}

// POST /api/events/{name}
pub async fn publish_event(
    _auth: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Option<Json<Value>>,
) -> ApiResult {
    let payload = body.map(|Json(v)| v).unwrap_or(Value::Null);
    let started = state
        .orchestrator
        .publish_event(&name, payload)
        .await
        .map_err(api_error)?;
    Ok(Json(json!({ "executionIds": started })))
}

// GET /api/executions
pub async fn list_executions(
    _auth: Authenticated,
    State(state): State<Arc<AppState>>,
) -> Json<Value> {
    let executions = state.orchestrator.executions().await;
    Json(json!({ "executions": executions }))
}

// GET /api/executions/{id}
pub async fn get_execution(
    _auth: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult {
    let snapshot = state
        .orchestrator
        .get_execution(&id)
        .await
        .map_err(api_error)?;
    Ok(Json(json!(snapshot)))
}

// GET /api/metrics
pub async fn metrics(_auth: Authenticated, State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!(state.orchestrator.get_execution_metrics().await))
}

// GET /api/work-items
pub async fn list_work_items(
    _auth: Authenticated,
    State(state): State<Arc<AppState>>,
) -> Json<Value> {
    let items = state.orchestrator.queue().pending_items().await;
    Json(json!({ "workItems": items }))
}

#[derive(Deserialize)]
pub struct ResolveBody {
    pub approved: bool,
    #[serde(default = "default_approver")]
    pub approver: String,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

fn default_approver() -> String {
    "api".to_string()
}

// POST /api/work-items/{id}/resolve
pub async fn resolve_work_item(
    _auth: Authenticated,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ResolveBody>,
) -> ApiResult {
    let mut resolution = if body.approved {
        Resolution::approve(body.approver)
    } else {
        Resolution::reject(body.approver, body.comments.clone().unwrap_or_default())
    };
    if body.comments.is_some() {
        resolution.comments = body.comments;
    }
    if let Some(data) = body.data {
        resolution = resolution.with_data(data);
    }

    if !state.orchestrator.resolve_work_item(&id, resolution).await {
        return Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("No pending work item: {}", id) })),
        ));
    }
    Ok(Json(json!({ "resolved": id })))
}
