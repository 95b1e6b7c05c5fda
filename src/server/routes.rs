//! Route handlers, grouped the way `mcp_http_adapter.rs` groups its
//! `/tools/*` and `/resources/*` routes: one `Router` builder function
//! per concern, merged together in [`super::build_router`].

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;

use crate::core::a2a_endpoint::{self, JsonRpcRequest};
use crate::core::admission::AdmissionDecision;
use crate::core::errors::ErrorKind;
use crate::core::model::{AgentSpec, Thread, ThreadOwner, ThreadStatus};
use crate::core::workflow::human_gate::GateDecision;

use super::AppState;

fn error_response(kind: ErrorKind, message: String) -> axum::response::Response {
    let status = match kind {
        ErrorKind::AdmissionError => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::ToolNotAvailable | ErrorKind::ProtocolError | ErrorKind::ConfigError => StatusCode::BAD_REQUEST,
        ErrorKind::BudgetExceeded => StatusCode::PAYMENT_REQUIRED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({"error": {"kind": kind, "message": message}}))).into_response()
}

fn bearer_token(headers: &HeaderMap) -> &str {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("")
}

/// Runs the Admission Layer against the caller's bearer token and
/// message size, surfacing a soft-budget warning as a response header
/// rather than rejecting the request outright.
async fn admit(
    state: &AppState,
    headers: &HeaderMap,
    message_bytes: usize,
) -> Result<(crate::core::admission::CallerIdentity, Option<String>), axum::response::Response> {
    let decision = state.admission.admit(bearer_token(headers), message_bytes, Utc::now().date_naive()).await;
    match decision {
        AdmissionDecision::Admit { identity } => Ok((identity, None)),
        AdmissionDecision::AdmitWithWarning { identity, warning } => Ok((identity, Some(warning))),
        AdmissionDecision::Rejected { kind, message } => Err(error_response(kind, message)),
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub thread_id: Option<String>,
}

/// `POST /chat/{agentId}`: admits the caller, then streams the
/// Streaming Facade's wire frames back as a Server-Sent Events body —
/// the line-delimited-JSON wire protocol carried over SSE's `data:`
/// framing, same content, different envelope.
async fn chat(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ChatRequest>,
) -> axum::response::Response {
    let (_identity, warning) = match admit(&state, &headers, body.message.len()).await {
        Ok(ok) => ok,
        Err(resp) => return resp,
    };
    let agent = match state.persistence.get_agent_spec(&agent_id).await {
        Ok(Some(agent)) => agent,
        Ok(None) => return error_response(ErrorKind::ToolNotAvailable, "unknown agent".into()),
        Err(e) => return error_response(e.kind, e.redacted_message()),
    };
    let thread_id = body.thread_id.unwrap_or_else(crate::core::ids::thread_id);
    let handle = state.facade.stream(agent, thread_id, body.message, None);

    let event_stream = ReceiverStream::new(handle.receiver).map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok::<Event, std::convert::Infallible>(Event::default().data(data))
    });

    let mut response = Sse::new(event_stream).keep_alive(axum::response::sse::KeepAlive::new().interval(std::time::Duration::from_secs(15))).into_response();
    if let Some(warning) = warning {
        if let Ok(value) = axum::http::HeaderValue::from_str(&warning) {
            response.headers_mut().insert("x-budget-warning", value);
        }
    }
    response
}

pub fn chat_routes() -> Router<Arc<AppState>> {
    Router::new().route("/chat/{agent_id}", post(chat))
}

#[derive(Debug, Deserialize)]
pub struct WorkflowChatRequest {
    pub message: String,
    pub thread_id: String,
    #[serde(default)]
    pub max_handoffs: Option<usize>,
}

/// `POST /workflows/{workflowId}/chat`. This crate doesn't persist
/// a distinct `Workflow` entity (see DESIGN.md): `workflowId` names an
/// `AgentSpec` whose
/// `is_coordinator=true`; its specialist set is read off the
/// coordinator's own tool list, and it always runs the sequential
/// handoff pattern — the parallel and human-gate patterns are
/// composed in-process by callers that need them, not selected by this
/// route.
async fn workflow_chat(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<WorkflowChatRequest>,
) -> axum::response::Response {
    let (_identity, _warning) = match admit(&state, &headers, body.message.len()).await {
        Ok(ok) => ok,
        Err(resp) => return resp,
    };
    let coordinator = match state.persistence.get_agent_spec(&workflow_id).await {
        Ok(Some(agent)) if agent.is_coordinator => agent,
        Ok(Some(_)) => return error_response(ErrorKind::ConfigError, "agent is not a coordinator".into()),
        Ok(None) => return error_response(ErrorKind::ToolNotAvailable, "unknown workflow".into()),
        Err(e) => return error_response(e.kind, e.redacted_message()),
    };

    let ctx = crate::core::workflow::WorkflowContext {
        llm: state.llm.clone(),
        tool_registry: state.tool_registry.clone(),
        persistence: state.persistence.clone(),
        events: Arc::new(crate::core::event::NoopEventHandler),
        config: state.config.clone(),
    };

    let specialists: Vec<AgentSpec> = {
        let mut out = Vec::new();
        for tool in coordinator.tools.iter().filter(|t| t.enabled) {
            if let Ok(Some(spec)) = state.persistence.get_agent_spec(&tool.target).await {
                out.push(spec);
            }
        }
        out
    };

    let max_handoffs = body.max_handoffs.unwrap_or(10);
    let workflow = crate::core::workflow::sequential::SequentialWorkflow::new(ctx, coordinator, specialists, vec![], max_handoffs);
    match workflow.run(&body.thread_id, &body.message, None).await {
        Ok(outcome) => Json(json!({
            "runId": outcome.coordinator_output.run_id,
            "message": outcome.coordinator_output.final_message,
            "handoffHistory": outcome.handoff_history,
        }))
        .into_response(),
        Err(e) => error_response(e.kind, e.redacted_message()),
    }
}

pub fn workflow_routes() -> Router<Arc<AppState>> {
    Router::new().route("/workflows/{workflow_id}/chat", post(workflow_chat))
}

#[derive(Debug, Deserialize)]
pub struct HumanGateAction {
    pub token: String,
    pub decision: GateDecision,
    #[serde(default)]
    pub overrides: Option<Value>,
}

/// `POST /human-gate/action`: resolves a pending gate.
async fn human_gate_action(State(state): State<Arc<AppState>>, Json(body): Json<HumanGateAction>) -> axum::response::Response {
    match state.gates.resolve(&body.token, body.decision, body.overrides).await {
        Ok(crate::core::workflow::human_gate::GateOutcome::Proceed(value)) => Json(json!({"ok": true, "result": value})).into_response(),
        Ok(crate::core::workflow::human_gate::GateOutcome::Rejected) => Json(json!({"ok": true, "result": null, "rejected": true})).into_response(),
        Err(e) => error_response(e.kind, e.redacted_message()),
    }
}

pub fn human_gate_routes() -> Router<Arc<AppState>> {
    Router::new().route("/human-gate/action", post(human_gate_action))
}

/// `GET|PUT|DELETE /agents/{id}`, `GET /agents`. Admin CRUD; write
/// operations require `CallerIdentity::is_admin()`.
async fn list_agents(State(state): State<Arc<AppState>>) -> axum::response::Response {
    match state.persistence.list_agent_specs().await {
        Ok(specs) => Json(json!({"agents": specs})).into_response(),
        Err(e) => error_response(e.kind, e.redacted_message()),
    }
}

async fn get_agent(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> axum::response::Response {
    match state.persistence.get_agent_spec(&id).await {
        Ok(Some(spec)) => Json(spec).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({"error": "not_found"}))).into_response(),
        Err(e) => error_response(e.kind, e.redacted_message()),
    }
}

async fn put_agent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(mut spec): Json<AgentSpec>,
) -> axum::response::Response {
    let (identity, _) = match admit(&state, &headers, 0).await {
        Ok(ok) => ok,
        Err(resp) => return resp,
    };
    if !identity.is_admin() {
        return error_response(ErrorKind::AdmissionError, "admin role required".into());
    }
    spec.id = id;
    match state.persistence.put_agent_spec(spec.clone()).await {
        Ok(()) => Json(spec).into_response(),
        Err(e) => error_response(e.kind, e.redacted_message()),
    }
}

async fn delete_agent(State(state): State<Arc<AppState>>, Path(id): Path<String>, headers: HeaderMap) -> axum::response::Response {
    let (identity, _) = match admit(&state, &headers, 0).await {
        Ok(ok) => ok,
        Err(resp) => return resp,
    };
    if !identity.is_admin() {
        return error_response(ErrorKind::AdmissionError, "admin role required".into());
    }
    match state.persistence.delete_agent_spec(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e.kind, e.redacted_message()),
    }
}

pub fn agent_admin_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/agents", get(list_agents))
        .route("/agents/{id}", get(get_agent).put(put_agent).delete(delete_agent))
}

#[derive(Debug, Deserialize)]
pub struct ThreadListQuery {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// `GET /agents/{id}/threads`, `POST /agents/{id}/threads`,
/// `GET|DELETE /agents/{id}/threads/{threadId}`.
async fn list_threads_for_agent(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Query(q): Query<ThreadListQuery>,
) -> axum::response::Response {
    match state.persistence.list_threads(&agent_id, Some(&agent_id), q.limit.unwrap_or(20), q.offset.unwrap_or(0)).await {
        Ok(page) => Json(json!({
            "threads": page.threads,
            "total": page.total,
            "page": page.page,
            "pageSize": page.page_size,
        }))
        .into_response(),
        Err(e) => error_response(e.kind, e.redacted_message()),
    }
}

async fn create_thread_for_agent(State(state): State<Arc<AppState>>, Path(agent_id): Path<String>) -> axum::response::Response {
    let now = Utc::now();
    let thread = Thread {
        id: crate::core::ids::thread_id(),
        owner_id: agent_id.clone(),
        target: ThreadOwner::Agent { agent_id },
        title: String::new(),
        created_at: now,
        last_message_at: now,
        message_count: 0,
        status: ThreadStatus::Active,
    };
    match state.persistence.put_thread(thread.clone()).await {
        Ok(()) => Json(thread).into_response(),
        Err(e) => error_response(e.kind, e.redacted_message()),
    }
}

async fn get_thread(State(state): State<Arc<AppState>>, Path((_agent_id, thread_id)): Path<(String, String)>) -> axum::response::Response {
    match state.persistence.get_thread(&thread_id).await {
        Ok(Some(thread)) => Json(thread).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({"error": "not_found"}))).into_response(),
        Err(e) => error_response(e.kind, e.redacted_message()),
    }
}

async fn delete_thread(State(state): State<Arc<AppState>>, Path((_agent_id, thread_id)): Path<(String, String)>) -> axum::response::Response {
    match state.persistence.delete_thread(&thread_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e.kind, e.redacted_message()),
    }
}

pub fn thread_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/agents/{agent_id}/threads", get(list_threads_for_agent).post(create_thread_for_agent))
        .route("/agents/{agent_id}/threads/{thread_id}", get(get_thread).delete(delete_thread))
}

#[derive(Debug, Deserialize)]
pub struct AgentCardQuery {
    pub agent: Option<String>,
}

/// `GET /.well-known/agent-card.json?agent={id}`, `GET
/// /.well-known/agents.json`, `POST /a2a`.
async fn agent_card(State(state): State<Arc<AppState>>, Query(q): Query<AgentCardQuery>) -> axum::response::Response {
    let Some(agent_id) = q.agent else {
        return error_response(ErrorKind::ProtocolError, "missing 'agent' query parameter".into());
    };
    match state.persistence.get_agent_spec(&agent_id).await {
        Ok(Some(agent)) => Json(a2a_endpoint::agent_card(&agent, &state.base_url, &[])).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(json!({"error": "not_found"}))).into_response(),
        Err(e) => error_response(e.kind, e.redacted_message()),
    }
}

async fn agents_directory(State(state): State<Arc<AppState>>) -> axum::response::Response {
    match a2a_endpoint::agents_directory(state.persistence.as_ref(), &state.base_url).await {
        Ok(directory) => Json(directory).into_response(),
        Err(e) => error_response(e.kind, e.redacted_message()),
    }
}

#[derive(Debug, Deserialize)]
pub struct A2aQuery {
    pub agent: String,
}

async fn a2a_dispatch(
    State(state): State<Arc<AppState>>,
    Query(q): Query<A2aQuery>,
    Json(request): Json<JsonRpcRequest>,
) -> axum::response::Response {
    let agent = match state.persistence.get_agent_spec(&q.agent).await {
        Ok(Some(agent)) => agent,
        Ok(None) => {
            return Json(serde_json::json!({
                "jsonrpc": "2.0",
                "id": request.id,
                "error": {"code": -32601, "message": "unknown agent"},
            }))
            .into_response()
        }
        Err(e) => return error_response(e.kind, e.redacted_message()),
    };
    Json(state.a2a.handle(&agent, request).await).into_response()
}

pub fn a2a_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/.well-known/agent-card.json", get(agent_card))
        .route("/.well-known/agents.json", get(agents_directory))
        .route("/a2a", post(a2a_dispatch))
}

/// `GET /health`: dependency status map. This crate's only
/// out-of-process dependency is the configured LLM provider, which it
/// cannot probe without spending a real request — reported as
/// `"unknown"` rather than faked.
async fn health() -> axum::response::Response {
    Json(json!({
        "status": "ok",
        "dependencies": {
            "persistence": "ok",
            "llm_provider": "unknown",
        },
    }))
    .into_response()
}

pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}
