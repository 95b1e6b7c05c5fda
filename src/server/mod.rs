//! Caller-facing HTTP surface, feature-gated behind `server`.
//!
//! A `Router` built from small per-route closures over
//! `State<Arc<AppState>>`, bound with `TcpListener` +
//! `tokio::spawn(axum::serve(...))`. This crate picks axum directly
//! rather than type-erasing its transport behind a swappable-framework
//! trait, since every external interface here is already an HTTP
//! surface with no other transport to carry forward.

pub mod routes;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;

use crate::core::a2a_endpoint::A2aEndpoint;
use crate::core::admission::AdmissionLayer;
use crate::core::config::RuntimeConfig;
use crate::core::llm_driver::LlmDriver;
use crate::core::persistence::PersistenceGateway;
use crate::core::streaming::StreamingFacade;
use crate::core::tool_protocol::ToolRegistry;
use crate::core::workflow::human_gate::HumanGateStore;

/// Everything a route handler needs, shared across the whole server the
/// same way `mcp_http_adapter.rs` threads `protocol`/`event_handler`
/// through every closure — bundled into one `Arc<AppState>` `State`
/// extractor instead of cloning each ingredient per route.
pub struct AppState {
    pub persistence: Arc<dyn PersistenceGateway>,
    pub llm: Arc<dyn LlmDriver>,
    pub tool_registry: Arc<ToolRegistry>,
    pub config: RuntimeConfig,
    pub facade: Arc<StreamingFacade>,
    pub a2a: Arc<A2aEndpoint>,
    pub admission: Arc<AdmissionLayer>,
    pub gates: Arc<HumanGateStore>,
    pub base_url: String,
}

/// Builds the full router: the caller-facing chat/workflow/admin
/// surface plus the A2A peer surface, with CORS applied the way an
/// operator fronting this with a browser-based admin UI would expect.
/// CORS carries no domain logic of its own and lives only here in
/// `src/server`.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::chat_routes())
        .merge(routes::workflow_routes())
        .merge(routes::human_gate_routes())
        .merge(routes::agent_admin_routes())
        .merge(routes::thread_routes())
        .merge(routes::a2a_routes())
        .merge(routes::health_routes())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
