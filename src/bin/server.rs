//! `agentcore-server`: binds the Agent Execution Core to HTTP.
//!
//! `env_logger::Builder::from_env(...).init()` then `#[tokio::main]`:
//! build the persistence/driver/config trio, seed the default agent
//! catalog, then bind and serve.

use std::net::SocketAddr;
use std::sync::Arc;

use agentcore::core::admission::{AdmissionLayer, StaticTokenIdentityProvider};
use agentcore::core::config::RuntimeConfig;
use agentcore::core::llm_driver::{LlmDriver, OpenAiDriver};
use agentcore::core::persistence::InMemoryPersistence;
use agentcore::core::seeding;
use agentcore::core::streaming::{InMemoryTraceSink, StreamingFacade};
use agentcore::core::tool_protocol::ToolRegistry;
use agentcore::core::workflow::human_gate::HumanGateStore;
use agentcore::server::{build_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RuntimeConfig::from_env();
    let persistence = InMemoryPersistence::new();
    let seeded = seeding::seed_default_agents(persistence.as_ref()).await?;
    log::info!("seeded {} default agent(s)", seeded);

    let model = std::env::var("AGENTCORE_MODEL").unwrap_or_else(|_| "gpt-4.1".to_string());
    let llm: Arc<dyn LlmDriver> = Arc::new(OpenAiDriver::from_env(model)?);

    let tool_registry = Arc::new(ToolRegistry::new());
    let trace_sink = InMemoryTraceSink::new(256);
    let facade = Arc::new(StreamingFacade::new(
        llm.clone(),
        tool_registry.clone(),
        persistence.clone(),
        trace_sink,
        config.clone(),
    ));

    let a2a_runner = Arc::new(agentcore::core::runner::AgentRunner::new(
        llm.clone(),
        tool_registry.clone(),
        persistence.clone(),
        Arc::new(agentcore::core::event::NoopEventHandler),
        config.clone(),
    ));
    let a2a = Arc::new(agentcore::core::a2a_endpoint::A2aEndpoint::new(a2a_runner, persistence.clone()));

    let identity_provider: Arc<dyn agentcore::core::admission::IdentityProvider> = Arc::new(
        StaticTokenIdentityProvider::new().with_token(
            std::env::var("AGENTCORE_ADMIN_TOKEN").unwrap_or_else(|_| "dev-admin-token".to_string()),
            agentcore::core::admission::CallerIdentity {
                user_id: "admin".to_string(),
                roles: vec![agentcore::core::admission::Role::Admin],
            },
        ),
    );
    let rate_limit_per_minute = std::env::var("AGENTCORE_RATE_LIMIT_PER_MINUTE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(60);
    let admission = Arc::new(AdmissionLayer::new(identity_provider, persistence.clone(), config.clone(), rate_limit_per_minute));

    let base_url = std::env::var("AGENTCORE_BASE_URL").unwrap_or_else(|_| "http://localhost:8080".to_string());

    let state = Arc::new(AppState {
        persistence,
        llm,
        tool_registry,
        config,
        facade,
        a2a,
        admission,
        gates: HumanGateStore::new(),
        base_url,
    });

    let app = build_router(state);

    let addr: SocketAddr = std::env::var("AGENTCORE_BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("agentcore listening on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
