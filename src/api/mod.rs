//! Admin and cron HTTP surface.
//!
//! Admin routes sit behind bearer-token auth against `api_keys`; the cron
//! routes behind the deployment's shared secret. All bodies are JSON with a
//! `success` flag; errors carry the status-code taxonomy in `error.rs`.

pub mod agents;
pub mod auth;
pub mod charts;
pub mod cron;
pub mod health;
pub mod proposals;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agents::HandlerRegistry;
use crate::config::Config;
use crate::db::Database;
use crate::llm::LlmClient;
use crate::notify::SlackApi;

/// Shared state for the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Database>,
    pub handlers: Arc<HandlerRegistry>,
    pub llm: Arc<LlmClient>,
    /// Absent when SLACK_BOT_TOKEN is unset; the notification cron then
    /// reports itself unconfigured instead of draining.
    pub slack: Option<Arc<dyn SlackApi>>,
    pub config: Arc<Config>,
}

/// Build the axum router.
pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/api/agents", get(agents::list_agents))
        .route("/api/agents/runs", get(agents::list_runs))
        .route("/api/agents/charts", get(charts::charts))
        .route("/api/agents/health", get(health::agent_health))
        .route("/api/agents/proposals", get(proposals::list_proposals))
        .route(
            "/api/agents/proposals/bulk-resolve",
            post(proposals::bulk_resolve),
        )
        .route(
            "/api/agents/proposals/{id}/review",
            post(proposals::review_proposal),
        )
        .route("/api/agents/{agent_id}", get(agents::agent_detail))
        .route("/api/agents/{agent_id}/trigger", post(agents::trigger_agent))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::admin_auth_middleware,
        ));

    let cron = Router::new()
        .route("/api/cron/agent-dispatcher", get(cron::dispatcher))
        .route("/api/cron/agent-budget-reset", get(cron::budget_reset))
        .route("/api/cron/agent-notifications", get(cron::notifications))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::cron_auth_middleware,
        ));

    Router::new()
        .merge(admin)
        .merge(cron)
        // Dual-auth route: checked inside the handler.
        .route("/api/agents/events", post(agents::publish_event))
        // Unauthenticated liveness probe.
        .route("/health", get(liveness))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn liveness() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Bind and serve until shutdown.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "admin API listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
