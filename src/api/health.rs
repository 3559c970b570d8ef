//! Composite health check for the agent system.

use axum::Json;
use axum::extract::State;
use chrono::{Duration, Utc};

use crate::agents::AgentStatus;
use crate::api::AppState;
use crate::error::DatabaseError;

/// Three checks: LLM configured, at least one active agent, and at least
/// one successful run in the last 24 hours. All green is `healthy`,
/// anything less is `degraded`. A store failure is reported as `error`
/// in the body rather than a 500, so monitors can tell a broken system
/// from an unreachable endpoint.
pub async fn agent_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    match run_checks(&state).await {
        Ok(body) => Json(body),
        Err(e) => {
            tracing::error!(error = %e, "health checks failed");
            Json(serde_json::json!({
                "success": false,
                "status": "error",
                "error": e.to_string(),
            }))
        }
    }
}

async fn run_checks(state: &AppState) -> Result<serde_json::Value, DatabaseError> {
    let openai_configured = state.llm.is_configured();
    let active_agents = state
        .store
        .list_agents(Some(AgentStatus::Active), None)
        .await?
        .len();
    let recent_success = state
        .store
        .has_successful_run_since(Utc::now() - Duration::hours(24))
        .await?;

    let healthy = openai_configured && active_agents > 0 && recent_success;
    let status = if healthy { "healthy" } else { "degraded" };

    Ok(serde_json::json!({
        "success": true,
        "status": status,
        "checks": {
            "openai_configured": openai_configured,
            "active_agents": active_agents,
            "recent_successful_run": recent_success,
        },
    }))
}
