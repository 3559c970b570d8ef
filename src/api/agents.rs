//! Agent registry endpoints: listing, detail, manual trigger, run history
//! and event fan-out.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use serde::Deserialize;

use crate::agents::{AgentStatus, TriggerType, registry, runs};
use crate::api::{AppState, auth};
use crate::error::{AgentError, ApiError};

const RUN_LIST_CAP: i64 = 200;

#[derive(Deserialize, Default)]
pub struct AgentListQuery {
    pub status: Option<String>,
    pub cluster: Option<String>,
}

pub async fn list_agents(
    State(state): State<AppState>,
    Query(query): Query<AgentListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = match query.status.as_deref() {
        Some(s) => Some(
            AgentStatus::parse(s)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown status \"{s}\"")))?,
        ),
        None => None,
    };
    let agents = registry::list_agents(&state.store, status, query.cluster.as_deref()).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "agents": agents,
    })))
}

pub async fn agent_detail(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let agent = registry::require_agent(&state.store, &agent_id).await?;
    let recent_runs = state.store.list_runs(Some(&agent_id), 10).await?;
    let proposal_stats = state.store.proposal_stats(Some(&agent_id)).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "agent": agent,
        "recent_runs": recent_runs,
        "proposal_stats": proposal_stats,
    })))
}

#[derive(Deserialize)]
pub struct TriggerBody {
    pub trigger_source: Option<String>,
}

pub async fn trigger_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(body): Json<TriggerBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let source = body
        .trigger_source
        .unwrap_or_else(|| "admin".to_string());

    let report = runs::execute_agent_run(
        &state.store,
        &state.handlers,
        &state.llm,
        &state.config.dispatch,
        &agent_id,
        TriggerType::Manual,
        Some(&source),
    )
    .await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "run": report,
    })))
}

#[derive(Deserialize, Default)]
pub struct RunListQuery {
    pub agent_id: Option<String>,
    pub limit: Option<i64>,
}

pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<RunListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = query.limit.unwrap_or(RUN_LIST_CAP).clamp(1, RUN_LIST_CAP);
    let runs = state
        .store
        .list_runs(query.agent_id.as_deref(), limit)
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "runs": runs,
    })))
}

#[derive(Deserialize)]
pub struct EventBody {
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Fan an event out to every active agent subscribed to it via
/// `config.events`. Per-agent failures are reported, not propagated.
pub async fn publish_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<EventBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    auth::require_admin_or_cron(&state, &headers).await?;

    if body.event.trim().is_empty() {
        return Err(ApiError::BadRequest("event name is required".to_string()));
    }

    let subscribed: Vec<_> = state
        .store
        .list_agents(Some(AgentStatus::Active), None)
        .await?
        .into_iter()
        .filter(|a| a.subscribed_events().iter().any(|e| e == &body.event))
        .collect();

    let mut results = Vec::new();
    for agent in &subscribed {
        let outcome = runs::execute_agent_run(
            &state.store,
            &state.handlers,
            &state.llm,
            &state.config.dispatch,
            &agent.agent_id,
            TriggerType::Event,
            Some(&body.event),
        )
        .await;
        results.push(match outcome {
            Ok(report) => serde_json::json!({
                "agent_id": agent.agent_id,
                "status": report.status,
            }),
            Err(AgentError::OverBudget { .. }) => serde_json::json!({
                "agent_id": agent.agent_id,
                "skipped": "over_budget",
            }),
            Err(e) => {
                tracing::error!(agent_id = %agent.agent_id, event = %body.event, error = %e, "event run failed");
                serde_json::json!({
                    "agent_id": agent.agent_id,
                    "error": e.to_string(),
                })
            }
        });
    }

    tracing::info!(event = %body.event, agents = subscribed.len(), "event published");
    Ok(Json(serde_json::json!({
        "success": true,
        "event": body.event,
        "agents_notified": subscribed.len(),
        "results": results,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentContext, AgentHandler, AgentOutcome, HandlerRegistry};
    use crate::api::testutil::*;
    use crate::api::router;
    use crate::db::mem::{MemStore, agent_fixture};
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct OkHandler;

    #[async_trait]
    impl AgentHandler for OkHandler {
        async fn run(&self, _ctx: &AgentContext) -> Result<AgentOutcome, AgentError> {
            Ok(AgentOutcome::quiet("ran"))
        }
    }

    #[tokio::test]
    async fn list_and_detail_round_trip() {
        let mem = Arc::new(MemStore::new());
        mem.seed_agent(agent_fixture("payroll_watchdog"));
        let (state, token) = state_and_token(mem).await;
        let app = router(state);

        let response = app
            .clone()
            .oneshot(get_with_bearer("/api/agents", &token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["agents"].as_array().unwrap().len(), 1);

        let response = app
            .oneshot(get_with_bearer("/api/agents/payroll_watchdog", &token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["agent"]["agent_id"], "payroll_watchdog");
        assert!(body["recent_runs"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_agent_detail_is_404() {
        let (state, token) = state_and_token(Arc::new(MemStore::new())).await;
        let response = router(state)
            .oneshot(get_with_bearer("/api/agents/ghost", &token))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn manual_trigger_runs_the_agent() {
        let mem = Arc::new(MemStore::new());
        mem.seed_agent(agent_fixture("payroll_watchdog"));
        let (mut state, token) = state_and_token(Arc::clone(&mem)).await;
        let mut handlers = HandlerRegistry::new();
        handlers.register("payroll_watchdog", Arc::new(OkHandler));
        state.handlers = Arc::new(handlers);

        let response = router(state)
            .oneshot(post_json(
                "/api/agents/payroll_watchdog/trigger",
                &token,
                &serde_json::json!({ "trigger_source": "dashboard" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["run"]["status"], "success");

        let runs = mem.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].trigger_source.as_deref(), Some("dashboard"));
    }

    #[tokio::test]
    async fn triggering_a_disabled_agent_is_400() {
        let mem = Arc::new(MemStore::new());
        let mut agent = agent_fixture("payroll_watchdog");
        agent.status = AgentStatus::Disabled;
        mem.seed_agent(agent);
        let (state, token) = state_and_token(mem).await;

        let response = router(state)
            .oneshot(post_json(
                "/api/agents/payroll_watchdog/trigger",
                &token,
                &serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn events_fan_out_to_subscribed_agents_only() {
        let mem = Arc::new(MemStore::new());
        let mut subscriber = agent_fixture("payroll_watchdog");
        subscriber.config = serde_json::json!({ "events": ["time_entry.anomaly"] });
        mem.seed_agent(subscriber);
        mem.seed_agent(agent_fixture("bystander"));
        let (mut state, token) = state_and_token(Arc::clone(&mem)).await;
        let mut handlers = HandlerRegistry::new();
        handlers.register("payroll_watchdog", Arc::new(OkHandler));
        state.handlers = Arc::new(handlers);

        let response = router(state)
            .oneshot(post_json(
                "/api/agents/events",
                &token,
                &serde_json::json!({ "event": "time_entry.anomaly" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["agents_notified"], 1);

        let runs = mem.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].agent_id, "payroll_watchdog");
        assert_eq!(runs[0].trigger_source.as_deref(), Some("time_entry.anomaly"));
    }

    #[tokio::test]
    async fn events_accept_the_cron_secret_but_not_anonymous() {
        let (state, _) = state_and_token(Arc::new(MemStore::new())).await;
        let app = router(state);

        let response = app
            .clone()
            .oneshot(post_json(
                "/api/agents/events",
                "cron-secret-for-tests",
                &serde_json::json!({ "event": "shift.published" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/api/agents/events")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(
                        serde_json::json!({ "event": "shift.published" }).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
