//! Cron-driven endpoints.
//!
//! An external scheduler hits these on a fixed cadence: the dispatcher
//! every five minutes, the budget reset daily, the notification drain every
//! minute or two. Each returns 200 with a `success` summary; partial
//! failures are reported inside the body so the scheduler never retries a
//! half-finished cycle.

use axum::Json;
use axum::extract::State;
use chrono::Utc;

use crate::agents::appliers;
use crate::api::AppState;
use crate::dispatch;
use crate::error::ApiError;
use crate::notify;

pub async fn dispatcher(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = dispatch::run_dispatch_cycle(
        &state.store,
        &state.handlers,
        &state.llm,
        &state.config,
        Utc::now(),
    )
    .await?;
    Ok(Json(serde_json::to_value(outcome).map_err(|e| {
        ApiError::Internal(format!("serializing dispatch outcome: {e}"))
    })?))
}

pub async fn budget_reset(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let outcome = dispatch::run_budget_reset(&state.store, Utc::now()).await?;
    Ok(Json(serde_json::to_value(outcome).map_err(|e| {
        ApiError::Internal(format!("serializing reset outcome: {e}"))
    })?))
}

/// Apply any approved-but-unapplied proposals, then drain the Slack queue.
/// Without a bot token the applier sweep still runs; the drain is skipped
/// and reported.
pub async fn notifications(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let proposals_applied = appliers::process_approved_proposals(&state.store).await?;

    let Some(slack) = &state.slack else {
        return Ok(Json(serde_json::json!({
            "success": false,
            "error": "SLACK_BOT_TOKEN not configured",
            "proposals_applied": proposals_applied,
        })));
    };

    let drained = notify::drain_notification_queue(
        &state.store,
        slack,
        &state.config.notify,
        Utc::now(),
    )
    .await
    .map_err(|e| ApiError::Internal(format!("notification drain failed: {e}")))?;

    Ok(Json(serde_json::json!({
        "success": true,
        "proposals_applied": proposals_applied,
        "processed": drained.processed,
        "sent": drained.sent,
        "retried": drained.retried,
        "failed": drained.failed,
    })))
}

#[cfg(test)]
mod tests {
    use crate::agents::{RiskLevel, proposals};
    use crate::api::router;
    use crate::api::testutil::*;
    use crate::db::{Database, NewProposal};
    use crate::db::mem::{MemStore, agent_fixture};
    use crate::error::NotifyError;
    use crate::notify::SlackApi;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use std::sync::Arc;
    use tower::ServiceExt;

    const SECRET: &str = "cron-secret-for-tests";

    struct NullSlack;

    #[async_trait]
    impl SlackApi for NullSlack {
        async fn open_dm(&self, user_id: &str) -> Result<String, NotifyError> {
            Ok(format!("D-{user_id}"))
        }
        async fn post_message(
            &self,
            _channel: &str,
            _text: &str,
            _blocks: Option<&serde_json::Value>,
        ) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn dispatcher_reports_an_empty_cycle() {
        let (state, _) = state_and_token(Arc::new(MemStore::new())).await;
        let response = router(state)
            .oneshot(get_with_bearer("/api/cron/agent-dispatcher", SECRET))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["agents_run"], 0);
    }

    #[tokio::test]
    async fn budget_reset_reports_the_count() {
        let mem = Arc::new(MemStore::new());
        mem.seed_agent(agent_fixture("payroll_watchdog"));
        let (state, _) = state_and_token(mem).await;

        let response = router(state)
            .oneshot(get_with_bearer("/api/cron/agent-budget-reset", SECRET))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["agents_reset"], 1);
    }

    #[tokio::test]
    async fn notifications_without_slack_still_apply_proposals() {
        let mem = Arc::new(MemStore::new());
        mem.seed_agent(agent_fixture("payroll_watchdog"));
        let store: Arc<dyn Database> = Arc::clone(&mem) as _;
        let input = NewProposal::new("payroll_watchdog", "health_report", "r")
            .risk(RiskLevel::Low);
        proposals::create_proposal(&store, input, 72).await.unwrap();

        let (state, _) = state_and_token(mem).await;
        let response = router(state)
            .oneshot(get_with_bearer("/api/cron/agent-notifications", SECRET))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["proposals_applied"], 1);
    }

    #[tokio::test]
    async fn notifications_drain_when_slack_is_configured() {
        let mem = Arc::new(MemStore::new());
        let store: Arc<dyn Database> = Arc::clone(&mem) as _;
        store
            .enqueue_notification(&crate::db::NewNotification {
                channel: None,
                slack_user_id: Some("U42".to_string()),
                message: "hello".to_string(),
                blocks: serde_json::Value::Null,
                priority: 1,
                scheduled_for: chrono::Utc::now(),
                max_retries: 3,
                metadata: serde_json::json!({}),
            })
            .await
            .unwrap();

        let (mut state, _) = state_and_token(mem).await;
        state.slack = Some(Arc::new(NullSlack));

        let response = router(state)
            .oneshot(get_with_bearer("/api/cron/agent-notifications", SECRET))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["sent"], 1);
    }
}
