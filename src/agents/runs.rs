//! Run executor.
//!
//! One entry point for every trigger path (cron dispatch, manual trigger,
//! event fan-out). The executor owns the run record: a `running` row goes in
//! before the handler starts, so a crash or timeout always leaves a
//! queryable trace for the stale-run sweep.

use std::sync::Arc;
use std::time::Instant;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::agents::{
    AgentContext, AgentRun, AgentStatus, HandlerRegistry, RunStatus, TriggerType, registry,
};
use crate::config::DispatchConfig;
use crate::db::Database;
use crate::error::AgentError;
use crate::llm::LlmClient;

/// What a finished (or refused) run looks like to callers.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: uuid::Uuid,
    pub agent_id: String,
    pub status: RunStatus,
    pub duration_ms: i64,
    pub proposals_created: i32,
    pub proposals_auto_approved: i32,
    pub tokens_used: i64,
    pub summary: Option<String>,
    pub error: Option<String>,
}

/// Execute one agent run end to end.
///
/// Refusals (unknown agent, disabled, over budget, no handler) happen before
/// any run row is written. Handler failures and timeouts are recorded on the
/// run and surface as `Err`; the registry error streak is bumped either way.
pub async fn execute_agent_run(
    store: &Arc<dyn Database>,
    handlers: &HandlerRegistry,
    llm: &Arc<LlmClient>,
    dispatch: &DispatchConfig,
    agent_id: &str,
    trigger_type: TriggerType,
    trigger_source: Option<&str>,
) -> Result<RunReport, AgentError> {
    let agent = registry::require_agent(store, agent_id).await?;

    if agent.status == AgentStatus::Disabled {
        return Err(AgentError::Disabled(agent_id.to_string()));
    }
    if agent.daily_tokens_used >= agent.daily_token_budget {
        return Err(AgentError::OverBudget {
            agent_id: agent_id.to_string(),
            used: agent.daily_tokens_used,
            budget: agent.daily_token_budget,
        });
    }
    let handler = handlers
        .get(agent_id)
        .ok_or_else(|| AgentError::HandlerMissing(agent_id.to_string()))?;

    let run = store
        .insert_run(agent_id, trigger_type, trigger_source)
        .await?;
    tracing::info!(
        agent_id,
        run_id = %run.id,
        trigger = %trigger_type,
        "agent run started"
    );

    let ctx = AgentContext {
        agent_id: agent_id.to_string(),
        run_id: run.id,
        trigger_type,
        trigger_source: trigger_source.map(String::from),
        config: agent.config.clone(),
        store: Arc::clone(store),
        llm: Arc::clone(llm),
    };

    let started = Instant::now();
    let timeout = std::time::Duration::from_secs(dispatch.run_timeout_secs);
    let result = tokio::time::timeout(timeout, handler.run(&ctx)).await;
    let duration_ms = started.elapsed().as_millis() as i64;

    match result {
        Ok(Ok(outcome)) => {
            store
                .complete_run(
                    run.id,
                    outcome.status,
                    outcome.proposals_created,
                    outcome.proposals_auto_approved,
                    outcome.tokens_used,
                    outcome.cost_usd,
                    &outcome.metadata,
                )
                .await?;
            store
                .record_agent_run_outcome(
                    agent_id,
                    outcome.status,
                    duration_ms,
                    outcome.tokens_used,
                )
                .await?;
            tracing::info!(
                agent_id,
                run_id = %run.id,
                status = %outcome.status,
                duration_ms,
                proposals = outcome.proposals_created,
                "agent run finished"
            );
            Ok(RunReport {
                run_id: run.id,
                agent_id: agent_id.to_string(),
                status: outcome.status,
                duration_ms,
                proposals_created: outcome.proposals_created,
                proposals_auto_approved: outcome.proposals_auto_approved,
                tokens_used: outcome.tokens_used,
                summary: Some(outcome.summary),
                error: None,
            })
        }
        Ok(Err(e)) => {
            fail(store, &run, agent_id, duration_ms, &e.to_string()).await?;
            Err(e)
        }
        Err(_) => {
            let e = AgentError::Timeout {
                agent_id: agent_id.to_string(),
                secs: dispatch.run_timeout_secs,
            };
            fail(store, &run, agent_id, duration_ms, &e.to_string()).await?;
            Err(e)
        }
    }
}

async fn fail(
    store: &Arc<dyn Database>,
    run: &AgentRun,
    agent_id: &str,
    duration_ms: i64,
    message: &str,
) -> Result<(), AgentError> {
    tracing::error!(agent_id, run_id = %run.id, error = message, "agent run failed");
    store
        .fail_run(run.id, message, 0, Decimal::ZERO)
        .await?;
    store
        .record_agent_run_outcome(agent_id, RunStatus::Error, duration_ms, 0)
        .await?;
    Ok(())
}
