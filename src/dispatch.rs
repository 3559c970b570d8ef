//! Scheduled dispatch and daily budget reset.
//!
//! The dispatcher is driven by an external cron tick hitting the dispatch
//! endpoint roughly every five minutes. Each cycle is self-contained:
//! select due agents, run them one at a time, then sweep stale proposals
//! and stuck runs. One misbehaving agent never takes the cycle down.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::agents::{AgentStatus, HandlerRegistry, RunStatus, TriggerType, registry, runs};
use crate::config::Config;
use crate::db::Database;
use crate::error::DatabaseError;
use crate::llm::LlmClient;

/// Per-agent line in the cycle report.
#[derive(Debug, Clone, Serialize)]
pub struct AgentDispatchResult {
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate result of one dispatch cycle.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub success: bool,
    pub duration_ms: i64,
    pub agents_checked: usize,
    pub agents_run: usize,
    pub results: Vec<AgentDispatchResult>,
    pub proposals_expired: u64,
    pub stale_runs_failed: u64,
}

/// Run one dispatch cycle at `now`.
pub async fn run_dispatch_cycle(
    store: &Arc<dyn Database>,
    handlers: &HandlerRegistry,
    llm: &Arc<LlmClient>,
    config: &Config,
    now: DateTime<Utc>,
) -> Result<DispatchOutcome, DatabaseError> {
    let started = Instant::now();
    let active = store.list_agents(Some(AgentStatus::Active), None).await?;
    let agents_checked = active.len();

    let mut results = Vec::new();
    let mut agents_run = 0;

    for agent in active {
        if !registry::is_agent_due(&agent, now) {
            continue;
        }

        // A run within the debounce window means this tick already fired
        // (or an overlapping tick did); skip rather than double-run.
        if let Some(last) = agent.last_run_at {
            let since = now - last;
            if since < Duration::minutes(config.dispatch.debounce_minutes) {
                tracing::debug!(
                    agent_id = %agent.agent_id,
                    minutes_since_last = since.num_minutes(),
                    "debounced"
                );
                results.push(AgentDispatchResult {
                    agent_id: agent.agent_id,
                    status: None,
                    skipped: Some("debounced".to_string()),
                    error: None,
                });
                continue;
            }
        }

        agents_run += 1;
        match runs::execute_agent_run(
            store,
            handlers,
            llm,
            &config.dispatch,
            &agent.agent_id,
            TriggerType::Cron,
            Some("dispatcher"),
        )
        .await
        {
            Ok(report) => results.push(AgentDispatchResult {
                agent_id: agent.agent_id,
                status: Some(report.status),
                skipped: None,
                error: None,
            }),
            Err(e) => {
                tracing::error!(agent_id = %agent.agent_id, error = %e, "dispatch run failed");
                results.push(AgentDispatchResult {
                    agent_id: agent.agent_id,
                    status: Some(RunStatus::Error),
                    skipped: None,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    let proposals_expired = store
        .expire_stale_proposals(now, config.proposals.ttl_hours)
        .await?;
    let stale_runs_failed = store
        .fail_stale_running_runs(
            now - Duration::minutes(config.dispatch.run_stuck_after_minutes),
        )
        .await?;

    let outcome = DispatchOutcome {
        success: true,
        duration_ms: started.elapsed().as_millis() as i64,
        agents_checked,
        agents_run,
        results,
        proposals_expired,
        stale_runs_failed,
    };
    tracing::info!(
        agents_checked = outcome.agents_checked,
        agents_run = outcome.agents_run,
        proposals_expired = outcome.proposals_expired,
        stale_runs_failed = outcome.stale_runs_failed,
        duration_ms = outcome.duration_ms,
        "dispatch cycle finished"
    );
    Ok(outcome)
}

/// Result of the daily budget reset.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetResetOutcome {
    pub success: bool,
    pub agents_reset: u64,
    pub reset_at: DateTime<Utc>,
}

/// Zero every non-disabled agent's daily token usage. Safe to re-run.
pub async fn run_budget_reset(
    store: &Arc<dyn Database>,
    now: DateTime<Utc>,
) -> Result<BudgetResetOutcome, DatabaseError> {
    let agents_reset = store.reset_daily_budgets(now).await?;
    tracing::info!(agents_reset, "daily token budgets reset");
    Ok(BudgetResetOutcome {
        success: true,
        agents_reset,
        reset_at: now,
    })
}
