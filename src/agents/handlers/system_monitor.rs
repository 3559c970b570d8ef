//! Fleet supervisor.
//!
//! Rule-based, no LLM. Each run sweeps stuck `running` rows, scans the
//! registry for error streaks and budget pressure, and files one
//! auto-approved health report when anything is wrong. Agents with five or
//! more consecutive errors get a pause proposal; the applier sweep turns
//! that into an actual status change.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;

use crate::agents::{
    AgentContext, AgentHandler, AgentOutcome, AgentStatus, ProposalStatus, RunStatus, proposals,
};
use crate::db::{NewNotification, NewProposal, ProposalFilter};
use crate::error::AgentError;

const WARN_STREAK: i32 = 3;
const PAUSE_STREAK: i32 = 5;
const BUDGET_WARN_RATIO: f64 = 0.8;
const DEFAULT_STUCK_AFTER_MINUTES: i64 = 30;

pub struct SystemMonitor;

#[async_trait]
impl AgentHandler for SystemMonitor {
    async fn run(&self, ctx: &AgentContext) -> Result<AgentOutcome, AgentError> {
        let now = Utc::now();
        let stuck_after = ctx
            .config
            .get("stuck_after_minutes")
            .and_then(|v| v.as_i64())
            .unwrap_or(DEFAULT_STUCK_AFTER_MINUTES);

        let swept = ctx
            .store
            .fail_stale_running_runs(now - Duration::minutes(stuck_after))
            .await?;

        let mut issues: Vec<String> = Vec::new();
        if swept > 0 {
            issues.push(format!("{swept} run(s) stuck past {stuck_after}m swept to error"));
        }

        let mut proposals_created = 0;
        let mut auto_approved = 0;

        for agent in ctx.store.list_agents(None, None).await? {
            if agent.agent_id == ctx.agent_id {
                continue;
            }

            if agent.status == AgentStatus::Active
                && agent.consecutive_errors >= PAUSE_STREAK
            {
                issues.push(format!(
                    "{}: {} consecutive errors, pausing",
                    agent.agent_id, agent.consecutive_errors
                ));
                if !has_open_pause_proposal(ctx, &agent.agent_id).await? {
                    let input = NewProposal::new(
                        &ctx.agent_id,
                        "agent_status_change",
                        format!("Pause {} after repeated failures", agent.agent_id),
                    )
                    .summary(format!(
                        "{} failed {} runs in a row",
                        agent.agent_id, agent.consecutive_errors
                    ))
                    .detail(serde_json::json!({
                        "agent_id": agent.agent_id,
                        "status": "paused",
                    }));
                    let (_, auto) =
                        proposals::create_proposal(&ctx.store, input, 72).await?;
                    proposals_created += 1;
                    if auto {
                        auto_approved += 1;
                    }
                }
            } else if agent.status == AgentStatus::Active
                && agent.consecutive_errors >= WARN_STREAK
            {
                issues.push(format!(
                    "{}: {} consecutive errors",
                    agent.agent_id, agent.consecutive_errors
                ));
            }

            if agent.daily_token_budget > 0 {
                let ratio =
                    agent.daily_tokens_used as f64 / agent.daily_token_budget as f64;
                if ratio >= BUDGET_WARN_RATIO {
                    issues.push(format!(
                        "{}: {:.0}% of daily token budget used ({}/{})",
                        agent.agent_id,
                        ratio * 100.0,
                        agent.daily_tokens_used,
                        agent.daily_token_budget
                    ));
                }
            }
        }

        if issues.is_empty() {
            return Ok(AgentOutcome::quiet("fleet healthy"));
        }

        let summary = format!("{} issue(s) found", issues.len());
        let input = NewProposal::new(&ctx.agent_id, "health_report", "Fleet health report")
            .summary(summary.clone())
            .detail(serde_json::json!({ "issues": issues }));
        let (_, auto) = proposals::create_proposal(&ctx.store, input, 72).await?;
        proposals_created += 1;
        if auto {
            auto_approved += 1;
        }

        ctx.store
            .enqueue_notification(&NewNotification {
                channel: None,
                slack_user_id: None,
                message: format!("Agent fleet: {}\n- {}", summary, issues.join("\n- ")),
                blocks: serde_json::Value::Null,
                priority: 2,
                scheduled_for: now,
                max_retries: 3,
                metadata: serde_json::json!({ "source": ctx.agent_id }),
            })
            .await?;

        Ok(AgentOutcome {
            status: RunStatus::Success,
            proposals_created,
            proposals_auto_approved: auto_approved,
            tokens_used: 0,
            cost_usd: Decimal::ZERO,
            summary,
            metadata: serde_json::json!({ "issues": issues.len(), "stuck_runs_swept": swept }),
        })
    }
}

/// One open pause proposal per target agent is enough.
async fn has_open_pause_proposal(
    ctx: &AgentContext,
    target_agent: &str,
) -> Result<bool, AgentError> {
    for status in [ProposalStatus::Pending, ProposalStatus::AutoApproved] {
        let (open, _) = ctx
            .store
            .list_proposals(&ProposalFilter {
                agent_id: Some(ctx.agent_id.clone()),
                status: Some(status),
                proposal_type: Some("agent_status_change".to_string()),
                limit: 100,
                ..Default::default()
            })
            .await?;
        if open
            .iter()
            .any(|p| p.detail.get("agent_id").and_then(|v| v.as_str()) == Some(target_agent))
        {
            return Ok(true);
        }
    }
    Ok(false)
}
