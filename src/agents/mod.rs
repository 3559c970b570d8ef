//! Core types for the agent workforce: registry rows, runs, proposals,
//! the queued-notification row, and the handler contract.

pub mod appliers;
pub mod handlers;
pub mod proposals;
pub mod registry;
pub mod runs;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Database;
use crate::error::AgentError;
use crate::llm::LlmClient;

/// Lifecycle status of a registered agent. Agents are never hard-deleted,
/// only disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Paused,
    Disabled,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "disabled" => Some(Self::Disabled),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome status of a run. `Running` is the in-flight state written at
/// start; every started run must reach exactly one terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Partial,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "partial" => Some(Self::Partial),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused a run to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Cron,
    Event,
    Manual,
    Agent,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cron => "cron",
            Self::Event => "event",
            Self::Manual => "manual",
            Self::Agent => "agent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cron" => Some(Self::Cron),
            "event" => Some(Self::Event),
            "manual" => Some(Self::Manual),
            "agent" => Some(Self::Agent),
            _ => None,
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review state of a proposal. See `proposals` for the legal transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    AutoApproved,
    Approved,
    Rejected,
    Applied,
    Expired,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::AutoApproved => "auto_approved",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Applied => "applied",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "auto_approved" => Some(Self::AutoApproved),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "applied" => Some(Self::Applied),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Rejected | Self::Applied | Self::Expired)
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk classification attached to a proposal by its producing agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Delivery state of a queued notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A registry row: one schedulable unit of automated work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub display_name: String,
    pub cluster: String,
    pub description: Option<String>,
    pub status: AgentStatus,
    pub schedule_cron: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_status: Option<RunStatus>,
    pub last_run_duration_ms: Option<i64>,
    pub daily_token_budget: i64,
    pub daily_tokens_used: i64,
    pub budget_reset_at: DateTime<Utc>,
    pub consecutive_errors: i32,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Event types this agent subscribes to, from `config.events`.
    pub fn subscribed_events(&self) -> Vec<String> {
        self.config
            .get("events")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// One execution instance of an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRun {
    pub id: Uuid,
    pub agent_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub trigger_type: TriggerType,
    pub trigger_source: Option<String>,
    pub proposals_created: i32,
    pub proposals_auto_approved: i32,
    pub tokens_used: i64,
    pub cost_usd: Decimal,
    pub error_message: Option<String>,
    pub metadata: serde_json::Value,
}

/// A suggested mutation produced by an agent run, subject to review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    pub agent_id: String,
    pub proposal_type: String,
    pub title: String,
    pub summary: Option<String>,
    pub detail: serde_json::Value,
    pub target_employee_id: Option<Uuid>,
    pub target_entity_type: Option<String>,
    pub target_entity_id: Option<String>,
    pub risk_level: RiskLevel,
    pub status: ProposalStatus,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub applied_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// A Slack/in-app message waiting in the fan-out queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedNotification {
    pub id: Uuid,
    /// Slack channel ID; resolved from `slack_user_id` at send time for DMs.
    pub channel: Option<String>,
    pub slack_user_id: Option<String>,
    pub message: String,
    pub blocks: serde_json::Value,
    /// 0 = low .. 3 = urgent; drained highest first.
    pub priority: i16,
    pub status: NotificationStatus,
    pub scheduled_for: DateTime<Utc>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// What a handler hands back when its run completes.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub status: RunStatus,
    pub proposals_created: i32,
    pub proposals_auto_approved: i32,
    pub tokens_used: i64,
    pub cost_usd: Decimal,
    pub summary: String,
    pub metadata: serde_json::Value,
}

impl AgentOutcome {
    /// A success outcome with nothing to report.
    pub fn quiet(summary: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Success,
            proposals_created: 0,
            proposals_auto_approved: 0,
            tokens_used: 0,
            cost_usd: Decimal::ZERO,
            summary: summary.into(),
            metadata: serde_json::Value::Null,
        }
    }
}

/// Everything a handler gets to work with during one run.
#[derive(Clone)]
pub struct AgentContext {
    pub agent_id: String,
    pub run_id: Uuid,
    pub trigger_type: TriggerType,
    pub trigger_source: Option<String>,
    /// The registry row's `config` column.
    pub config: serde_json::Value,
    pub store: Arc<dyn Database>,
    pub llm: Arc<LlmClient>,
}

/// An agent's work function. Implementations create proposals and queue
/// notifications through `ctx.store`; the executor owns the run record.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn run(&self, ctx: &AgentContext) -> Result<AgentOutcome, AgentError>;
}

/// Maps `agent_id` strings to their work functions. The dispatcher and the
/// manual-trigger endpoint both resolve handlers here.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn AgentHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with all built-in handlers registered.
    pub fn builtin() -> Self {
        let mut reg = Self::new();
        reg.register(
            "system_monitor",
            Arc::new(handlers::system_monitor::SystemMonitor),
        );
        reg
    }

    pub fn register(&mut self, agent_id: impl Into<String>, handler: Arc<dyn AgentHandler>) {
        self.handlers.insert(agent_id.into(), handler);
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<dyn AgentHandler>> {
        self.handlers.get(agent_id).cloned()
    }

    pub fn registered_ids(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}
