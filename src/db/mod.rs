//! Database abstraction layer.
//!
//! All persisted state goes through this trait so the agent core can be
//! exercised against an in-memory store in tests. The production
//! implementation lives in `postgres`.

pub mod postgres;

#[cfg(test)]
pub mod mem;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::agents::{
    Agent, AgentRun, AgentStatus, Proposal, ProposalStatus, QueuedNotification, RiskLevel,
    RunStatus, TriggerType,
};
use crate::error::DatabaseError;

/// Input for creating a proposal.
#[derive(Debug, Clone)]
pub struct NewProposal {
    pub agent_id: String,
    pub proposal_type: String,
    pub title: String,
    pub summary: Option<String>,
    pub detail: serde_json::Value,
    pub target_employee_id: Option<Uuid>,
    pub target_entity_type: Option<String>,
    pub target_entity_id: Option<String>,
    pub risk_level: RiskLevel,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewProposal {
    pub fn new(
        agent_id: impl Into<String>,
        proposal_type: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            proposal_type: proposal_type.into(),
            title: title.into(),
            summary: None,
            detail: serde_json::Value::Null,
            target_employee_id: None,
            target_entity_type: None,
            target_entity_id: None,
            risk_level: RiskLevel::Low,
            expires_at: None,
        }
    }

    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }

    pub fn risk(mut self, risk: RiskLevel) -> Self {
        self.risk_level = risk;
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn target_employee(mut self, id: Uuid) -> Self {
        self.target_employee_id = Some(id);
        self
    }
}

/// Input for queueing a notification.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub channel: Option<String>,
    pub slack_user_id: Option<String>,
    pub message: String,
    pub blocks: serde_json::Value,
    pub priority: i16,
    pub scheduled_for: DateTime<Utc>,
    pub max_retries: i32,
    pub metadata: serde_json::Value,
}

/// Filters for the proposal listing endpoint.
#[derive(Debug, Clone, Default)]
pub struct ProposalFilter {
    pub agent_id: Option<String>,
    pub status: Option<ProposalStatus>,
    pub proposal_type: Option<String>,
    pub target_employee_id: Option<Uuid>,
    pub limit: i64,
    pub offset: i64,
}

/// Per-status proposal counts for dashboards.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ProposalStats {
    pub pending: i64,
    pub auto_approved: i64,
    pub approved: i64,
    pub rejected: i64,
    pub applied: i64,
    pub expired: i64,
}

impl ProposalStats {
    pub fn add(&mut self, status: ProposalStatus, n: i64) {
        match status {
            ProposalStatus::Pending => self.pending += n,
            ProposalStatus::AutoApproved => self.auto_approved += n,
            ProposalStatus::Approved => self.approved += n,
            ProposalStatus::Rejected => self.rejected += n,
            ProposalStatus::Applied => self.applied += n,
            ProposalStatus::Expired => self.expired += n,
        }
    }
}

/// Fields stamped onto a proposal by a state transition.
#[derive(Debug, Clone, Default)]
pub struct ReviewStamp<'a> {
    pub reviewed_by: Option<Uuid>,
    pub notes: Option<&'a str>,
    /// Also set `applied_at = now` (resolve / mark-applied paths).
    pub stamp_applied: bool,
}

/// Authenticated API principal resolved from a bearer token.
#[derive(Debug, Clone)]
pub struct Principal {
    pub profile_id: Uuid,
    pub role: String,
}

/// The persistence seam for the agent core.
#[async_trait]
pub trait Database: Send + Sync {
    // --- Agent registry ---

    async fn list_agents(
        &self,
        status: Option<AgentStatus>,
        cluster: Option<&str>,
    ) -> Result<Vec<Agent>, DatabaseError>;

    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, DatabaseError>;

    /// Seed/registration path; updates the definition fields in place when
    /// the agent already exists.
    async fn upsert_agent(&self, agent: &Agent) -> Result<(), DatabaseError>;

    async fn set_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
    ) -> Result<bool, DatabaseError>;

    /// Narrow post-run update: `last_run_*`, token accounting and the
    /// consecutive-error counter. Kept to specific columns so a concurrent
    /// budget reset can't be clobbered by a full-row write.
    async fn record_agent_run_outcome(
        &self,
        agent_id: &str,
        status: RunStatus,
        duration_ms: i64,
        tokens_delta: i64,
    ) -> Result<(), DatabaseError>;

    /// Zero `daily_tokens_used` for every non-disabled agent. Returns the
    /// number of agents reset.
    async fn reset_daily_budgets(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError>;

    // --- Runs ---

    /// Insert a run in `running` state and return it.
    async fn insert_run(
        &self,
        agent_id: &str,
        trigger_type: TriggerType,
        trigger_source: Option<&str>,
    ) -> Result<AgentRun, DatabaseError>;

    async fn complete_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        proposals_created: i32,
        proposals_auto_approved: i32,
        tokens_used: i64,
        cost_usd: Decimal,
        metadata: &serde_json::Value,
    ) -> Result<(), DatabaseError>;

    async fn fail_run(
        &self,
        run_id: Uuid,
        error_message: &str,
        tokens_used: i64,
        cost_usd: Decimal,
    ) -> Result<(), DatabaseError>;

    async fn get_run(&self, run_id: Uuid) -> Result<Option<AgentRun>, DatabaseError>;

    /// Most recent runs, newest first.
    async fn list_runs(
        &self,
        agent_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<AgentRun>, DatabaseError>;

    async fn list_runs_since(&self, since: DateTime<Utc>) -> Result<Vec<AgentRun>, DatabaseError>;

    async fn has_successful_run_since(&self, since: DateTime<Utc>)
    -> Result<bool, DatabaseError>;

    /// Sweep runs stuck in `running` past the cutoff to `error`. Returns the
    /// number swept.
    async fn fail_stale_running_runs(&self, cutoff: DateTime<Utc>) -> Result<u64, DatabaseError>;

    // --- Proposals ---

    async fn insert_proposal(&self, input: &NewProposal) -> Result<Proposal, DatabaseError>;

    async fn get_proposal(&self, id: Uuid) -> Result<Option<Proposal>, DatabaseError>;

    /// Conditional state transition: succeeds only when the row's current
    /// status is one of `from`. This is the race guard for concurrent
    /// reviews and the expiry sweep.
    async fn transition_proposal(
        &self,
        id: Uuid,
        from: &[ProposalStatus],
        to: ProposalStatus,
        stamp: ReviewStamp<'_>,
    ) -> Result<bool, DatabaseError>;

    /// Batch-resolve proposals currently in one of `from` (optionally scoped
    /// to an agent) to `applied`. Returns the count resolved.
    async fn bulk_resolve_proposals(
        &self,
        agent_id: Option<&str>,
        from: &[ProposalStatus],
        reviewed_by: Uuid,
    ) -> Result<u64, DatabaseError>;

    async fn list_proposals(
        &self,
        filter: &ProposalFilter,
    ) -> Result<(Vec<Proposal>, i64), DatabaseError>;

    async fn proposal_stats(&self, agent_id: Option<&str>)
    -> Result<ProposalStats, DatabaseError>;

    async fn list_proposals_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Proposal>, DatabaseError>;

    /// Expire pending/auto_approved proposals whose `expires_at` has passed,
    /// or that are older than `default_ttl_hours` when no expiry was set.
    async fn expire_stale_proposals(
        &self,
        now: DateTime<Utc>,
        default_ttl_hours: i64,
    ) -> Result<u64, DatabaseError>;

    /// Approved/auto-approved proposals never applied, oldest first.
    async fn list_unapplied_approved(&self, limit: i64) -> Result<Vec<Uuid>, DatabaseError>;

    // --- Notification queue ---

    async fn enqueue_notification(&self, input: &NewNotification)
    -> Result<Uuid, DatabaseError>;

    /// Pending items due now: priority desc, then created asc, capped.
    async fn due_notifications(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<QueuedNotification>, DatabaseError>;

    async fn mark_notification_sent(
        &self,
        id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// Record a failed attempt. `terminal` moves the row to `failed`;
    /// otherwise it stays `pending` for the next drain.
    async fn mark_notification_attempt(
        &self,
        id: Uuid,
        retry_count: i32,
        error: &str,
        terminal: bool,
    ) -> Result<(), DatabaseError>;

    // --- API keys ---

    async fn get_principal_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Principal>, DatabaseError>;

    async fn insert_api_key(
        &self,
        token_hash: &str,
        profile_id: Uuid,
        role: &str,
    ) -> Result<(), DatabaseError>;
}
