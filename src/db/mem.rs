//! In-memory `Database` implementation for tests.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::agents::{
    Agent, AgentRun, AgentStatus, NotificationStatus, Proposal, ProposalStatus,
    QueuedNotification, RunStatus, TriggerType,
};
use crate::db::{
    Database, NewNotification, NewProposal, Principal, ProposalFilter, ProposalStats, ReviewStamp,
};
use crate::error::DatabaseError;

/// An active agent on a five-minute schedule with default budget.
pub fn agent_fixture(agent_id: &str) -> Agent {
    let now = Utc::now();
    Agent {
        agent_id: agent_id.to_string(),
        display_name: agent_id.replace('_', " "),
        cluster: "operations".to_string(),
        description: None,
        status: AgentStatus::Active,
        schedule_cron: Some("*/5 * * * *".to_string()),
        last_run_at: None,
        last_run_status: None,
        last_run_duration_ms: None,
        daily_token_budget: 100_000,
        daily_tokens_used: 0,
        budget_reset_at: now,
        consecutive_errors: 0,
        config: serde_json::json!({}),
        created_at: now,
        updated_at: now,
    }
}

#[derive(Default)]
struct State {
    agents: Vec<Agent>,
    runs: Vec<AgentRun>,
    proposals: Vec<Proposal>,
    notifications: Vec<QueuedNotification>,
    api_keys: Vec<(String, Principal)>,
}

#[derive(Default)]
pub struct MemStore {
    inner: Mutex<State>,
    broken: std::sync::atomic::AtomicBool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent reads fail, for error-path tests.
    pub fn poison(&self) {
        self.broken.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), DatabaseError> {
        if self.broken.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(DatabaseError::Pool("connection refused".to_string()));
        }
        Ok(())
    }

    pub fn with_agents(agents: Vec<Agent>) -> Self {
        let store = Self::new();
        store.inner.lock().unwrap().agents = agents;
        store
    }

    pub fn seed_agent(&self, agent: Agent) {
        self.inner.lock().unwrap().agents.push(agent);
    }

    pub fn seed_proposal(&self, proposal: Proposal) {
        self.inner.lock().unwrap().proposals.push(proposal);
    }

    pub fn notifications(&self) -> Vec<QueuedNotification> {
        self.inner.lock().unwrap().notifications.clone()
    }

    pub fn runs(&self) -> Vec<AgentRun> {
        self.inner.lock().unwrap().runs.clone()
    }

    pub fn proposals(&self) -> Vec<Proposal> {
        self.inner.lock().unwrap().proposals.clone()
    }
}

#[async_trait]
impl Database for MemStore {
    async fn list_agents(
        &self,
        status: Option<AgentStatus>,
        cluster: Option<&str>,
    ) -> Result<Vec<Agent>, DatabaseError> {
        self.check()?;
        let state = self.inner.lock().unwrap();
        let mut agents: Vec<Agent> = state
            .agents
            .iter()
            .filter(|a| status.is_none_or(|s| a.status == s))
            .filter(|a| cluster.is_none_or(|c| a.cluster == c))
            .cloned()
            .collect();
        agents.sort_by(|a, b| {
            (a.cluster.as_str(), a.display_name.as_str())
                .cmp(&(b.cluster.as_str(), b.display_name.as_str()))
        });
        Ok(agents)
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, DatabaseError> {
        let state = self.inner.lock().unwrap();
        Ok(state.agents.iter().find(|a| a.agent_id == agent_id).cloned())
    }

    async fn upsert_agent(&self, agent: &Agent) -> Result<(), DatabaseError> {
        let mut state = self.inner.lock().unwrap();
        match state.agents.iter_mut().find(|a| a.agent_id == agent.agent_id) {
            Some(existing) => {
                existing.display_name = agent.display_name.clone();
                existing.cluster = agent.cluster.clone();
                existing.description = agent.description.clone();
                existing.schedule_cron = agent.schedule_cron.clone();
                existing.daily_token_budget = agent.daily_token_budget;
                existing.config = agent.config.clone();
                existing.updated_at = Utc::now();
            }
            None => state.agents.push(agent.clone()),
        }
        Ok(())
    }

    async fn set_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
    ) -> Result<bool, DatabaseError> {
        let mut state = self.inner.lock().unwrap();
        match state.agents.iter_mut().find(|a| a.agent_id == agent_id) {
            Some(agent) => {
                agent.status = status;
                if status == AgentStatus::Active {
                    agent.consecutive_errors = 0;
                }
                agent.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_agent_run_outcome(
        &self,
        agent_id: &str,
        status: RunStatus,
        duration_ms: i64,
        tokens_delta: i64,
    ) -> Result<(), DatabaseError> {
        let mut state = self.inner.lock().unwrap();
        if let Some(agent) = state.agents.iter_mut().find(|a| a.agent_id == agent_id) {
            agent.last_run_at = Some(Utc::now());
            agent.last_run_status = Some(status);
            agent.last_run_duration_ms = Some(duration_ms);
            agent.daily_tokens_used += tokens_delta;
            if status == RunStatus::Error {
                agent.consecutive_errors += 1;
            } else {
                agent.consecutive_errors = 0;
            }
            agent.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn reset_daily_budgets(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let mut state = self.inner.lock().unwrap();
        let mut count = 0;
        for agent in state
            .agents
            .iter_mut()
            .filter(|a| a.status != AgentStatus::Disabled)
        {
            agent.daily_tokens_used = 0;
            agent.budget_reset_at = now;
            count += 1;
        }
        Ok(count)
    }

    async fn insert_run(
        &self,
        agent_id: &str,
        trigger_type: TriggerType,
        trigger_source: Option<&str>,
    ) -> Result<AgentRun, DatabaseError> {
        let run = AgentRun {
            id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            trigger_type,
            trigger_source: trigger_source.map(String::from),
            proposals_created: 0,
            proposals_auto_approved: 0,
            tokens_used: 0,
            cost_usd: Decimal::ZERO,
            error_message: None,
            metadata: serde_json::json!({}),
        };
        self.inner.lock().unwrap().runs.push(run.clone());
        Ok(run)
    }

    async fn complete_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        proposals_created: i32,
        proposals_auto_approved: i32,
        tokens_used: i64,
        cost_usd: Decimal,
        metadata: &serde_json::Value,
    ) -> Result<(), DatabaseError> {
        let mut state = self.inner.lock().unwrap();
        if let Some(run) = state.runs.iter_mut().find(|r| r.id == run_id) {
            run.finished_at = Some(Utc::now());
            run.status = status;
            run.proposals_created = proposals_created;
            run.proposals_auto_approved = proposals_auto_approved;
            run.tokens_used = tokens_used;
            run.cost_usd = cost_usd;
            run.metadata = metadata.clone();
        }
        Ok(())
    }

    async fn fail_run(
        &self,
        run_id: Uuid,
        error_message: &str,
        tokens_used: i64,
        cost_usd: Decimal,
    ) -> Result<(), DatabaseError> {
        let mut state = self.inner.lock().unwrap();
        if let Some(run) = state.runs.iter_mut().find(|r| r.id == run_id) {
            run.finished_at = Some(Utc::now());
            run.status = RunStatus::Error;
            run.error_message = Some(error_message.to_string());
            run.tokens_used = tokens_used;
            run.cost_usd = cost_usd;
        }
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<AgentRun>, DatabaseError> {
        let state = self.inner.lock().unwrap();
        Ok(state.runs.iter().find(|r| r.id == run_id).cloned())
    }

    async fn list_runs(
        &self,
        agent_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<AgentRun>, DatabaseError> {
        let state = self.inner.lock().unwrap();
        let mut runs: Vec<AgentRun> = state
            .runs
            .iter()
            .filter(|r| agent_id.is_none_or(|id| r.agent_id == id))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit as usize);
        Ok(runs)
    }

    async fn list_runs_since(&self, since: DateTime<Utc>) -> Result<Vec<AgentRun>, DatabaseError> {
        let state = self.inner.lock().unwrap();
        let mut runs: Vec<AgentRun> = state
            .runs
            .iter()
            .filter(|r| r.started_at >= since)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.started_at);
        Ok(runs)
    }

    async fn has_successful_run_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        self.check()?;
        let state = self.inner.lock().unwrap();
        Ok(state
            .runs
            .iter()
            .any(|r| r.status == RunStatus::Success && r.started_at >= since))
    }

    async fn fail_stale_running_runs(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let mut state = self.inner.lock().unwrap();
        let mut count = 0;
        for run in state
            .runs
            .iter_mut()
            .filter(|r| r.status == RunStatus::Running && r.started_at < cutoff)
        {
            run.status = RunStatus::Error;
            run.finished_at = Some(Utc::now());
            run.error_message = Some("run stuck in running state; failed by sweep".to_string());
            count += 1;
        }
        Ok(count)
    }

    async fn insert_proposal(&self, input: &NewProposal) -> Result<Proposal, DatabaseError> {
        let proposal = Proposal {
            id: Uuid::new_v4(),
            agent_id: input.agent_id.clone(),
            proposal_type: input.proposal_type.clone(),
            title: input.title.clone(),
            summary: input.summary.clone(),
            detail: input.detail.clone(),
            target_employee_id: input.target_employee_id,
            target_entity_type: input.target_entity_type.clone(),
            target_entity_id: input.target_entity_id.clone(),
            risk_level: input.risk_level,
            status: ProposalStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            applied_at: None,
            expires_at: input.expires_at,
            created_at: Utc::now(),
        };
        self.inner.lock().unwrap().proposals.push(proposal.clone());
        Ok(proposal)
    }

    async fn get_proposal(&self, id: Uuid) -> Result<Option<Proposal>, DatabaseError> {
        let state = self.inner.lock().unwrap();
        Ok(state.proposals.iter().find(|p| p.id == id).cloned())
    }

    async fn transition_proposal(
        &self,
        id: Uuid,
        from: &[ProposalStatus],
        to: ProposalStatus,
        stamp: ReviewStamp<'_>,
    ) -> Result<bool, DatabaseError> {
        let mut state = self.inner.lock().unwrap();
        let Some(proposal) = state
            .proposals
            .iter_mut()
            .find(|p| p.id == id && from.contains(&p.status))
        else {
            return Ok(false);
        };
        proposal.status = to;
        if stamp.reviewed_by.is_some() {
            proposal.reviewed_by = stamp.reviewed_by;
        }
        if stamp.reviewed_by.is_some() || stamp.notes.is_some() {
            proposal.reviewed_at = Some(Utc::now());
        }
        if let Some(notes) = stamp.notes {
            proposal.review_notes = Some(notes.to_string());
        }
        if stamp.stamp_applied {
            proposal.applied_at = Some(Utc::now());
        }
        Ok(true)
    }

    async fn bulk_resolve_proposals(
        &self,
        agent_id: Option<&str>,
        from: &[ProposalStatus],
        reviewed_by: Uuid,
    ) -> Result<u64, DatabaseError> {
        let mut state = self.inner.lock().unwrap();
        let mut count = 0;
        for proposal in state.proposals.iter_mut().filter(|p| {
            from.contains(&p.status) && agent_id.is_none_or(|id| p.agent_id == id)
        }) {
            proposal.status = ProposalStatus::Applied;
            proposal.reviewed_by = Some(reviewed_by);
            proposal.reviewed_at = Some(Utc::now());
            proposal.applied_at = Some(Utc::now());
            proposal.review_notes = Some("Bulk resolved by admin".to_string());
            count += 1;
        }
        Ok(count)
    }

    async fn list_proposals(
        &self,
        filter: &ProposalFilter,
    ) -> Result<(Vec<Proposal>, i64), DatabaseError> {
        let state = self.inner.lock().unwrap();
        let mut matched: Vec<Proposal> = state
            .proposals
            .iter()
            .filter(|p| filter.agent_id.as_deref().is_none_or(|id| p.agent_id == id))
            .filter(|p| filter.status.is_none_or(|s| p.status == s))
            .filter(|p| {
                filter
                    .proposal_type
                    .as_deref()
                    .is_none_or(|t| p.proposal_type == t)
            })
            .filter(|p| {
                filter
                    .target_employee_id
                    .is_none_or(|e| p.target_employee_id == Some(e))
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = matched.len() as i64;
        let page: Vec<Proposal> = matched
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn proposal_stats(
        &self,
        agent_id: Option<&str>,
    ) -> Result<ProposalStats, DatabaseError> {
        let state = self.inner.lock().unwrap();
        let mut stats = ProposalStats::default();
        for proposal in state
            .proposals
            .iter()
            .filter(|p| agent_id.is_none_or(|id| p.agent_id == id))
        {
            stats.add(proposal.status, 1);
        }
        Ok(stats)
    }

    async fn list_proposals_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Proposal>, DatabaseError> {
        let state = self.inner.lock().unwrap();
        let mut proposals: Vec<Proposal> = state
            .proposals
            .iter()
            .filter(|p| p.created_at >= since)
            .cloned()
            .collect();
        proposals.sort_by_key(|p| p.created_at);
        Ok(proposals)
    }

    async fn expire_stale_proposals(
        &self,
        now: DateTime<Utc>,
        default_ttl_hours: i64,
    ) -> Result<u64, DatabaseError> {
        let mut state = self.inner.lock().unwrap();
        let created_cutoff = now - Duration::hours(default_ttl_hours);
        let mut count = 0;
        for proposal in state.proposals.iter_mut().filter(|p| {
            matches!(
                p.status,
                ProposalStatus::Pending | ProposalStatus::AutoApproved
            ) && match p.expires_at {
                Some(at) => at <= now,
                None => p.created_at <= created_cutoff,
            }
        }) {
            proposal.status = ProposalStatus::Expired;
            count += 1;
        }
        Ok(count)
    }

    async fn list_unapplied_approved(&self, limit: i64) -> Result<Vec<Uuid>, DatabaseError> {
        let state = self.inner.lock().unwrap();
        let mut matched: Vec<&Proposal> = state
            .proposals
            .iter()
            .filter(|p| {
                matches!(
                    p.status,
                    ProposalStatus::Approved | ProposalStatus::AutoApproved
                ) && p.applied_at.is_none()
            })
            .collect();
        matched.sort_by_key(|p| p.created_at);
        Ok(matched.iter().take(limit as usize).map(|p| p.id).collect())
    }

    async fn enqueue_notification(
        &self,
        input: &NewNotification,
    ) -> Result<Uuid, DatabaseError> {
        let id = Uuid::new_v4();
        let item = QueuedNotification {
            id,
            channel: input.channel.clone(),
            slack_user_id: input.slack_user_id.clone(),
            message: input.message.clone(),
            blocks: input.blocks.clone(),
            priority: input.priority,
            status: NotificationStatus::Pending,
            scheduled_for: input.scheduled_for,
            retry_count: 0,
            max_retries: input.max_retries,
            error_message: None,
            sent_at: None,
            metadata: input.metadata.clone(),
            created_at: Utc::now(),
        };
        self.inner.lock().unwrap().notifications.push(item);
        Ok(id)
    }

    async fn due_notifications(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<QueuedNotification>, DatabaseError> {
        let state = self.inner.lock().unwrap();
        let mut due: Vec<QueuedNotification> = state
            .notifications
            .iter()
            .filter(|n| n.status == NotificationStatus::Pending && n.scheduled_for <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
        });
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn mark_notification_sent(
        &self,
        id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let mut state = self.inner.lock().unwrap();
        if let Some(item) = state.notifications.iter_mut().find(|n| n.id == id) {
            item.status = NotificationStatus::Sent;
            item.sent_at = Some(sent_at);
            item.error_message = None;
        }
        Ok(())
    }

    async fn mark_notification_attempt(
        &self,
        id: Uuid,
        retry_count: i32,
        error: &str,
        terminal: bool,
    ) -> Result<(), DatabaseError> {
        let mut state = self.inner.lock().unwrap();
        if let Some(item) = state.notifications.iter_mut().find(|n| n.id == id) {
            item.status = if terminal {
                NotificationStatus::Failed
            } else {
                NotificationStatus::Pending
            };
            item.retry_count = retry_count;
            item.error_message = Some(error.to_string());
        }
        Ok(())
    }

    async fn get_principal_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Principal>, DatabaseError> {
        let state = self.inner.lock().unwrap();
        Ok(state
            .api_keys
            .iter()
            .find(|(hash, _)| hash == token_hash)
            .map(|(_, p)| p.clone()))
    }

    async fn insert_api_key(
        &self,
        token_hash: &str,
        profile_id: Uuid,
        role: &str,
    ) -> Result<(), DatabaseError> {
        let mut state = self.inner.lock().unwrap();
        state.api_keys.push((
            token_hash.to_string(),
            Principal {
                profile_id,
                role: role.to_string(),
            },
        ));
        Ok(())
    }
}
