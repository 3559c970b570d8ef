//! PostgreSQL implementation of the `Database` trait.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use deadpool_postgres::{Config, Pool, Runtime};
use rust_decimal::Decimal;
use tokio_postgres::NoTls;
use tokio_postgres::types::ToSql;
use uuid::Uuid;

use crate::agents::{
    Agent, AgentRun, AgentStatus, NotificationStatus, Proposal, ProposalStatus,
    QueuedNotification, RiskLevel, RunStatus, TriggerType,
};
use crate::config::DatabaseConfig;
use crate::db::{
    Database, NewNotification, NewProposal, Principal, ProposalFilter, ProposalStats, ReviewStamp,
};
use crate::error::DatabaseError;

mod migrations {
    refinery::embed_migrations!("migrations");
}

/// Database store for the agent core.
pub struct Store {
    pool: Pool,
}

impl Store {
    /// Create a new store and connect to the database.
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let mut cfg = Config::new();
        cfg.url = Some(config.url().to_string());
        cfg.pool = Some(deadpool_postgres::PoolConfig {
            max_size: config.pool_size,
            ..Default::default()
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;

        // Test connection
        let _ = pool.get().await?;

        Ok(Self { pool })
    }

    /// Run embedded refinery migrations.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let mut conn = self.pool.get().await?;
        let report = migrations::migrations::runner()
            .run_async(&mut **conn)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        for applied in report.applied_migrations() {
            tracing::info!(migration = %applied.name(), "applied migration");
        }
        Ok(())
    }

    /// Get a connection from the pool.
    async fn conn(&self) -> Result<deadpool_postgres::Object, DatabaseError> {
        Ok(self.pool.get().await?)
    }
}

fn agent_from_row(row: &tokio_postgres::Row) -> Agent {
    let status: String = row.get("status");
    let last_run_status: Option<String> = row.get("last_run_status");
    Agent {
        agent_id: row.get("agent_id"),
        display_name: row.get("display_name"),
        cluster: row.get("cluster"),
        description: row.get("description"),
        status: AgentStatus::parse(&status).unwrap_or(AgentStatus::Disabled),
        schedule_cron: row.get("schedule_cron"),
        last_run_at: row.get("last_run_at"),
        last_run_status: last_run_status.as_deref().and_then(RunStatus::parse),
        last_run_duration_ms: row.get("last_run_duration_ms"),
        daily_token_budget: row.get("daily_token_budget"),
        daily_tokens_used: row.get("daily_tokens_used"),
        budget_reset_at: row.get("budget_reset_at"),
        consecutive_errors: row.get("consecutive_errors"),
        config: row.get("config"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn run_from_row(row: &tokio_postgres::Row) -> AgentRun {
    let status: String = row.get("status");
    let trigger: String = row.get("trigger_type");
    AgentRun {
        id: row.get("id"),
        agent_id: row.get("agent_id"),
        started_at: row.get("started_at"),
        finished_at: row.get("finished_at"),
        status: RunStatus::parse(&status).unwrap_or(RunStatus::Error),
        trigger_type: TriggerType::parse(&trigger).unwrap_or(TriggerType::Manual),
        trigger_source: row.get("trigger_source"),
        proposals_created: row.get("proposals_created"),
        proposals_auto_approved: row.get("proposals_auto_approved"),
        tokens_used: row.get("tokens_used"),
        cost_usd: row.get("cost_usd"),
        error_message: row.get("error_message"),
        metadata: row.get("metadata"),
    }
}

fn proposal_from_row(row: &tokio_postgres::Row) -> Proposal {
    let status: String = row.get("status");
    let risk: String = row.get("risk_level");
    Proposal {
        id: row.get("id"),
        agent_id: row.get("agent_id"),
        proposal_type: row.get("proposal_type"),
        title: row.get("title"),
        summary: row.get("summary"),
        detail: row.get("detail"),
        target_employee_id: row.get("target_employee_id"),
        target_entity_type: row.get("target_entity_type"),
        target_entity_id: row.get("target_entity_id"),
        risk_level: RiskLevel::parse(&risk).unwrap_or(RiskLevel::Low),
        status: ProposalStatus::parse(&status).unwrap_or(ProposalStatus::Expired),
        reviewed_by: row.get("reviewed_by"),
        reviewed_at: row.get("reviewed_at"),
        review_notes: row.get("review_notes"),
        applied_at: row.get("applied_at"),
        expires_at: row.get("expires_at"),
        created_at: row.get("created_at"),
    }
}

fn notification_from_row(row: &tokio_postgres::Row) -> QueuedNotification {
    let status: String = row.get("status");
    QueuedNotification {
        id: row.get("id"),
        channel: row.get("channel"),
        slack_user_id: row.get("slack_user_id"),
        message: row.get("message"),
        blocks: row.get("blocks"),
        priority: row.get("priority"),
        status: NotificationStatus::parse(&status).unwrap_or(NotificationStatus::Failed),
        scheduled_for: row.get("scheduled_for"),
        retry_count: row.get("retry_count"),
        max_retries: row.get("max_retries"),
        error_message: row.get("error_message"),
        sent_at: row.get("sent_at"),
        metadata: row.get("metadata"),
        created_at: row.get("created_at"),
    }
}

fn status_names(statuses: &[ProposalStatus]) -> Vec<&'static str> {
    statuses.iter().map(|s| s.as_str()).collect()
}

#[async_trait]
impl Database for Store {
    // --- Agent registry ---

    async fn list_agents(
        &self,
        status: Option<AgentStatus>,
        cluster: Option<&str>,
    ) -> Result<Vec<Agent>, DatabaseError> {
        let conn = self.conn().await?;

        let mut sql = String::from("SELECT * FROM agent_registry");
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        let status_str = status.map(|s| s.as_str().to_string());

        let mut clauses = Vec::new();
        if let Some(ref s) = status_str {
            params.push(s);
            clauses.push(format!("status = ${}", params.len()));
        }
        if let Some(ref c) = cluster {
            params.push(c);
            clauses.push(format!("cluster = ${}", params.len()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY cluster, display_name");

        let rows = conn.query(&sql, &params).await?;
        Ok(rows.iter().map(agent_from_row).collect())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT * FROM agent_registry WHERE agent_id = $1",
                &[&agent_id],
            )
            .await?;
        Ok(row.as_ref().map(agent_from_row))
    }

    async fn upsert_agent(&self, agent: &Agent) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            r#"
            INSERT INTO agent_registry (
                agent_id, display_name, cluster, description, status, schedule_cron,
                daily_token_budget, daily_tokens_used, budget_reset_at, config
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (agent_id) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                cluster = EXCLUDED.cluster,
                description = EXCLUDED.description,
                schedule_cron = EXCLUDED.schedule_cron,
                daily_token_budget = EXCLUDED.daily_token_budget,
                config = EXCLUDED.config,
                updated_at = NOW()
            "#,
            &[
                &agent.agent_id,
                &agent.display_name,
                &agent.cluster,
                &agent.description,
                &agent.status.as_str(),
                &agent.schedule_cron,
                &agent.daily_token_budget,
                &agent.daily_tokens_used,
                &agent.budget_reset_at,
                &agent.config,
            ],
        )
        .await?;
        Ok(())
    }

    async fn set_agent_status(
        &self,
        agent_id: &str,
        status: AgentStatus,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        // Resuming clears the error streak so the supervisor doesn't
        // immediately re-pause.
        let n = if status == AgentStatus::Active {
            conn.execute(
                "UPDATE agent_registry SET status = $2, consecutive_errors = 0, updated_at = NOW() WHERE agent_id = $1",
                &[&agent_id, &status.as_str()],
            )
            .await?
        } else {
            conn.execute(
                "UPDATE agent_registry SET status = $2, updated_at = NOW() WHERE agent_id = $1",
                &[&agent_id, &status.as_str()],
            )
            .await?
        };
        Ok(n > 0)
    }

    async fn record_agent_run_outcome(
        &self,
        agent_id: &str,
        status: RunStatus,
        duration_ms: i64,
        tokens_delta: i64,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            r#"
            UPDATE agent_registry SET
                last_run_at = NOW(),
                last_run_status = $2,
                last_run_duration_ms = $3,
                daily_tokens_used = daily_tokens_used + $4,
                consecutive_errors = CASE WHEN $2 = 'error'
                    THEN consecutive_errors + 1 ELSE 0 END,
                updated_at = NOW()
            WHERE agent_id = $1
            "#,
            &[&agent_id, &status.as_str(), &duration_ms, &tokens_delta],
        )
        .await?;
        Ok(())
    }

    async fn reset_daily_budgets(&self, now: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let conn = self.conn().await?;
        let n = conn
            .execute(
                "UPDATE agent_registry SET daily_tokens_used = 0, budget_reset_at = $1, updated_at = NOW() WHERE status <> 'disabled'",
                &[&now],
            )
            .await?;
        Ok(n)
    }

    // --- Runs ---

    async fn insert_run(
        &self,
        agent_id: &str,
        trigger_type: TriggerType,
        trigger_source: Option<&str>,
    ) -> Result<AgentRun, DatabaseError> {
        let conn = self.conn().await?;
        let id = Uuid::new_v4();
        let started_at = Utc::now();

        conn.execute(
            r#"
            INSERT INTO agent_runs (id, agent_id, started_at, status, trigger_type, trigger_source)
            VALUES ($1, $2, $3, 'running', $4, $5)
            "#,
            &[
                &id,
                &agent_id,
                &started_at,
                &trigger_type.as_str(),
                &trigger_source,
            ],
        )
        .await?;

        Ok(AgentRun {
            id,
            agent_id: agent_id.to_string(),
            started_at,
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
        })
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
        let conn = self.conn().await?;
        conn.execute(
            r#"
            UPDATE agent_runs SET
                finished_at = NOW(),
                status = $2,
                proposals_created = $3,
                proposals_auto_approved = $4,
                tokens_used = $5,
                cost_usd = $6,
                metadata = $7
            WHERE id = $1
            "#,
            &[
                &run_id,
                &status.as_str(),
                &proposals_created,
                &proposals_auto_approved,
                &tokens_used,
                &cost_usd,
                metadata,
            ],
        )
        .await?;
        Ok(())
    }

    async fn fail_run(
        &self,
        run_id: Uuid,
        error_message: &str,
        tokens_used: i64,
        cost_usd: Decimal,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            r#"
            UPDATE agent_runs SET
                finished_at = NOW(),
                status = 'error',
                error_message = $2,
                tokens_used = $3,
                cost_usd = $4
            WHERE id = $1
            "#,
            &[&run_id, &error_message, &tokens_used, &cost_usd],
        )
        .await?;
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<AgentRun>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt("SELECT * FROM agent_runs WHERE id = $1", &[&run_id])
            .await?;
        Ok(row.as_ref().map(run_from_row))
    }

    async fn list_runs(
        &self,
        agent_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<AgentRun>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = match agent_id {
            Some(id) => {
                conn.query(
                    "SELECT * FROM agent_runs WHERE agent_id = $1 ORDER BY started_at DESC LIMIT $2",
                    &[&id, &limit],
                )
                .await?
            }
            None => {
                conn.query(
                    "SELECT * FROM agent_runs ORDER BY started_at DESC LIMIT $1",
                    &[&limit],
                )
                .await?
            }
        };
        Ok(rows.iter().map(run_from_row).collect())
    }

    async fn list_runs_since(&self, since: DateTime<Utc>) -> Result<Vec<AgentRun>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT * FROM agent_runs WHERE started_at >= $1 ORDER BY started_at",
                &[&since],
            )
            .await?;
        Ok(rows.iter().map(run_from_row).collect())
    }

    async fn has_successful_run_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM agent_runs WHERE status = 'success' AND started_at >= $1)",
                &[&since],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn fail_stale_running_runs(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, DatabaseError> {
        let conn = self.conn().await?;
        let n = conn
            .execute(
                r#"
                UPDATE agent_runs SET
                    status = 'error',
                    finished_at = NOW(),
                    error_message = 'run stuck in running state; failed by sweep'
                WHERE status = 'running' AND started_at < $1
                "#,
                &[&cutoff],
            )
            .await?;
        Ok(n)
    }

    // --- Proposals ---

    async fn insert_proposal(&self, input: &NewProposal) -> Result<Proposal, DatabaseError> {
        let conn = self.conn().await?;
        let id = Uuid::new_v4();
        let created_at = Utc::now();

        conn.execute(
            r#"
            INSERT INTO agent_proposals (
                id, agent_id, proposal_type, title, summary, detail,
                target_employee_id, target_entity_type, target_entity_id,
                risk_level, status, expires_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', $11, $12)
            "#,
            &[
                &id,
                &input.agent_id,
                &input.proposal_type,
                &input.title,
                &input.summary,
                &input.detail,
                &input.target_employee_id,
                &input.target_entity_type,
                &input.target_entity_id,
                &input.risk_level.as_str(),
                &input.expires_at,
                &created_at,
            ],
        )
        .await?;

        Ok(Proposal {
            id,
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
            created_at,
        })
    }

    async fn get_proposal(&self, id: Uuid) -> Result<Option<Proposal>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt("SELECT * FROM agent_proposals WHERE id = $1", &[&id])
            .await?;
        Ok(row.as_ref().map(proposal_from_row))
    }

    async fn transition_proposal(
        &self,
        id: Uuid,
        from: &[ProposalStatus],
        to: ProposalStatus,
        stamp: ReviewStamp<'_>,
    ) -> Result<bool, DatabaseError> {
        let conn = self.conn().await?;
        let from_names = status_names(from);
        let stamp_review = stamp.reviewed_by.is_some() || stamp.notes.is_some();

        let n = conn
            .execute(
                r#"
                UPDATE agent_proposals SET
                    status = $2,
                    reviewed_by = COALESCE($3, reviewed_by),
                    reviewed_at = CASE WHEN $4 THEN NOW() ELSE reviewed_at END,
                    review_notes = COALESCE($5, review_notes),
                    applied_at = CASE WHEN $6 THEN NOW() ELSE applied_at END
                WHERE id = $1 AND status = ANY($7)
                "#,
                &[
                    &id,
                    &to.as_str(),
                    &stamp.reviewed_by,
                    &stamp_review,
                    &stamp.notes,
                    &stamp.stamp_applied,
                    &from_names,
                ],
            )
            .await?;
        Ok(n > 0)
    }

    async fn bulk_resolve_proposals(
        &self,
        agent_id: Option<&str>,
        from: &[ProposalStatus],
        reviewed_by: Uuid,
    ) -> Result<u64, DatabaseError> {
        let conn = self.conn().await?;
        let from_names = status_names(from);

        let n = match agent_id {
            Some(agent) => {
                conn.execute(
                    r#"
                    UPDATE agent_proposals SET
                        status = 'applied', reviewed_by = $1, reviewed_at = NOW(),
                        applied_at = NOW(), review_notes = 'Bulk resolved by admin'
                    WHERE status = ANY($2) AND agent_id = $3
                    "#,
                    &[&reviewed_by, &from_names, &agent],
                )
                .await?
            }
            None => {
                conn.execute(
                    r#"
                    UPDATE agent_proposals SET
                        status = 'applied', reviewed_by = $1, reviewed_at = NOW(),
                        applied_at = NOW(), review_notes = 'Bulk resolved by admin'
                    WHERE status = ANY($2)
                    "#,
                    &[&reviewed_by, &from_names],
                )
                .await?
            }
        };
        Ok(n)
    }

    async fn list_proposals(
        &self,
        filter: &ProposalFilter,
    ) -> Result<(Vec<Proposal>, i64), DatabaseError> {
        let conn = self.conn().await?;

        let mut clauses = Vec::new();
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::new();
        let status_str = filter.status.map(|s| s.as_str().to_string());

        if let Some(ref id) = filter.agent_id {
            params.push(id);
            clauses.push(format!("agent_id = ${}", params.len()));
        }
        if let Some(ref s) = status_str {
            params.push(s);
            clauses.push(format!("status = ${}", params.len()));
        }
        if let Some(ref t) = filter.proposal_type {
            params.push(t);
            clauses.push(format!("proposal_type = ${}", params.len()));
        }
        if let Some(ref e) = filter.target_employee_id {
            params.push(e);
            clauses.push(format!("target_employee_id = ${}", params.len()));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let count_row = conn
            .query_one(
                &format!("SELECT COUNT(*) FROM agent_proposals{where_sql}"),
                &params,
            )
            .await?;
        let total: i64 = count_row.get(0);

        params.push(&filter.limit);
        let limit_idx = params.len();
        params.push(&filter.offset);
        let offset_idx = params.len();

        let rows = conn
            .query(
                &format!(
                    "SELECT * FROM agent_proposals{where_sql} ORDER BY created_at DESC LIMIT ${limit_idx} OFFSET ${offset_idx}"
                ),
                &params,
            )
            .await?;

        Ok((rows.iter().map(proposal_from_row).collect(), total))
    }

    async fn proposal_stats(
        &self,
        agent_id: Option<&str>,
    ) -> Result<ProposalStats, DatabaseError> {
        let conn = self.conn().await?;
        let rows = match agent_id {
            Some(id) => {
                conn.query(
                    "SELECT status, COUNT(*) FROM agent_proposals WHERE agent_id = $1 GROUP BY status",
                    &[&id],
                )
                .await?
            }
            None => {
                conn.query(
                    "SELECT status, COUNT(*) FROM agent_proposals GROUP BY status",
                    &[],
                )
                .await?
            }
        };

        let mut stats = ProposalStats::default();
        for row in rows {
            let status: String = row.get(0);
            let count: i64 = row.get(1);
            if let Some(s) = ProposalStatus::parse(&status) {
                stats.add(s, count);
            }
        }
        Ok(stats)
    }

    async fn list_proposals_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<Proposal>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                "SELECT * FROM agent_proposals WHERE created_at >= $1 ORDER BY created_at",
                &[&since],
            )
            .await?;
        Ok(rows.iter().map(proposal_from_row).collect())
    }

    async fn expire_stale_proposals(
        &self,
        now: DateTime<Utc>,
        default_ttl_hours: i64,
    ) -> Result<u64, DatabaseError> {
        let conn = self.conn().await?;
        let created_cutoff = now - Duration::hours(default_ttl_hours);
        let n = conn
            .execute(
                r#"
                UPDATE agent_proposals SET status = 'expired'
                WHERE status IN ('pending', 'auto_approved')
                  AND ((expires_at IS NOT NULL AND expires_at <= $1)
                       OR (expires_at IS NULL AND created_at <= $2))
                "#,
                &[&now, &created_cutoff],
            )
            .await?;
        Ok(n)
    }

    async fn list_unapplied_approved(&self, limit: i64) -> Result<Vec<Uuid>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                r#"
                SELECT id FROM agent_proposals
                WHERE status IN ('approved', 'auto_approved') AND applied_at IS NULL
                ORDER BY created_at ASC LIMIT $1
                "#,
                &[&limit],
            )
            .await?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }

    // --- Notification queue ---

    async fn enqueue_notification(
        &self,
        input: &NewNotification,
    ) -> Result<Uuid, DatabaseError> {
        let conn = self.conn().await?;
        let id = Uuid::new_v4();
        conn.execute(
            r#"
            INSERT INTO notification_queue (
                id, channel, slack_user_id, message, blocks, priority,
                status, scheduled_for, max_retries, metadata
            ) VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $8, $9)
            "#,
            &[
                &id,
                &input.channel,
                &input.slack_user_id,
                &input.message,
                &input.blocks,
                &input.priority,
                &input.scheduled_for,
                &input.max_retries,
                &input.metadata,
            ],
        )
        .await?;
        Ok(id)
    }

    async fn due_notifications(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<QueuedNotification>, DatabaseError> {
        let conn = self.conn().await?;
        let rows = conn
            .query(
                r#"
                SELECT * FROM notification_queue
                WHERE status = 'pending' AND scheduled_for <= $1
                ORDER BY priority DESC, created_at ASC
                LIMIT $2
                "#,
                &[&now, &limit],
            )
            .await?;
        Ok(rows.iter().map(notification_from_row).collect())
    }

    async fn mark_notification_sent(
        &self,
        id: Uuid,
        sent_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            "UPDATE notification_queue SET status = 'sent', sent_at = $2, error_message = NULL WHERE id = $1",
            &[&id, &sent_at],
        )
        .await?;
        Ok(())
    }

    async fn mark_notification_attempt(
        &self,
        id: Uuid,
        retry_count: i32,
        error: &str,
        terminal: bool,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            r#"
            UPDATE notification_queue SET
                status = CASE WHEN $4 THEN 'failed' ELSE 'pending' END,
                retry_count = $2,
                error_message = $3
            WHERE id = $1
            "#,
            &[&id, &retry_count, &error, &terminal],
        )
        .await?;
        Ok(())
    }

    // --- API keys ---

    async fn get_principal_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Principal>, DatabaseError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                "SELECT profile_id, role FROM api_keys WHERE token_hash = $1",
                &[&token_hash],
            )
            .await?;
        Ok(row.map(|r| Principal {
            profile_id: r.get("profile_id"),
            role: r.get("role"),
        }))
    }

    async fn insert_api_key(
        &self,
        token_hash: &str,
        profile_id: Uuid,
        role: &str,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn().await?;
        conn.execute(
            "INSERT INTO api_keys (token_hash, profile_id, role) VALUES ($1, $2, $3)",
            &[&token_hash, &profile_id, &role],
        )
        .await?;
        Ok(())
    }
}
