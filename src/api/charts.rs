//! Dashboard chart aggregation over the last seven days.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::agents::{Agent, AgentRun, Proposal, RunStatus};
use crate::api::AppState;
use crate::db::ProposalStats;
use crate::error::ApiError;

const WINDOW_DAYS: i64 = 7;

#[derive(Debug, Default, Serialize)]
pub struct ChartData {
    /// date -> cluster -> summed run cost.
    pub daily_cost: BTreeMap<String, BTreeMap<String, Decimal>>,
    pub run_series: Vec<RunSeriesPoint>,
    pub agent_tokens: Vec<AgentTokenRow>,
    pub proposals_by_agent: BTreeMap<String, ProposalStats>,
}

#[derive(Debug, Serialize)]
pub struct RunSeriesPoint {
    pub date: String,
    pub runs: usize,
    pub errors: usize,
    pub tokens: i64,
}

#[derive(Debug, Serialize)]
pub struct AgentTokenRow {
    pub agent_id: String,
    pub display_name: String,
    pub tokens_used: i64,
    pub budget: i64,
}

pub async fn charts(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let since = Utc::now() - Duration::days(WINDOW_DAYS);
    let agents = state.store.list_agents(None, None).await?;
    let runs = state.store.list_runs_since(since).await?;
    let proposals = state.store.list_proposals_since(since).await?;

    let data = build_charts(&agents, &runs, &proposals, since);
    Ok(Json(serde_json::json!({
        "success": true,
        "charts": data,
    })))
}

/// Fold raw rows into chart series. Days with no activity still appear in
/// the run series so the x axis is dense.
pub fn build_charts(
    agents: &[Agent],
    runs: &[AgentRun],
    proposals: &[Proposal],
    since: DateTime<Utc>,
) -> ChartData {
    let cluster_of: BTreeMap<&str, &str> = agents
        .iter()
        .map(|a| (a.agent_id.as_str(), a.cluster.as_str()))
        .collect();

    let mut data = ChartData::default();

    let mut by_day: BTreeMap<String, (usize, usize, i64)> = BTreeMap::new();
    for offset in 0..=WINDOW_DAYS {
        let day = (since + Duration::days(offset)).format("%Y-%m-%d").to_string();
        by_day.insert(day, (0, 0, 0));
    }

    for run in runs {
        let day = run.started_at.format("%Y-%m-%d").to_string();
        let entry = by_day.entry(day.clone()).or_default();
        entry.0 += 1;
        if run.status == RunStatus::Error {
            entry.1 += 1;
        }
        entry.2 += run.tokens_used;

        let cluster = cluster_of
            .get(run.agent_id.as_str())
            .copied()
            .unwrap_or("unknown");
        *data
            .daily_cost
            .entry(day)
            .or_default()
            .entry(cluster.to_string())
            .or_insert(Decimal::ZERO) += run.cost_usd;
    }

    data.run_series = by_day
        .into_iter()
        .map(|(date, (runs, errors, tokens))| RunSeriesPoint {
            date,
            runs,
            errors,
            tokens,
        })
        .collect();

    data.agent_tokens = agents
        .iter()
        .map(|a| AgentTokenRow {
            agent_id: a.agent_id.clone(),
            display_name: a.display_name.clone(),
            tokens_used: a.daily_tokens_used,
            budget: a.daily_token_budget,
        })
        .collect();

    for proposal in proposals {
        data.proposals_by_agent
            .entry(proposal.agent_id.clone())
            .or_default()
            .add(proposal.status, 1);
    }

    data
}
