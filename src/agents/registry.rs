//! Agent registry reads and cron schedule matching.
//!
//! The registry is the source of truth for which agents exist and when they
//! run. Mutation happens through the run executor, the budget reset and the
//! supervisor auto-pause; everything here is read-only.

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use cron::Schedule;

use crate::agents::{Agent, AgentStatus};
use crate::db::Database;
use crate::error::{AgentError, DatabaseError};

pub async fn list_agents(
    store: &Arc<dyn Database>,
    status: Option<AgentStatus>,
    cluster: Option<&str>,
) -> Result<Vec<Agent>, DatabaseError> {
    store.list_agents(status, cluster).await
}

/// Fetch an agent or fail with NotFound.
pub async fn require_agent(
    store: &Arc<dyn Database>,
    agent_id: &str,
) -> Result<Agent, AgentError> {
    store
        .get_agent(agent_id)
        .await?
        .ok_or_else(|| AgentError::NotFound(agent_id.to_string()))
}

/// Parse a 5-field cron expression. The `cron` crate wants a seconds field,
/// so one is prepended before parsing.
pub fn parse_schedule(expr: &str) -> Option<Schedule> {
    let expr = expr.trim();
    if expr.split_whitespace().count() != 5 {
        return None;
    }
    Schedule::from_str(&format!("0 {expr}")).ok()
}

/// Whether `agent` is scheduled for the minute containing `now`.
///
/// Side-effect free: debounce against `last_run_at` is the dispatcher's job.
pub fn is_agent_due(agent: &Agent, now: DateTime<Utc>) -> bool {
    if agent.status != AgentStatus::Active {
        return false;
    }
    let Some(expr) = agent.schedule_cron.as_deref() else {
        return false;
    };
    let Some(schedule) = parse_schedule(expr) else {
        tracing::warn!(agent_id = %agent.agent_id, cron = expr, "unparseable cron expression");
        return false;
    };
    let Some(minute) = now.with_second(0).and_then(|t| t.with_nanosecond(0)) else {
        return false;
    };
    schedule.includes(minute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::mem::agent_fixture;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 5, h, m, 17).unwrap()
    }

    #[test]
    fn every_five_minutes_matches_on_the_boundary() {
        let agent = agent_fixture("payroll_watchdog");
        assert!(is_agent_due(&agent, at(9, 0)));
        assert!(is_agent_due(&agent, at(9, 25)));
        assert!(!is_agent_due(&agent, at(9, 3)));
    }

    #[test]
    fn daily_schedule_matches_only_its_minute() {
        let mut agent = agent_fixture("shift_planner");
        agent.schedule_cron = Some("30 6 * * *".to_string());
        assert!(is_agent_due(&agent, at(6, 30)));
        assert!(!is_agent_due(&agent, at(6, 31)));
        assert!(!is_agent_due(&agent, at(7, 30)));
    }

    #[test]
    fn paused_and_unscheduled_agents_are_never_due() {
        let mut paused = agent_fixture("payroll_watchdog");
        paused.status = AgentStatus::Paused;
        assert!(!is_agent_due(&paused, at(9, 0)));

        let mut unscheduled = agent_fixture("event_only");
        unscheduled.schedule_cron = None;
        assert!(!is_agent_due(&unscheduled, at(9, 0)));
    }

    #[test]
    fn garbage_expression_is_not_due() {
        let mut agent = agent_fixture("broken");
        agent.schedule_cron = Some("every five minutes".to_string());
        assert!(!is_agent_due(&agent, at(9, 0)));
    }

    #[test]
    fn seconds_in_the_current_minute_do_not_matter() {
        let agent = agent_fixture("payroll_watchdog");
        let now = Utc.with_ymd_and_hms(2026, 3, 5, 10, 15, 59).unwrap();
        assert!(is_agent_due(&agent, now));
    }
}
