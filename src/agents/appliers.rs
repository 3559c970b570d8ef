//! Proposal appliers.
//!
//! An applier executes the change a proposal describes once it has been
//! approved. Dispatch is by `proposal_type`; a type with no applier is a
//! hard error so a bad type can never be silently marked applied.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::agents::proposals;
use crate::agents::{AgentStatus, Proposal};
use crate::db::{Database, NewNotification};
use crate::error::{ApplyError, DatabaseError};

/// Cap on proposals handled per applier sweep.
const SWEEP_LIMIT: i64 = 50;

/// Execute and mark applied a single approved proposal.
///
/// Returns `false` when the terminal transition was lost to a concurrent
/// applier, in which case the side effect of the winner stands and ours was
/// a duplicate no-op by construction (all built-in appliers are idempotent).
pub async fn apply_proposal(
    store: &Arc<dyn Database>,
    proposal_id: Uuid,
) -> Result<bool, ApplyError> {
    let proposal = store
        .get_proposal(proposal_id)
        .await?
        .ok_or(ApplyError::NotFound(proposal_id))?;

    if !proposals::APPLIABLE.contains(&proposal.status) {
        return Err(ApplyError::NotAppliable {
            id: proposal.id,
            status: proposal.status.as_str().to_string(),
        });
    }

    match proposal.proposal_type.as_str() {
        "agent_status_change" => apply_status_change(store, &proposal).await?,
        "notification" => apply_notification(store, &proposal).await?,
        // Informational reports carry no change; applying is bookkeeping.
        "health_report" => {}
        other => return Err(ApplyError::UnknownType(other.to_string())),
    }

    let won = proposals::mark_applied(store, proposal.id).await?;
    if won {
        tracing::info!(
            proposal_id = %proposal.id,
            proposal_type = %proposal.proposal_type,
            "proposal applied"
        );
    }
    Ok(won)
}

async fn apply_status_change(
    store: &Arc<dyn Database>,
    proposal: &Proposal,
) -> Result<(), ApplyError> {
    let agent_id = proposal
        .detail
        .get("agent_id")
        .and_then(|v| v.as_str())
        .or(proposal.target_entity_id.as_deref())
        .ok_or(ApplyError::MissingField("agent_id"))?;
    let status = proposal
        .detail
        .get("status")
        .and_then(|v| v.as_str())
        .and_then(AgentStatus::parse)
        .ok_or(ApplyError::MissingField("status"))?;

    if !store.set_agent_status(agent_id, status).await? {
        return Err(ApplyError::Failed(format!(
            "agent \"{agent_id}\" not in registry"
        )));
    }
    Ok(())
}

async fn apply_notification(
    store: &Arc<dyn Database>,
    proposal: &Proposal,
) -> Result<(), ApplyError> {
    let message = proposal
        .detail
        .get("message")
        .and_then(|v| v.as_str())
        .ok_or(ApplyError::MissingField("message"))?;

    let input = NewNotification {
        channel: proposal
            .detail
            .get("channel")
            .and_then(|v| v.as_str())
            .map(String::from),
        slack_user_id: proposal
            .detail
            .get("slack_user_id")
            .and_then(|v| v.as_str())
            .map(String::from),
        message: message.to_string(),
        blocks: proposal
            .detail
            .get("blocks")
            .cloned()
            .unwrap_or(serde_json::Value::Null),
        priority: proposal
            .detail
            .get("priority")
            .and_then(|v| v.as_i64())
            .unwrap_or(1) as i16,
        scheduled_for: Utc::now(),
        max_retries: 3,
        metadata: serde_json::json!({ "proposal_id": proposal.id }),
    };
    store.enqueue_notification(&input).await?;
    Ok(())
}

/// Sweep approved/auto-approved proposals that were never applied. Failures
/// are logged per proposal and do not stop the sweep. Returns the count
/// applied.
pub async fn process_approved_proposals(
    store: &Arc<dyn Database>,
) -> Result<u64, DatabaseError> {
    let ids = store.list_unapplied_approved(SWEEP_LIMIT).await?;
    let mut applied = 0;
    for id in ids {
        match apply_proposal(store, id).await {
            Ok(true) => applied += 1,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(proposal_id = %id, error = %e, "applier failed");
            }
        }
    }
    Ok(applied)
}
