//! Proposal lifecycle.
//!
//! Every transition is a conditional update guarded on the expected current
//! status, so two concurrent reviewers (or a reviewer racing the expiry
//! sweep) cannot both win. The loser gets `false` and the API layer turns
//! that into a conflict-style 400.
//!
//! ```text
//! pending ----------> approved ------> applied (apply or resolve)
//!    |  \----------> rejected
//!    |  \----------> auto_approved --> applied
//!    |                   |  \--------> rejected
//!    \-----> expired <---/
//! ```

use std::sync::Arc;

use uuid::Uuid;

use crate::agents::{Proposal, ProposalStatus, RiskLevel};
use crate::db::{Database, NewProposal, ProposalStats, ReviewStamp};
use crate::error::DatabaseError;

const AUTO_APPROVE_NOTE: &str = "Auto-approved (low risk)";

/// States a human review (approve/reject) may start from.
pub const REVIEWABLE: &[ProposalStatus] = &[ProposalStatus::Pending, ProposalStatus::AutoApproved];

/// States an applier may move to `applied` from.
pub const APPLIABLE: &[ProposalStatus] = &[ProposalStatus::Approved, ProposalStatus::AutoApproved];

/// States a manual resolve may close from. Wider than [`REVIEWABLE`]:
/// an approved proposal whose synchronous apply failed is still resolvable.
pub const RESOLVABLE: &[ProposalStatus] = &[
    ProposalStatus::Pending,
    ProposalStatus::AutoApproved,
    ProposalStatus::Approved,
];

/// Create a proposal. Low-risk proposals are auto-approved immediately;
/// anything else waits for review. Proposals with no explicit expiry get
/// `now + default_ttl_hours`.
///
/// Returns the proposal and whether it was auto-approved.
pub async fn create_proposal(
    store: &Arc<dyn Database>,
    input: NewProposal,
    default_ttl_hours: i64,
) -> Result<(Proposal, bool), DatabaseError> {
    let mut input = input;
    if input.expires_at.is_none() {
        input.expires_at = Some(chrono::Utc::now() + chrono::Duration::hours(default_ttl_hours));
    }
    let auto = input.risk_level == RiskLevel::Low;
    let mut proposal = store.insert_proposal(&input).await?;

    if auto {
        let moved = store
            .transition_proposal(
                proposal.id,
                &[ProposalStatus::Pending],
                ProposalStatus::AutoApproved,
                ReviewStamp {
                    notes: Some(AUTO_APPROVE_NOTE),
                    ..Default::default()
                },
            )
            .await?;
        if moved {
            proposal.status = ProposalStatus::AutoApproved;
            proposal.review_notes = Some(AUTO_APPROVE_NOTE.to_string());
        }
    }

    tracing::info!(
        proposal_id = %proposal.id,
        agent_id = %proposal.agent_id,
        proposal_type = %proposal.proposal_type,
        auto_approved = auto,
        "proposal created"
    );
    Ok((proposal, auto))
}

/// Approve a pending proposal. Auto-approved ones need no further approval.
pub async fn approve(
    store: &Arc<dyn Database>,
    id: Uuid,
    reviewed_by: Uuid,
    notes: Option<&str>,
) -> Result<bool, DatabaseError> {
    store
        .transition_proposal(
            id,
            &[ProposalStatus::Pending],
            ProposalStatus::Approved,
            ReviewStamp {
                reviewed_by: Some(reviewed_by),
                notes,
                stamp_applied: false,
            },
        )
        .await
}

/// Reject a proposal that has not yet been applied.
pub async fn reject(
    store: &Arc<dyn Database>,
    id: Uuid,
    reviewed_by: Uuid,
    notes: Option<&str>,
) -> Result<bool, DatabaseError> {
    store
        .transition_proposal(
            id,
            REVIEWABLE,
            ProposalStatus::Rejected,
            ReviewStamp {
                reviewed_by: Some(reviewed_by),
                notes,
                stamp_applied: false,
            },
        )
        .await
}

/// Mark a proposal handled without running an applier. Used for
/// informational proposals the admin has acted on out of band.
pub async fn resolve(
    store: &Arc<dyn Database>,
    id: Uuid,
    reviewed_by: Uuid,
    notes: Option<&str>,
) -> Result<bool, DatabaseError> {
    store
        .transition_proposal(
            id,
            RESOLVABLE,
            ProposalStatus::Applied,
            ReviewStamp {
                reviewed_by: Some(reviewed_by),
                notes,
                stamp_applied: true,
            },
        )
        .await
}

/// Terminal transition after an applier has executed the change.
pub async fn mark_applied(store: &Arc<dyn Database>, id: Uuid) -> Result<bool, DatabaseError> {
    store
        .transition_proposal(
            id,
            APPLIABLE,
            ProposalStatus::Applied,
            ReviewStamp {
                stamp_applied: true,
                ..Default::default()
            },
        )
        .await
}

/// Batch-resolve open proposals, optionally scoped to one agent and to a
/// single source status. Defaults to everything still awaiting action.
pub async fn bulk_resolve(
    store: &Arc<dyn Database>,
    agent_id: Option<&str>,
    status: Option<ProposalStatus>,
    reviewed_by: Uuid,
) -> Result<u64, DatabaseError> {
    let from: Vec<ProposalStatus> = match status {
        Some(s) => vec![s],
        None => REVIEWABLE.to_vec(),
    };
    store
        .bulk_resolve_proposals(agent_id, &from, reviewed_by)
        .await
}

pub async fn stats(
    store: &Arc<dyn Database>,
    agent_id: Option<&str>,
) -> Result<ProposalStats, DatabaseError> {
    store.proposal_stats(agent_id).await
}
