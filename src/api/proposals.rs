//! Proposal review endpoints.

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::agents::{ProposalStatus, appliers, proposals};
use crate::api::AppState;
use crate::db::{Principal, ProposalFilter};
use crate::error::ApiError;

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 200;

#[derive(Deserialize, Default)]
pub struct ProposalListQuery {
    pub agent_id: Option<String>,
    pub status: Option<String>,
    pub proposal_type: Option<String>,
    pub target_employee_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_proposals(
    State(state): State<AppState>,
    Query(query): Query<ProposalListQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = match query.status.as_deref() {
        Some(s) => Some(
            ProposalStatus::parse(s)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown status \"{s}\"")))?,
        ),
        None => None,
    };

    let filter = ProposalFilter {
        agent_id: query.agent_id,
        status,
        proposal_type: query.proposal_type,
        target_employee_id: query.target_employee_id,
        limit: query.limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE),
        offset: query.offset.unwrap_or(0).max(0),
    };
    let (proposals, total) = state.store.list_proposals(&filter).await?;
    let stats = state.store.proposal_stats(filter.agent_id.as_deref()).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "proposals": proposals,
        "total": total,
        "stats": stats,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    Approve,
    Reject,
    Resolve,
}

#[derive(Deserialize)]
pub struct ReviewBody {
    pub action: ReviewAction,
    pub notes: Option<String>,
}

/// Apply a review decision. `approve` also runs the applier so the admin
/// sees the change land (or fail) synchronously.
pub async fn review_proposal(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(body): Json<ReviewBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let proposal = state
        .store
        .get_proposal(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Proposal {id} not found")))?;

    let notes = body.notes.as_deref();
    let (verb, past, moved) = match body.action {
        ReviewAction::Approve => (
            "approve",
            "approved",
            proposals::approve(&state.store, id, principal.profile_id, notes).await?,
        ),
        ReviewAction::Reject => (
            "reject",
            "rejected",
            proposals::reject(&state.store, id, principal.profile_id, notes).await?,
        ),
        ReviewAction::Resolve => (
            "resolve",
            "resolved",
            proposals::resolve(&state.store, id, principal.profile_id, notes).await?,
        ),
    };

    if !moved {
        return Err(ApiError::BadRequest(format!(
            "cannot {verb} a proposal in status \"{}\"",
            proposal.status
        )));
    }

    let mut response = serde_json::json!({
        "success": true,
        "action": past,
        "proposal_id": id,
    });

    if matches!(body.action, ReviewAction::Approve) {
        match appliers::apply_proposal(&state.store, id).await {
            Ok(applied) => response["applied"] = serde_json::json!(applied),
            Err(e) => {
                tracing::warn!(proposal_id = %id, error = %e, "applier failed after approval");
                response["applied"] = serde_json::json!(false);
                response["apply_error"] = serde_json::json!(e.to_string());
            }
        }
    }

    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct BulkResolveBody {
    pub agent_id: Option<String>,
    /// Restrict to one source status; must be `pending` or `auto_approved`.
    pub status: Option<String>,
}

pub async fn bulk_resolve(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<BulkResolveBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let status = match body.status.as_deref() {
        Some(s) => {
            let parsed = ProposalStatus::parse(s)
                .filter(|s| proposals::REVIEWABLE.contains(s))
                .ok_or_else(|| {
                    ApiError::BadRequest(format!(
                        "status must be \"pending\" or \"auto_approved\", got \"{s}\""
                    ))
                })?;
            Some(parsed)
        }
        None => None,
    };

    let resolved = proposals::bulk_resolve(
        &state.store,
        body.agent_id.as_deref(),
        status,
        principal.profile_id,
    )
    .await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "resolved": resolved,
    })))
}
