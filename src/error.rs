//! Error types for the agent core.
//!
//! Each failure domain gets its own enum; the HTTP layer folds them into
//! `ApiError`, which carries the status-code taxonomy the admin UI relies on.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("database query failed: {0}")]
    Query(#[from] tokio_postgres::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("migration failed: {0}")]
    Migration(String),
}

impl From<deadpool_postgres::PoolError> for DatabaseError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        DatabaseError::Pool(e.to_string())
    }
}

/// Errors from the LLM client.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("OPENAI_API_KEY not configured")]
    NotConfigured,

    #[error("agent \"{agent_id}\" over daily token budget ({used}/{budget})")]
    OverBudget {
        agent_id: String,
        used: i64,
        budget: i64,
    },

    #[error("OpenAI API {status}: {body}")]
    Api { status: u16, body: String },

    #[error("OpenAI request failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("invalid completion response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Errors from agent run execution.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent \"{0}\" not found in registry")]
    NotFound(String),

    #[error("agent \"{0}\" is disabled")]
    Disabled(String),

    #[error("agent \"{agent_id}\" over daily token budget ({used}/{budget})")]
    OverBudget {
        agent_id: String,
        used: i64,
        budget: i64,
    },

    #[error("no handler registered for agent \"{0}\"")]
    HandlerMissing(String),

    #[error("agent \"{agent_id}\" timed out after {secs}s")]
    Timeout { agent_id: String, secs: u64 },

    #[error("handler failed: {0}")]
    Handler(String),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Errors from proposal appliers.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("proposal {0} not found")]
    NotFound(uuid::Uuid),

    #[error("no applier registered for proposal type \"{0}\"")]
    UnknownType(String),

    #[error("proposal {id} is {status}, not appliable")]
    NotAppliable { id: uuid::Uuid, status: String },

    #[error("proposal detail missing \"{0}\"")]
    MissingField(&'static str),

    #[error("applier failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Errors from the notification fan-out.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification has no channel or slack_user_id target")]
    MissingTarget,

    #[error("Slack API error: {0}")]
    Slack(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// HTTP-facing error with the status-code taxonomy of the admin API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("server configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Config(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({
            "success": false,
            "error": self.to_string(),
        }));
        (status, body).into_response()
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        tracing::error!("database error surfaced to API: {}", e);
        ApiError::Internal("database error".to_string())
    }
}

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        match e {
            AgentError::NotFound(id) => ApiError::NotFound(format!("Agent \"{id}\" not found")),
            AgentError::Disabled(id) => ApiError::BadRequest(format!("Agent \"{id}\" is disabled")),
            other => ApiError::Internal(format!("Agent run failed: {other}")),
        }
    }
}

impl From<ApplyError> for ApiError {
    fn from(e: ApplyError) -> Self {
        match e {
            ApplyError::NotFound(id) => ApiError::NotFound(format!("Proposal {id} not found")),
            ApplyError::Database(db) => db.into(),
            other => ApiError::BadRequest(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_status_mapping() {
        assert_eq!(
            ApiError::Unauthorized("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Config("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn agent_error_folds_to_api_taxonomy() {
        let e: ApiError = AgentError::NotFound("gap_analyzer".into()).into();
        assert_eq!(e.status(), StatusCode::NOT_FOUND);

        let e: ApiError = AgentError::Disabled("gap_analyzer".into()).into();
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);
    }
}
