//! OpenAI chat-completions client.
//!
//! The client refuses to start a call for an agent that is already over its
//! daily token budget. Usage itself is reported back in the completion and
//! charged to the registry by the run executor when the run completes.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::LlmError;

const MAX_RETRIES: u32 = 2;
const RETRY_BASE_MS: u64 = 1000;

/// Model selection by workload, mapped to concrete model ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Reasoning,
    Fast,
}

impl ModelTier {
    pub fn model_id(self) -> &'static str {
        match self {
            ModelTier::Reasoning => "gpt-4o",
            ModelTier::Fast => "gpt-4o-mini",
        }
    }

    /// Blended input/output cost per 1K tokens, in USD.
    fn cost_per_1k(self) -> Decimal {
        match self {
            ModelTier::Reasoning => dec!(0.00625),
            ModelTier::Fast => dec!(0.000375),
        }
    }
}

/// A single completion request on behalf of an agent.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub agent_id: String,
    pub system: String,
    pub user: String,
    pub tier: ModelTier,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask for `response_format: json_object`.
    pub json: bool,
}

impl ChatRequest {
    pub fn new(
        agent_id: impl Into<String>,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            system: system.into(),
            user: user.into(),
            tier: ModelTier::Fast,
            temperature: None,
            max_tokens: None,
            json: false,
        }
    }

    pub fn tier(mut self, tier: ModelTier) -> Self {
        self.tier = tier;
        self
    }

    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }
}

/// Completion result with the accounting the run record needs.
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    pub tokens_used: i64,
    pub cost_usd: Decimal,
    pub model: String,
    pub duration_ms: i64,
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    usage: WireUsage,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
}

#[derive(Deserialize)]
struct WireChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireUsage {
    #[serde(default)]
    total_tokens: i64,
}

/// OpenAI chat-completions client.
pub struct LlmClient {
    client: Client,
    api_key: Option<SecretString>,
    base_url: String,
}

impl LlmClient {
    pub fn new(api_key: Option<SecretString>, base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key,
            base_url: base_url.into(),
        }
    }

    /// Whether an API key is present. Feeds the health endpoint.
    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Run a completion for an agent. The budget gate reads the registry;
    /// token usage comes back in the result for the caller to account.
    pub async fn complete(
        &self,
        store: &Arc<dyn Database>,
        req: &ChatRequest,
    ) -> Result<ChatCompletion, LlmError> {
        let key = self.api_key.as_ref().ok_or(LlmError::NotConfigured)?;

        self.check_budget(store, &req.agent_id).await?;

        let body = WireRequest {
            model: req.tier.model_id(),
            messages: vec![
                WireMessage {
                    role: "system",
                    content: &req.system,
                },
                WireMessage {
                    role: "user",
                    content: &req.user,
                },
            ],
            temperature: req.temperature,
            max_tokens: req.max_tokens,
            response_format: req
                .json
                .then(|| serde_json::json!({ "type": "json_object" })),
        };

        let url = format!(
            "{}/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let started = Instant::now();

        let mut last_error = String::new();
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = RETRY_BASE_MS * 2u64.pow(attempt - 1);
                tokio::time::sleep(std::time::Duration::from_millis(backoff)).await;
            }

            let response = self
                .client
                .post(&url)
                .header(
                    "Authorization",
                    format!("Bearer {}", key.expose_secret()),
                )
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if status.as_u16() == 429 || status.is_server_error() {
                let text = response.text().await.unwrap_or_default();
                tracing::warn!(
                    agent_id = %req.agent_id,
                    status = status.as_u16(),
                    attempt,
                    "retryable OpenAI error"
                );
                last_error = format!("HTTP {status}: {text}");
                continue;
            }
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(LlmError::Api {
                    status: status.as_u16(),
                    body: text,
                });
            }

            let parsed: WireResponse = response.json().await?;
            let content = parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| {
                    LlmError::InvalidResponse("no choices in completion".to_string())
                })?;

            let tokens_used = parsed.usage.total_tokens;
            let cost_usd =
                req.tier.cost_per_1k() * Decimal::from(tokens_used) / dec!(1000);

            return Ok(ChatCompletion {
                content,
                tokens_used,
                cost_usd,
                model: req.tier.model_id().to_string(),
                duration_ms: started.elapsed().as_millis() as i64,
            });
        }

        Err(LlmError::Exhausted {
            attempts: MAX_RETRIES + 1,
            last: last_error,
        })
    }

    /// Refuse calls for agents at or over their daily budget. Usage counted
    /// before the last reset day is stale and treated as zero; the next
    /// budget-reset sweep will zero the column itself.
    async fn check_budget(
        &self,
        store: &Arc<dyn Database>,
        agent_id: &str,
    ) -> Result<(), LlmError> {
        let Some(agent) = store.get_agent(agent_id).await? else {
            return Ok(());
        };
        let used = if agent.budget_reset_at.date_naive() < Utc::now().date_naive() {
            0
        } else {
            agent.daily_tokens_used
        };
        if used >= agent.daily_token_budget {
            return Err(LlmError::OverBudget {
                agent_id: agent_id.to_string(),
                used,
                budget: agent.daily_token_budget,
            });
        }
        Ok(())
    }
}
