//! Slack notification fan-out.
//!
//! Queue items are drained oldest-first within priority, DMs resolved via
//! `conversations.open`, and sent with `chat.postMessage`. A failed send
//! stays `pending` until `max_retries` attempts have been burned, then goes
//! terminal `failed`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::agents::QueuedNotification;
use crate::config::NotifyConfig;
use crate::db::Database;
use crate::error::NotifyError;

const SLACK_API_BASE: &str = "https://slack.com/api";

/// The Slack surface the drain needs. Tests stub this.
#[async_trait]
pub trait SlackApi: Send + Sync {
    /// Resolve a user id to a DM channel id.
    async fn open_dm(&self, user_id: &str) -> Result<String, NotifyError>;

    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        blocks: Option<&serde_json::Value>,
    ) -> Result<(), NotifyError>;
}

/// Slack Web API client.
pub struct SlackClient {
    client: Client,
    bot_token: SecretString,
}

impl SlackClient {
    pub fn new(bot_token: SecretString) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, bot_token }
    }

    async fn call(
        &self,
        endpoint: &str,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, NotifyError> {
        let response = self
            .client
            .post(format!("{SLACK_API_BASE}/{endpoint}"))
            .header(
                "Authorization",
                format!("Bearer {}", self.bot_token.expose_secret()),
            )
            .json(payload)
            .send()
            .await?;

        let parsed: serde_json::Value = response.json().await?;
        if !parsed["ok"].as_bool().unwrap_or(false) {
            let error = parsed["error"].as_str().unwrap_or("unknown_error");
            return Err(NotifyError::Slack(format!("{endpoint}: {error}")));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl SlackApi for SlackClient {
    async fn open_dm(&self, user_id: &str) -> Result<String, NotifyError> {
        let parsed = self
            .call(
                "conversations.open",
                &serde_json::json!({ "users": user_id }),
            )
            .await?;
        parsed["channel"]["id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| {
                NotifyError::Slack("conversations.open: no channel id".to_string())
            })
    }

    async fn post_message(
        &self,
        channel: &str,
        text: &str,
        blocks: Option<&serde_json::Value>,
    ) -> Result<(), NotifyError> {
        let mut payload = serde_json::json!({
            "channel": channel,
            "text": text,
        });
        if let Some(blocks) = blocks {
            payload["blocks"] = blocks.clone();
        }
        self.call("chat.postMessage", &payload).await?;
        Ok(())
    }
}

/// Block Kit layout for an agent alert: header, body, context footer.
pub fn alert_blocks(title: &str, body: &str, source: &str) -> serde_json::Value {
    serde_json::json!([
        {
            "type": "header",
            "text": { "type": "plain_text", "text": title, "emoji": true }
        },
        {
            "type": "section",
            "text": { "type": "mrkdwn", "text": body }
        },
        {
            "type": "context",
            "elements": [
                { "type": "mrkdwn", "text": format!("agent: `{source}`") }
            ]
        }
    ])
}

/// Result of one drain pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DrainOutcome {
    pub processed: usize,
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
}

/// Drain pending queue items due at `now`, priority desc then created asc,
/// capped at the configured batch size. Send failures never abort the batch.
pub async fn drain_notification_queue(
    store: &Arc<dyn Database>,
    slack: &Arc<dyn SlackApi>,
    config: &NotifyConfig,
    now: DateTime<Utc>,
) -> Result<DrainOutcome, NotifyError> {
    let due = store.due_notifications(now, config.batch_size).await?;
    let mut outcome = DrainOutcome {
        processed: due.len(),
        ..Default::default()
    };

    for item in due {
        match deliver(slack, config, &item).await {
            Ok(()) => {
                store.mark_notification_sent(item.id, Utc::now()).await?;
                outcome.sent += 1;
            }
            Err(e) => {
                let attempts = item.retry_count + 1;
                let terminal = attempts >= item.max_retries;
                store
                    .mark_notification_attempt(item.id, attempts, &e.to_string(), terminal)
                    .await?;
                if terminal {
                    tracing::error!(
                        notification_id = %item.id,
                        attempts,
                        error = %e,
                        "notification failed permanently"
                    );
                    outcome.failed += 1;
                } else {
                    tracing::warn!(
                        notification_id = %item.id,
                        attempts,
                        error = %e,
                        "notification send failed, will retry"
                    );
                    outcome.retried += 1;
                }
            }
        }
    }

    tracing::info!(
        processed = outcome.processed,
        sent = outcome.sent,
        retried = outcome.retried,
        failed = outcome.failed,
        "notification queue drained"
    );
    Ok(outcome)
}

async fn deliver(
    slack: &Arc<dyn SlackApi>,
    config: &NotifyConfig,
    item: &QueuedNotification,
) -> Result<(), NotifyError> {
    // An explicit channel wins; a DM is resolved only when none was set.
    let channel = match (&item.channel, &item.slack_user_id) {
        (Some(channel), _) => channel.clone(),
        (None, Some(user_id)) => slack.open_dm(user_id).await?,
        (None, None) => config
            .fallback_channel
            .clone()
            .ok_or(NotifyError::MissingTarget)?,
    };
    let blocks = (!item.blocks.is_null()).then_some(&item.blocks);
    slack.post_message(&channel, &item.message, blocks).await
}
