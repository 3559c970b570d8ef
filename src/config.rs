//! Service configuration, collected from the environment.
//!
//! Secrets stay wrapped in `SecretString` so they never land in debug output
//! or logs. `.env` files are honored via dotenvy (loaded in `main`).

use std::env;

use secrecy::SecretString;

/// Database connection settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    url: String,
    pub pool_size: usize,
}

impl DatabaseConfig {
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

/// Dispatcher and run-executor tuning.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Skip agents whose last run is within this window (double-fire guard).
    pub debounce_minutes: i64,
    /// Hard timeout for a single handler invocation.
    pub run_timeout_secs: u64,
    /// Runs still `running` after this long are swept to `error`.
    pub run_stuck_after_minutes: i64,
}

/// Proposal lifecycle tuning.
#[derive(Debug, Clone)]
pub struct ProposalConfig {
    /// Default TTL for proposals created without an explicit expiry.
    pub ttl_hours: i64,
}

/// Notification queue tuning.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    pub batch_size: i64,
    /// Channel for queue items with no DM target.
    pub fallback_channel: Option<String>,
}

/// Top-level service configuration.
#[derive(Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub dispatch: DispatchConfig,
    pub proposals: ProposalConfig,
    pub notify: NotifyConfig,
    /// Shared secret for the cron endpoints. Unset means crons return 500.
    pub cron_secret: Option<SecretString>,
    /// OpenAI key; presence alone gates the health check.
    pub openai_api_key: Option<SecretString>,
    pub openai_base_url: String,
    /// Slack bot token; presence gates notification sending.
    pub slack_bot_token: Option<SecretString>,
}

impl Config {
    /// Build from environment variables, with defaults for everything
    /// except `DATABASE_URL`.
    pub fn from_env() -> anyhow::Result<Self> {
        let database = DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL is required"))?,
            pool_size: parse_or("DATABASE_POOL_SIZE", 8),
        };

        Ok(Self {
            database,
            http: HttpConfig {
                host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
                port: parse_or("PORT", 8787),
            },
            dispatch: DispatchConfig {
                debounce_minutes: parse_or("DISPATCH_DEBOUNCE_MINUTES", 4),
                run_timeout_secs: parse_or("AGENT_RUN_TIMEOUT_SECS", 120),
                run_stuck_after_minutes: parse_or("RUN_STUCK_AFTER_MINUTES", 30),
            },
            proposals: ProposalConfig {
                ttl_hours: parse_or("PROPOSAL_TTL_HOURS", 72),
            },
            notify: NotifyConfig {
                batch_size: parse_or("NOTIFICATION_BATCH_SIZE", 30),
                fallback_channel: env::var("SLACK_ALERT_CHANNEL").ok(),
            },
            cron_secret: secret_var("CRON_SECRET"),
            openai_api_key: secret_var("OPENAI_API_KEY"),
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            slack_bot_token: secret_var("SLACK_BOT_TOKEN"),
        })
    }

    /// A config suitable for tests: no secrets, default tuning.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://unused".to_string(),
                pool_size: 1,
            },
            http: HttpConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            dispatch: DispatchConfig {
                debounce_minutes: 4,
                run_timeout_secs: 120,
                run_stuck_after_minutes: 30,
            },
            proposals: ProposalConfig { ttl_hours: 72 },
            notify: NotifyConfig {
                batch_size: 30,
                fallback_channel: Some("#agent-alerts".to_string()),
            },
            cron_secret: None,
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            slack_bot_token: None,
        }
    }
}

fn secret_var(name: &str) -> Option<SecretString> {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .map(SecretString::from)
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
