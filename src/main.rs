use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use vetgrid::agents::{Agent, AgentStatus, HandlerRegistry};
use vetgrid::api::{self, AppState, auth};
use vetgrid::config::Config;
use vetgrid::db::Database;
use vetgrid::db::postgres::Store;
use vetgrid::llm::LlmClient;
use vetgrid::notify::{SlackApi, SlackClient};

#[derive(Parser)]
#[command(name = "vetgrid", about = "Agent dispatch and proposal workflow service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run migrations and serve the admin/cron API (default).
    Serve,
    /// Run pending database migrations and exit.
    Migrate,
    /// Register or update an agent definition.
    RegisterAgent {
        #[arg(long)]
        agent_id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        cluster: String,
        #[arg(long)]
        description: Option<String>,
        /// 5-field cron expression; omit for event-only agents.
        #[arg(long)]
        schedule: Option<String>,
        #[arg(long, default_value_t = 100_000)]
        budget: i64,
        /// JSON config blob (event subscriptions, handler tuning).
        #[arg(long, default_value = "{}")]
        config: String,
    },
    /// Mint an admin API token. The token is printed once and only its
    /// hash is stored.
    CreateApiKey {
        #[arg(long)]
        profile_id: Uuid,
        #[arg(long, default_value = "admin")]
        role: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let store = Store::new(&config.database)
        .await
        .context("connecting to database")?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            store.run_migrations().await?;
            serve(config, store).await
        }
        Command::Migrate => {
            store.run_migrations().await?;
            tracing::info!("migrations up to date");
            Ok(())
        }
        Command::RegisterAgent {
            agent_id,
            name,
            cluster,
            description,
            schedule,
            budget,
            config: config_json,
        } => {
            let parsed: serde_json::Value =
                serde_json::from_str(&config_json).context("parsing --config")?;
            let now = chrono::Utc::now();
            let agent = Agent {
                agent_id: agent_id.clone(),
                display_name: name,
                cluster,
                description,
                status: AgentStatus::Active,
                schedule_cron: schedule,
                last_run_at: None,
                last_run_status: None,
                last_run_duration_ms: None,
                daily_token_budget: budget,
                daily_tokens_used: 0,
                budget_reset_at: now,
                consecutive_errors: 0,
                config: parsed,
                created_at: now,
                updated_at: now,
            };
            store.upsert_agent(&agent).await?;
            println!("registered agent {agent_id}");
            Ok(())
        }
        Command::CreateApiKey { profile_id, role } => {
            let token = auth::generate_token();
            store
                .insert_api_key(&auth::hash_token(&token), profile_id, &role)
                .await?;
            println!("{token}");
            Ok(())
        }
    }
}

async fn serve(config: Config, store: Store) -> anyhow::Result<()> {
    let store: Arc<dyn Database> = Arc::new(store);
    let llm = Arc::new(LlmClient::new(
        config.openai_api_key.clone(),
        config.openai_base_url.clone(),
    ));
    let slack: Option<Arc<dyn SlackApi>> = config
        .slack_bot_token
        .clone()
        .map(|token| Arc::new(SlackClient::new(token)) as _);

    if !llm.is_configured() {
        tracing::warn!("OPENAI_API_KEY unset; LLM-backed handlers will refuse to run");
    }
    if slack.is_none() {
        tracing::warn!("SLACK_BOT_TOKEN unset; notification drain is disabled");
    }

    let state = AppState {
        store,
        handlers: Arc::new(HandlerRegistry::builtin()),
        llm,
        slack,
        config: Arc::new(config),
    };
    api::serve(state).await
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,vetgrid=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}
