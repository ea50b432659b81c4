use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use trustswarm::config::{AppConfig, LoggingConfig};
use trustswarm::error::Result;
use trustswarm::storage::{AgentFilter, PostgresStore, Storage};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "trustswarm", about = "Real-time coordination and trust scoring for forecasting agents", version)]
struct Cli {
    /// Configuration directory
    #[arg(long, default_value = "config")]
    config_dir: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the coordination server (default)
    Serve,
    /// Resolve a prediction against its actual outcome
    Resolve {
        /// Prediction id to resolve
        prediction_id: Uuid,
        /// Actual outcome (true/false)
        #[arg(value_parser = clap::value_parser!(bool))]
        outcome: bool,
    },
    /// Show one agent's trust score and resolution history
    Trust {
        /// Agent id to inspect
        agent_id: String,
    },
    /// Show the most trusted active agents
    Leaderboard {
        /// Number of agents to show
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load_from(&cli.config_dir)?;
    init_logging(&config.logging);
    if let Err(errors) = config.validate() {
        for error in &errors {
            tracing::error!("config: {error}");
        }
        return Err(trustswarm::SwarmError::Internal(
            "invalid configuration".to_string(),
        ));
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let store =
                PostgresStore::new(&config.database.url, config.database.max_connections).await?;
            store.migrate().await?;
            trustswarm::start_server(Arc::new(store), &config).await?;
        }
        Commands::Resolve {
            prediction_id,
            outcome,
        } => {
            let store =
                PostgresStore::new(&config.database.url, config.database.max_connections).await?;
            let prediction = store.resolve_prediction(prediction_id, outcome).await?;
            println!(
                "resolved {} (outcome={}, brier={:.4}, correct={})",
                prediction.id,
                outcome,
                prediction.brier_score.unwrap_or_default(),
                prediction.was_correct.unwrap_or_default(),
            );
        }
        Commands::Trust { agent_id } => {
            let store =
                PostgresStore::new(&config.database.url, config.database.max_connections).await?;
            let agent = store
                .get_agent_by_id(&agent_id)
                .await?
                .ok_or_else(|| trustswarm::SwarmError::AgentNotFound(agent_id.clone()))?;
            let stats = store.prediction_stats(&agent_id).await?;
            let trust = store.compute_trust_score(&agent_id).await?;
            println!("agent:        {} ({})", agent.id, agent.name);
            println!("trust score:  {trust:.4}");
            println!("resolved:     {}", stats.resolved_count);
            println!("correct:      {}", stats.correct_count);
            println!("avg brier:    {:.4}", stats.avg_brier_score);
        }
        Commands::Leaderboard { limit } => {
            let store =
                PostgresStore::new(&config.database.url, config.database.max_connections).await?;
            let agents = store
                .query_agents(&AgentFilter {
                    status: Some(trustswarm::AgentStatus::Active),
                    limit: Some(limit.max(1)),
                    ..AgentFilter::default()
                })
                .await?;

            if agents.is_empty() {
                println!("no active agents");
            } else {
                println!("{:<24} {:>8}  specializations", "agent", "trust");
                for agent in agents {
                    println!(
                        "{:<24} {:>8.4}  {}",
                        agent.id,
                        agent.trust_score,
                        agent.specializations.join(", ")
                    );
                }
            }
        }
    }

    info!("done");
    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},trustswarm=debug,sqlx=warn", config.level))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
