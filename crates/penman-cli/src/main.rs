mod config;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use config::PenmanConfig;
use penman_core::{
    Agent, AgentStatus, Autonomy, CalendarEntry, NewTask, Strategy, TaskId, TaskKind, TaskStatus,
};
use penman_orchestrator::{Orchestrator, SweepScheduler};
use penman_pipeline::{CommandGenerator, Generator, ScriptedGenerator};
use penman_store::SqliteStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "penman", about = "Penman — autonomous content task orchestration")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "penman.toml")]
    config: PathBuf,

    /// SQLite database path (overrides config)
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage agents
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },
    /// Queue a task for an agent
    Enqueue {
        agent_id: String,
        /// Task payload as JSON
        #[arg(long, default_value = "{}")]
        payload: String,
        #[arg(short, long, default_value_t = 0)]
        priority: i32,
        #[arg(long, default_value = "write")]
        kind: TaskKind,
    },
    /// Queue write tasks from a JSON array of calendar entries
    Schedule { agent_id: String, file: PathBuf },
    /// Run one sweep for an agent
    Run {
        agent_id: String,
        #[arg(short, long, default_value_t = 5)]
        max_tasks: usize,
        /// Use a scripted generator that always succeeds
        #[arg(long)]
        dry_run: bool,
    },
    /// Fire sweeps from the configured triggers until interrupted
    Watch {
        #[arg(long)]
        dry_run: bool,
    },
    /// Remove a queued or failed task
    Cancel { task_id: TaskId },
    /// Approve a task in review
    Approve { task_id: TaskId },
    /// Reject a task in review
    Reject {
        task_id: TaskId,
        #[arg(short, long)]
        reason: String,
    },
    /// Queue counts for an agent
    Status { agent_id: String },
    /// Recompute an agent's metrics
    Metrics { agent_id: String },
    /// List an agent's tasks, or show one task
    Tasks {
        agent_id: String,
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long)]
        id: Option<TaskId>,
    },
    /// Requeue or fail tasks stuck in running
    Recover { agent_id: String },
    /// Re-tune an agent's strategy from its metrics
    Adjust { agent_id: String },
}

#[derive(Subcommand)]
enum AgentAction {
    /// Create or replace an agent
    Add(AddAgent),
    /// List agents
    List,
    /// Stop sweeping an agent until resumed
    Pause { agent_id: String },
    /// Make a paused or stopped agent sweepable again
    Resume { agent_id: String },
    /// Retire an agent
    Stop { agent_id: String },
}

#[derive(Args)]
struct AddAgent {
    agent_id: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long, default_value = "")]
    niche: String,
    /// Maximum simultaneously running tasks
    #[arg(long, default_value_t = 2)]
    concurrency: usize,
    #[arg(long, default_value_t = 3)]
    articles_per_week: u32,
    #[arg(long, default_value_t = 75.0)]
    quality_threshold: f64,
    /// Let publish steps run without review
    #[arg(long)]
    auto_publish: bool,
}

impl AddAgent {
    fn into_agent(self) -> Agent {
        let name = self.name.unwrap_or_else(|| self.agent_id.clone());
        Agent::new(self.agent_id, name)
            .with_concurrency_limit(self.concurrency)
            .with_strategy(Strategy {
                niche: self.niche,
                articles_per_week: self.articles_per_week,
                quality_threshold: self.quality_threshold,
                ..Strategy::default()
            })
            .with_autonomy(Autonomy {
                auto_publish: self.auto_publish,
                ..Autonomy::default()
            })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let cli = Cli::parse();
    let config = PenmanConfig::load(&cli.config).await?;
    let db_path = cli.db.clone().unwrap_or_else(|| config.database_path());

    let dry_run = match &cli.command {
        Commands::Run { dry_run, .. } | Commands::Watch { dry_run } => Some(*dry_run),
        _ => None,
    };
    let generator = build_generator(&config, dry_run)?;

    let store = Arc::new(
        SqliteStore::open(&db_path)
            .with_context(|| format!("Failed to open store '{}'", db_path.display()))?,
    );
    let orch = Arc::new(Orchestrator::new(
        store,
        generator,
        config.pipelines()?,
        config.orchestrator.clone(),
    ));

    match cli.command {
        Commands::Agent { action } => match action {
            AgentAction::Add(add) => {
                let agent = add.into_agent();
                let id = agent.id.clone();
                orch.register_agent(agent).await?;
                println!("Agent '{id}' saved.");
            }
            AgentAction::List => {
                let agents = orch.list_agents().await?;
                if agents.is_empty() {
                    println!("No agents. Add one with `penman agent add <id>`.");
                }
                for agent in &agents {
                    let last_run = agent
                        .last_run_at
                        .map_or_else(|| "never".to_string(), |t| t.to_rfc3339());
                    println!(
                        "  {} ({}) — {}, limit {}, last run {last_run}",
                        agent.id, agent.name, agent.status, agent.concurrency_limit
                    );
                }
            }
            AgentAction::Pause { agent_id } => {
                orch.set_agent_status(&agent_id, AgentStatus::Paused).await?;
                println!("Agent '{agent_id}' paused.");
            }
            AgentAction::Resume { agent_id } => {
                orch.set_agent_status(&agent_id, AgentStatus::Active).await?;
                println!("Agent '{agent_id}' resumed.");
            }
            AgentAction::Stop { agent_id } => {
                orch.set_agent_status(&agent_id, AgentStatus::Stopped).await?;
                println!("Agent '{agent_id}' stopped.");
            }
        },
        Commands::Enqueue {
            agent_id,
            payload,
            priority,
            kind,
        } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("--payload must be valid JSON")?;
            let id = orch
                .submit(
                    NewTask::new(agent_id, payload)
                        .with_kind(kind)
                        .with_priority(priority),
                )
                .await?;
            println!("{id}");
        }
        Commands::Schedule { agent_id, file } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read '{}'", file.display()))?;
            let entries: Vec<CalendarEntry> =
                serde_json::from_str(&raw).context("Calendar must be a JSON array of entries")?;
            for id in orch.schedule(&agent_id, &entries).await? {
                println!("{id}");
            }
        }
        Commands::Run {
            agent_id,
            max_tasks,
            ..
        } => {
            let processed = orch.run_loop(&agent_id, max_tasks).await?;
            println!("Processed {processed} task(s).");
        }
        Commands::Watch { .. } => {
            let scheduler = SweepScheduler::new(config.triggers);
            scheduler.validate()?;
            info!(
                triggers = scheduler.enabled_triggers().len(),
                "Watching sweep triggers"
            );
            let handle = scheduler.start(orch.clone());
            tokio::signal::ctrl_c().await?;
            info!("Interrupted, stopping triggers");
            handle.abort();
        }
        Commands::Cancel { task_id } => {
            orch.cancel(task_id).await?;
            println!("Task {task_id} cancelled.");
        }
        Commands::Approve { task_id } => {
            let task = orch.approve(task_id).await?;
            println!("Task {task_id} is now {}.", task.status);
        }
        Commands::Reject { task_id, reason } => {
            let task = orch.reject(task_id, reason).await?;
            println!("Task {task_id} is now {}.", task.status);
        }
        Commands::Status { agent_id } => {
            let status = orch.status(&agent_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Metrics { agent_id } => {
            let metrics = orch.metrics(&agent_id).await?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
        }
        Commands::Tasks {
            agent_id,
            status,
            id,
        } => {
            if let Some(id) = id {
                let task = orch.get_task(id).await?;
                println!("{}", serde_json::to_string_pretty(&task)?);
            } else {
                let tasks = orch.list_tasks(&agent_id, status).await?;
                for task in &tasks {
                    let error = task.last_error.as_deref().unwrap_or("");
                    println!(
                        "  {}  {}  {}  p{}  attempts {}  {error}",
                        task.id, task.kind, task.status, task.priority, task.attempt_count
                    );
                }
                println!("Total: {} task(s)", tasks.len());
            }
        }
        Commands::Recover { agent_id } => {
            let recovered = orch.recover_stale(&agent_id).await?;
            println!("Recovered {recovered} stale task(s).");
        }
        Commands::Adjust { agent_id } => {
            let strategy = orch.adjust_strategy(&agent_id).await?;
            println!("{}", serde_json::to_string_pretty(&strategy)?);
        }
    }

    Ok(())
}

/// Pick the step generator. `None` means the command never runs steps.
fn build_generator(
    config: &PenmanConfig,
    dry_run: Option<bool>,
) -> anyhow::Result<Arc<dyn Generator>> {
    match (dry_run, &config.generator) {
        (None, _) | (Some(true), _) => Ok(Arc::new(ScriptedGenerator::new())),
        (Some(false), Some(generator)) => Ok(Arc::new(CommandGenerator::new(generator.clone()))),
        (Some(false), None) => {
            anyhow::bail!("No [generator] configured; add one to the config or pass --dry-run")
        }
    }
}
