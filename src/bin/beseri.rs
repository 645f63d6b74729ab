//! beseri CLI: run workers and operate the task queue.

use beseri_rs::config::Config;
use beseri_rs::engine::{Reaper, Worker, WorkerConfig};
use beseri_rs::executor::ExecutorRegistry;
use beseri_rs::model::{DEFAULT_MAX_RETRIES, TaskId};
use beseri_rs::queue::{Producer, Queue, QueueKeys};
use beseri_rs::store::RedisStore;
use beseri_rs::telemetry::{TelemetryConfig, init_telemetry};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "beseri", about = "Reliable task queue worker and operator tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a worker: dispatch loop plus reaper
    Serve {
        /// Directory containing executor TOML configs (overrides EXECUTORS_DIR)
        #[arg(long)]
        executors: Option<PathBuf>,
        /// Concurrent task slots (overrides MAX_WORKERS)
        #[arg(long)]
        max_workers: Option<usize>,
    },
    /// Enqueue tasks
    Enqueue {
        /// Task type (selects the executor)
        task_type: String,
        /// JSON payload
        #[arg(long)]
        payload: Option<String>,
        /// Failed attempts tolerated before the task goes dead
        #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
        max_retries: u32,
        /// Number of tasks to enqueue
        #[arg(long, default_value_t = 1)]
        count: usize,
        /// Pause between tasks, in milliseconds
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,
    },
    /// Show queue sizes
    Stats,
    /// Dead-letter operations
    Dead {
        #[command(subcommand)]
        action: DeadAction,
    },
    /// Run one reaper sweep for stale in-flight tasks
    Reap,
}

#[derive(Subcommand)]
enum DeadAction {
    /// List dead tasks, most recent first
    List {
        /// Maximum tasks to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Put a dead task back on the main queue with its retry count reset
    Revive {
        /// Task ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Command::Serve {
            executors,
            max_workers,
        } => cmd_serve(config, executors, max_workers).await,
        Command::Enqueue {
            task_type,
            payload,
            max_retries,
            count,
            interval_ms,
        } => {
            let queue = connect(&config).await?;
            cmd_enqueue(queue, task_type, payload, max_retries, count, interval_ms).await
        }
        Command::Stats => cmd_stats(&connect(&config).await?).await,
        Command::Dead { action } => {
            let queue = connect(&config).await?;
            match action {
                DeadAction::List { limit } => cmd_dead_list(&queue, limit).await,
                DeadAction::Revive { id } => cmd_dead_revive(&queue, id).await,
            }
        }
        Command::Reap => cmd_reap(connect(&config).await?, &config).await,
    }
}

async fn connect(config: &Config) -> anyhow::Result<Queue> {
    let store = RedisStore::connect(&config.redis_url).await?;
    store.health_check().await?;
    Ok(Queue::new(
        Arc::new(store),
        QueueKeys::new(&config.queue_prefix),
    ))
}

async fn cmd_serve(
    mut config: Config,
    executors: Option<PathBuf>,
    max_workers: Option<usize>,
) -> anyhow::Result<()> {
    if let Some(dir) = executors {
        config.executors_dir = dir;
    }
    if let Some(n) = max_workers {
        anyhow::ensure!(n > 0, "--max-workers must be at least 1");
        config.max_workers = n;
    }

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "beseri".to_string(),
        log_level: config.log_level.clone(),
    })?;

    if config.backoff_cap >= config.visibility_timeout {
        warn!(
            backoff_cap_ms = config.backoff_cap.as_millis() as u64,
            visibility_timeout_ms = config.visibility_timeout.as_millis() as u64,
            "backoff cap is not below the visibility timeout; the reaper may reclaim tasks that are waiting to retry"
        );
    }

    let queue = connect(&config).await?;
    let registry = ExecutorRegistry::load_from_dir(&config.executors_dir)?;
    info!(
        executors = ?registry.task_types(),
        max_workers = config.max_workers,
        "worker starting"
    );

    let worker = Worker::new(
        queue,
        Arc::new(registry),
        WorkerConfig::from_config(&config),
    );

    let w = worker.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("interrupt received, shutting down");
        w.shutdown();
    });

    worker.run().await?;
    Ok(())
}

async fn cmd_enqueue(
    queue: Queue,
    task_type: String,
    payload: Option<String>,
    max_retries: u32,
    count: usize,
    interval_ms: u64,
) -> anyhow::Result<()> {
    let payload: serde_json::Value = match payload {
        Some(json) => serde_json::from_str(&json)?,
        None => serde_json::json!({}),
    };

    let producer = Producer::new(queue);
    for i in 0..count {
        if i > 0 && interval_ms > 0 {
            tokio::time::sleep(Duration::from_millis(interval_ms)).await;
        }
        let task = producer
            .enqueue(task_type.clone(), payload.clone(), max_retries)
            .await?;
        println!(
            "Enqueued: {} type={} payload={}",
            task.id, task.task_type, task.payload
        );
    }
    Ok(())
}

async fn cmd_stats(queue: &Queue) -> anyhow::Result<()> {
    let stats = queue.stats().await?;
    let keys = queue.keys();

    println!("{:<12}  {:<28}  COUNT", "AREA", "KEY");
    println!("{}", "-".repeat(50));
    println!("{:<12}  {:<28}  {}", "pending", keys.main, stats.pending);
    println!("{:<12}  {:<28}  {}", "in-flight", keys.in_flight, stats.in_flight);
    println!("{:<12}  {:<28}  {}", "dead", keys.dead, stats.dead);
    println!("{:<12}  {:<28}  {}", "results", keys.results, stats.results);
    Ok(())
}

async fn cmd_dead_list(queue: &Queue, limit: usize) -> anyhow::Result<()> {
    let tasks = queue.dead(limit).await?;

    if tasks.is_empty() {
        println!("No dead tasks.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<16}  {:<7}  {:<16}  PAYLOAD",
        "ID", "TYPE", "RETRIES", "CREATED"
    );
    println!("{}", "-".repeat(100));

    for task in &tasks {
        let payload = task.payload.to_string();
        let payload_display: String = payload.chars().take(30).collect();
        println!(
            "{:<36}  {:<16}  {:<7}  {:<16}  {}",
            task.id,
            task.task_type,
            format!("{}/{}", task.retries, task.max_retries),
            task.created_at.format("%Y-%m-%d %H:%M"),
            payload_display
        );
    }

    println!("\n{} task(s)", tasks.len());
    Ok(())
}

async fn cmd_dead_revive(queue: &Queue, id: String) -> anyhow::Result<()> {
    let task = queue.revive_dead(&TaskId(id)).await?;
    println!("Revived: {} type={} (retries reset)", task.id, task.task_type);
    Ok(())
}

async fn cmd_reap(queue: Queue, config: &Config) -> anyhow::Result<()> {
    // A fresh reaper has no orphan history, so orphans are only noted on this pass.
    let mut reaper = Reaper::new(queue, WorkerConfig::from_config(config).reaper);
    let report = reaper.sweep().await?;
    println!(
        "Scanned {} in-flight task(s): {} stale reclaimed, {} orphan(s) reclaimed, {} malformed dropped, {} error(s)",
        report.scanned,
        report.reclaimed,
        report.orphans_reclaimed,
        report.malformed_dropped,
        report.errors
    );
    Ok(())
}
