use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{info, warn};

use jobwheel_core::JobwheelConfig;
use jobwheel_scheduler::{JobScheduler, JobStore, NewJob, TriggerRequest};

mod dispatch;

use dispatch::TriggerPool;

#[derive(Parser)]
#[command(name = "jobwheel-gateway", version, about = "Distributed cron scheduler coordinator")]
struct Cli {
    /// Config file (default: ~/.jobwheel/jobwheel.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until interrupted (default)
    Run,
    /// Register a job
    AddJob {
        /// Seconds-resolution cron expression, e.g. "0/30 * * * * ?"
        #[arg(long)]
        cron: String,
        #[arg(long)]
        handler: String,
        /// Executor address; repeat for several
        #[arg(long = "address")]
        addresses: Vec<String>,
        #[arg(long)]
        param: Option<String>,
        #[arg(long, default_value = "")]
        desc: String,
        #[arg(long, default_value_t = 0)]
        retries: i32,
        /// Create the job stopped
        #[arg(long)]
        disabled: bool,
    },
    /// Fire a job once, outside its schedule
    Trigger {
        job_id: i64,
        /// Overrides the job's stored executor param
        #[arg(long)]
        param: Option<String>,
        /// Overrides the job's registered executors; repeat for several
        #[arg(long = "address")]
        addresses: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "jobwheel_gateway=info,jobwheel_scheduler=info,jobwheel_route=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();
    // config path: --config > JOBWHEEL_CONFIG env > ~/.jobwheel/jobwheel.toml
    let config_path = cli.config.or_else(|| std::env::var("JOBWHEEL_CONFIG").ok());
    let config = JobwheelConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        JobwheelConfig::default()
    });

    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    let busy_timeout = Duration::from_millis(config.database.busy_timeout_ms);
    info!(path = %db_path, "opening SQLite database");

    match cli.command.unwrap_or(Command::Run) {
        Command::AddJob {
            cron,
            handler,
            addresses,
            param,
            desc,
            retries,
            disabled,
        } => {
            let store = JobStore::open(&db_path, busy_timeout)?;
            let job = store.add_job(&NewJob {
                job_desc: desc,
                schedule_cron: cron,
                executor_handler: handler,
                executor_param: param,
                executor_addresses: addresses,
                fail_retry_count: retries,
                enabled: !disabled,
                ..Default::default()
            })?;
            println!(
                "job {} added (next trigger at {})",
                job.id, job.trigger_next_time
            );
            Ok(())
        }
        Command::Trigger {
            job_id,
            param,
            addresses,
        } => {
            let store = JobStore::open(&db_path, busy_timeout)?;
            let pool = TriggerPool::new(store, &config);
            let addresses = (!addresses.is_empty()).then_some(addresses);
            let response = pool
                .trigger(TriggerRequest::manual(job_id, param, addresses))
                .await?;
            println!(
                "job {} triggered: code {} {}",
                job_id,
                response.code,
                response.msg.unwrap_or_default()
            );
            Ok(())
        }
        Command::Run => run(config, busy_timeout).await,
    }
}

async fn run(config: JobwheelConfig, busy_timeout: Duration) -> anyhow::Result<()> {
    let db_path = &config.database.path;

    // poller and trigger pool each get their own connection
    let schedule_store = JobStore::open(db_path, busy_timeout)?;
    let dispatch_store = JobStore::open(db_path, busy_timeout)?;

    let (trigger_tx, trigger_rx) =
        mpsc::channel::<TriggerRequest>(config.scheduler.dispatch_queue_capacity);

    let pool = Arc::new(TriggerPool::new(dispatch_store, &config));
    let pool_task = tokio::spawn(Arc::clone(&pool).run(trigger_rx));

    let mut scheduler =
        JobScheduler::new(schedule_store, Arc::new(trigger_tx), config.scheduler.clone());
    scheduler.start()?;
    info!("jobwheel scheduler running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    scheduler.stop().await;
    // Last sender goes with the scheduler; the pool then finishes in-flight work.
    drop(scheduler);
    if let Err(e) = pool_task.await {
        warn!(error = %e, "trigger pool task failed");
    }

    info!("jobwheel stopped");
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
