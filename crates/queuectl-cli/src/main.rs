//! queuectl — a persistent background job queue operated from the command line.
//!
//! The CLI is a thin client over the store: every subcommand maps to one
//! `ControlApi` operation, plus the worker lifecycle commands that spawn
//! and signal worker processes.

mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use queuectl_core::{QueueError, Settings};
use queuectl_store::{ControlApi, Store};
use queuectl_worker::{install_shutdown_handler, JobExecutor, Worker, WorkerManager};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "queuectl")]
#[command(about = "A persistent background job queue for shell commands", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add a new job to the queue
    Enqueue {
        /// Job specification as JSON, e.g. '{"command":"echo ok","id":"j1","max_retries":3}'
        spec: String,
    },

    /// Show job counts by state and the active workers
    Status,

    /// List jobs by state
    List {
        /// One of: pending, processing, completed, failed, dead
        #[arg(long, short, default_value = "pending")]
        state: String,
    },

    /// Manage worker processes
    #[command(subcommand)]
    Worker(WorkerCommand),

    /// Manage the dead letter queue
    #[command(subcommand)]
    Dlq(DlqCommand),

    /// Manage persisted configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
enum WorkerCommand {
    /// Start one or more worker processes
    Start {
        /// Number of workers to start
        #[arg(long, short, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        count: u32,

        /// Block and supervise the workers instead of detaching
        #[arg(long)]
        foreground: bool,

        /// Per-job execution timeout in seconds (no timeout if omitted)
        #[arg(long)]
        job_timeout: Option<u64>,
    },

    /// Send SIGTERM to every registered worker
    Stop,

    /// Run a single worker loop in this process (used by `worker start`)
    #[command(hide = true)]
    Run {
        /// Worker identity; generated when omitted
        #[arg(long)]
        worker_id: Option<String>,

        /// Per-job execution timeout in seconds
        #[arg(long)]
        job_timeout: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum DlqCommand {
    /// View all jobs in the dead letter queue
    List,

    /// Move a dead job back to pending
    Retry {
        /// Id of the dead job to re-queue
        job_id: String,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Set a configuration value (max_retries or backoff_base)
    Set { key: String, value: String },

    /// Get a configuration value
    Get { key: String },

    /// List all configuration values
    List,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Worker processes log their lifecycle at info; one-shot commands stay
    // quiet unless RUST_LOG says otherwise. Logs go to stderr so stdout
    // stays clean for tables.
    let default_filter = match &cli.command {
        Commands::Worker(WorkerCommand::Run { .. })
        | Commands::Worker(WorkerCommand::Start { .. }) => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::from_env();

    if let Err(e) = run(cli, settings).await {
        eprintln!("Error: {e:#}");
        // User errors exit 1, operational errors exit 2.
        let code = e
            .downcast_ref::<QueueError>()
            .map_or(2, QueueError::exit_code);
        std::process::exit(code);
    }
}

async fn run(cli: Cli, settings: Settings) -> Result<()> {
    let store = Store::open(&settings.db_path).await?;
    let api = ControlApi::new(store.clone());

    match cli.command {
        Commands::Enqueue { spec } => {
            let job = api.enqueue_json(&spec).await?;
            println!("Job {} enqueued: {}", job.id, job.command);
        }

        Commands::Status => {
            let (counts, workers) = api.status().await?;
            output::print_status(&counts, &workers);
        }

        Commands::List { state } => {
            let jobs = api.list_jobs(&state).await?;
            if jobs.is_empty() {
                println!("No jobs found with state: {state}");
            } else {
                output::print_jobs(&format!("{state} jobs"), &jobs);
            }
        }

        Commands::Worker(cmd) => run_worker_command(cmd, settings, &store).await?,

        Commands::Dlq(DlqCommand::List) => {
            let jobs = api.list_dead().await?;
            if jobs.is_empty() {
                println!("No jobs found with state: dead");
            } else {
                output::print_jobs("dead jobs", &jobs);
            }
        }

        Commands::Dlq(DlqCommand::Retry { job_id }) => {
            api.retry_from_dlq(&job_id).await?;
            println!("Job {job_id} moved from the dead letter queue back to pending");
        }

        Commands::Config(ConfigCommand::Set { key, value }) => {
            api.set_config(&key, &value).await?;
            println!("Config updated: {key} = {value}");
        }

        Commands::Config(ConfigCommand::Get { key }) => match api.get_config(&key).await? {
            Some(value) => println!("{key}: {value}"),
            None => println!("Config key {key} not set"),
        },

        Commands::Config(ConfigCommand::List) => {
            let entries = api.list_config().await?;
            if entries.is_empty() {
                println!("No configuration values set");
            } else {
                output::print_config(&entries);
            }
        }
    }

    Ok(())
}

async fn run_worker_command(
    cmd: WorkerCommand,
    settings: Settings,
    store: &Store,
) -> Result<()> {
    match cmd {
        WorkerCommand::Start {
            count,
            foreground,
            job_timeout,
        } => {
            let settings = settings.with_job_timeout(job_timeout.map(Duration::from_secs));
            let manager = WorkerManager::new(settings);

            if foreground {
                println!("Starting {count} worker(s) in the foreground; send SIGTERM or Ctrl-C to stop");
                manager.run_foreground(count).await?;
            } else {
                for worker in manager.spawn_detached(count)? {
                    println!("Worker started with PID: {}", worker.pid);
                }
            }
        }

        WorkerCommand::Stop => {
            let report = WorkerManager::stop(store).await?;
            if report.signalled.is_empty() && report.pruned.is_empty() {
                println!("No active workers found");
            } else {
                for pid in &report.signalled {
                    println!("Sent SIGTERM to worker PID: {pid}");
                }
                for pid in &report.pruned {
                    println!("Removed stale registration for PID: {pid}");
                }
            }
        }

        WorkerCommand::Run {
            worker_id,
            job_timeout,
        } => {
            let timeout = job_timeout.map(Duration::from_secs);
            let shutdown = install_shutdown_handler();
            let worker = Worker::new(
                worker_id.unwrap_or_else(Worker::generate_id),
                store.clone(),
                JobExecutor::with_timeout(timeout),
                settings.poll_interval,
                shutdown,
            );
            worker.run().await?;
        }
    }

    Ok(())
}
