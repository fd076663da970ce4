//! CLI command definitions for aml-pipeline.
//!
//! Three commands drive the pipeline: `serve` runs the result listener,
//! `submit` pushes a dataset file into the work queue, and `queues` prints
//! broker depth statistics.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use crate::channel::{MessageChannel, RedisChannel};
use crate::listener::{ListenerConfig, ResultListener};
use crate::store::{Database, JobStore, ResultStore};
use crate::submit::SubmissionService;

/// Default work queue name (consumed by the external worker).
const DEFAULT_WORK_QUEUE: &str = "analysis.requests";

/// Default result queue name (published by the external worker).
const DEFAULT_RESULT_QUEUE: &str = "analysis.results";

/// Asynchronous dataset-analysis job pipeline.
#[derive(Parser)]
#[command(name = "aml-pipeline")]
#[command(about = "Durable job submission and result reconciliation for the analysis worker")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Connection arguments shared by all commands.
#[derive(Parser, Debug)]
pub struct ConnectionArgs {
    /// PostgreSQL connection string.
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Redis connection URL.
    #[arg(long, env = "REDIS_URL", default_value = "redis://localhost:6379")]
    pub redis_url: String,

    /// Queue the worker consumes work messages from.
    #[arg(long, default_value = DEFAULT_WORK_QUEUE)]
    pub work_queue: String,

    /// Queue the worker publishes result messages to.
    #[arg(long, default_value = DEFAULT_RESULT_QUEUE)]
    pub result_queue: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run migrations and the result listener until interrupted.
    Serve(ServeArgs),

    /// Submit a dataset file for analysis and print the assigned job id.
    Submit(SubmitArgs),

    /// Print depth statistics for the work and result queues.
    Queues(QueuesArgs),
}

/// Arguments for `aml-pipeline serve`.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Listener receive poll interval in seconds.
    #[arg(long, default_value = "1")]
    pub poll_interval_secs: u64,
}

/// Arguments for `aml-pipeline submit`.
#[derive(Parser, Debug)]
pub struct SubmitArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Identifier of the submitting user.
    #[arg(short, long)]
    pub owner: String,

    /// Path to the dataset file to submit.
    #[arg(short, long)]
    pub file: PathBuf,
}

/// Arguments for `aml-pipeline queues`.
#[derive(Parser, Debug)]
pub struct QueuesArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before
/// running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Serve(args) => run_serve_command(args).await,
        Commands::Submit(args) => run_submit_command(args).await,
        Commands::Queues(args) => run_queues_command(args).await,
    }
}

async fn run_serve_command(args: ServeArgs) -> anyhow::Result<()> {
    let database = Arc::new(Database::connect(&args.connection.database_url).await?);
    database.run_migrations().await?;
    info!("Database connected, migrations applied");

    let channel = Arc::new(RedisChannel::connect(&args.connection.redis_url).await?);
    info!(redis_url = %args.connection.redis_url, "Broker connected");

    let listener = ResultListener::new(
        Arc::clone(&channel) as Arc<dyn MessageChannel>,
        Arc::clone(&database) as Arc<dyn JobStore>,
        Arc::clone(&database) as Arc<dyn ResultStore>,
        ListenerConfig::new(&args.connection.result_queue)
            .with_poll_interval(Duration::from_secs(args.poll_interval_secs.max(1))),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let handle = tokio::spawn(async move { listener.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    info!("Interrupt received, draining listener");
    let _ = shutdown_tx.send(());

    handle.await??;
    Ok(())
}

async fn run_submit_command(args: SubmitArgs) -> anyhow::Result<()> {
    let dataset = tokio::fs::read(&args.file).await?;
    let file_name = args
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.file.display().to_string());

    let database = Arc::new(Database::connect(&args.connection.database_url).await?);
    database.run_migrations().await?;
    let channel = Arc::new(RedisChannel::connect(&args.connection.redis_url).await?);

    let service = SubmissionService::new(
        database as Arc<dyn JobStore>,
        channel as Arc<dyn MessageChannel>,
        &args.connection.work_queue,
    );

    let job_id = service.submit(&args.owner, &file_name, &dataset).await?;
    println!("Submitted job {}", job_id);

    Ok(())
}

async fn run_queues_command(args: QueuesArgs) -> anyhow::Result<()> {
    let channel = RedisChannel::connect(&args.connection.redis_url).await?;

    for queue in [&args.connection.work_queue, &args.connection.result_queue] {
        let stats = channel.stats(queue).await?;
        println!(
            "{}: ready={} processing={} dead_letter={} (total {})",
            stats.queue,
            stats.ready,
            stats.processing,
            stats.dead_letter,
            stats.total()
        );
    }

    Ok(())
}
