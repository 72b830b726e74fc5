use anyhow::Result;
use clap::{Parser, Subcommand};
use scn_core::Job;
use scn_pipeline::{
    next_due, PipelineConfig, PipelineContext, QueuePromoter, RunExecutor, RunOutcome,
};
use scn_web::AppState;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "scn-cli")]
#[command(about = "Site Change Notifier command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the worker: queue promoter, dispatch loop, and HTTP surface.
    Serve,
    /// One-shot crawl of a URL against the configured store.
    Crawl {
        url: String,
        /// Project to attribute pages and runs to; random when omitted.
        #[arg(long)]
        project_id: Option<Uuid>,
    },
    /// Submit a scheduled-run job to a running worker.
    Schedule {
        #[arg(long)]
        project_id: Uuid,
        #[arg(long)]
        url: String,
        /// Worker base URL; defaults to WORKER_URL or localhost.
        #[arg(long)]
        worker: Option<String>,
    },
    /// Print the next occurrence of a cron expression.
    NextDue { expression: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve => serve().await,
        Commands::Crawl { url, project_id } => crawl_once(url, project_id).await,
        Commands::Schedule {
            project_id,
            url,
            worker,
        } => submit_scheduled(project_id, url, worker).await,
        Commands::NextDue { expression } => {
            let due = next_due(&expression, chrono::Utc::now())?;
            println!("{due}");
            Ok(())
        }
    }
}

async fn serve() -> Result<()> {
    let config = PipelineConfig::from_env();
    let ctx = PipelineContext::connect(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let promoter = QueuePromoter::new(ctx.queue.clone(), ctx.config.promoter_tick);
    tokio::spawn(promoter.run(shutdown_rx.clone()));

    let state = AppState::new(ctx);
    tokio::spawn(state.dispatcher.clone().run_worker(shutdown_rx));

    let result = scn_web::serve(state).await;
    let _ = shutdown_tx.send(true);
    result
}

async fn crawl_once(url: String, project_id: Option<Uuid>) -> Result<()> {
    let config = PipelineConfig::from_env();
    let ctx = PipelineContext::connect(config).await?;
    let executor = RunExecutor::new(ctx);

    let job = Job::immediate(project_id.unwrap_or_else(Uuid::new_v4), &url);
    info!(job_id = %job.id, url = %url, "starting one-shot crawl");
    match executor.execute(&job).await? {
        RunOutcome::Completed(run) => {
            println!(
                "run {} finished: {} ({})",
                run.id,
                run.status,
                run.summary.as_deref().unwrap_or("no summary")
            );
        }
        RunOutcome::Duplicate(run_id) => {
            println!("run {run_id} already processed");
        }
    }
    Ok(())
}

async fn submit_scheduled(project_id: Uuid, url: String, worker: Option<String>) -> Result<()> {
    let base = worker
        .or_else(|| std::env::var("WORKER_URL").ok())
        .unwrap_or_else(|| "http://localhost:8080".to_string());
    let job = Job::scheduled(project_id, url);

    let response = reqwest::Client::new()
        .post(format!("{}/jobs", base.trim_end_matches('/')))
        .json(&job)
        .send()
        .await?;
    println!("worker responded {} for job {}", response.status(), job.id);
    Ok(())
}
