//! favq CLI: operator interface to the favicon job service.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use favq::api::{self, AppState};
use favq::api::export::results_csv;
use favq::config::secrets::ExposeSecret;
use favq::config::{Config, EngineConfig};
use favq::db::Db;
use favq::engine::{JobProcessor, ProcessOutcome, TracingProgress, Worker, WorkerConfig};
use favq::model::{JobId, NewJob, PageRequest};
use favq::queue::{JOB_QUEUE, JobQueue};
use favq::resolver::SimulatedResolver;
use favq::store::{JobStore, MemoryQueue, MemoryStore};
use favq::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "favq", about = "Batch favicon resolution over a job queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API and a worker in one process
    Serve,
    /// Run a worker only
    Worker,
    /// Job operations
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
    /// Process one job in memory with the simulated resolver
    Demo {
        /// Domains to resolve
        #[arg(required = true)]
        domains: Vec<String>,
        /// Client key the job is submitted under
        #[arg(long, default_value = "demo")]
        client: String,
        /// Parallel resolutions within the job
        #[arg(long, default_value_t = 10)]
        max_concurrency: usize,
        /// Per-domain deadline in milliseconds
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
    },
}

#[derive(Subcommand)]
enum JobAction {
    /// Submit a job and enqueue it for processing
    Submit {
        /// Client key
        client: String,
        /// Domains to resolve
        #[arg(required = true)]
        domains: Vec<String>,
    },
    /// Show a job's status and counts
    Show {
        /// Job ID
        id: String,
    },
    /// List one page of a job's results
    Results {
        /// Job ID
        id: String,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        per_page: u32,
    },
    /// Print a job's results as CSV
    Export {
        /// Job ID
        id: String,
        /// Write to this file instead of stdout
        #[arg(long)]
        output: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => cmd_serve().await,
        Command::Worker => cmd_worker().await,
        Command::Demo {
            domains,
            client,
            max_concurrency,
            timeout_ms,
        } => {
            cmd_demo(
                client,
                domains,
                EngineConfig {
                    max_concurrency,
                    task_timeout: Duration::from_millis(timeout_ms),
                },
            )
            .await
        }
        Command::Job { action } => {
            let config = Config::from_env()?;
            let db = connect(&config).await?;

            match action {
                JobAction::Submit { client, domains } => cmd_job_submit(&db, client, domains).await,
                JobAction::Show { id } => cmd_job_show(&db, &id).await,
                JobAction::Results { id, page, per_page } => {
                    cmd_job_results(&db, &id, page, per_page).await
                }
                JobAction::Export { id, output } => cmd_job_export(&db, &id, output).await,
            }
        }
    }
}

async fn connect(config: &Config) -> anyhow::Result<Db> {
    let db = Db::connect(
        config.database_url.expose_secret(),
        config.database_max_connections,
    )
    .await?;
    db.migrate().await?;
    db.create_queue(JOB_QUEUE).await?;
    Ok(db)
}

fn telemetry_config(config: &Config) -> TelemetryConfig {
    TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        default_filter: config.log_level.clone(),
        ..TelemetryConfig::new("favq")
    }
    .with_engine(&config.engine)
}

fn processor(store: Arc<dyn JobStore>, config: EngineConfig) -> Arc<JobProcessor> {
    Arc::new(JobProcessor::new(
        store,
        Arc::new(SimulatedResolver::default()),
        Arc::new(TracingProgress),
        config,
    ))
}

async fn cmd_serve() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let _guard = init_telemetry(telemetry_config(&config))?;

    let db = Arc::new(connect(&config).await?);
    let worker = Worker::new(
        Arc::clone(&db),
        processor(db.clone(), config.engine),
        WorkerConfig::from(&config),
    );

    let worker_task = {
        let worker = worker.clone();
        tokio::spawn(async move { worker.run().await })
    };

    let app = api::router(AppState::new(db.clone(), db.clone()));
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            worker.shutdown();
        })
        .await?;

    worker_task.await??;
    Ok(())
}

async fn cmd_worker() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let _guard = init_telemetry(telemetry_config(&config))?;

    let db = Arc::new(connect(&config).await?);
    let worker = Worker::new(
        Arc::clone(&db),
        processor(db.clone(), config.engine),
        WorkerConfig::from(&config),
    );

    let w = worker.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        w.shutdown();
    });

    worker.run().await?;
    Ok(())
}

async fn cmd_job_submit(db: &Db, client: String, domains: Vec<String>) -> anyhow::Result<()> {
    let new = NewJob::new(client, domains)?;
    let job = db.create_job(&new).await?;
    db.enqueue(job.id).await?;
    println!("Created: {} ({} domains, status: {})", job.id, job.total, job.status);
    Ok(())
}

async fn cmd_job_show(db: &Db, id: &str) -> anyhow::Result<()> {
    let id: JobId = id.parse()?;
    let job = db
        .get_job(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no job {id}"))?;

    println!("ID:         {}", job.id);
    println!("Client:     {}", job.client_id.0);
    println!("Status:     {}", job.status);
    println!("Progress:   {}%", job.progress());
    println!("Total:      {}", job.total);
    println!("Completed:  {}", job.completed);
    println!("Failed:     {}", job.failed);
    println!("Created:    {}", job.created_at);
    println!("Updated:    {}", job.updated_at);
    Ok(())
}

async fn cmd_job_results(db: &Db, id: &str, page: u32, per_page: u32) -> anyhow::Result<()> {
    let id: JobId = id.parse()?;
    if db.get_job(id).await?.is_none() {
        anyhow::bail!("no job {id}");
    }
    let page = db.page_results(id, PageRequest::new(page, per_page)?).await?;

    if page.items.is_empty() {
        println!("No results on page {}.", page.page);
        return Ok(());
    }

    println!("{:<40}  {:<8}  {:<5}  DETAIL", "DOMAIN", "STATUS", "TRIES");
    println!("{}", "-".repeat(100));
    for r in &page.items {
        let detail = r
            .favicon_url
            .as_deref()
            .or(r.error.as_deref())
            .unwrap_or("-");
        println!("{:<40}  {:<8}  {:<5}  {}", r.domain, r.status, r.tries, detail);
    }
    println!(
        "\npage {} ({} per page), {} result(s) total",
        page.page, page.per_page, page.total
    );
    Ok(())
}

async fn cmd_job_export(
    db: &Db,
    id: &str,
    output: Option<std::path::PathBuf>,
) -> anyhow::Result<()> {
    let id: JobId = id.parse()?;
    if db.get_job(id).await?.is_none() {
        anyhow::bail!("no job {id}");
    }
    let csv = results_csv(&db.list_results(id).await?);
    match output {
        Some(path) => {
            tokio::fs::write(&path, csv).await?;
            println!("Wrote {}", path.display());
        }
        None => print!("{csv}"),
    }
    Ok(())
}

async fn cmd_demo(client: String, domains: Vec<String>, engine: EngineConfig) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig::new("favq-demo").with_engine(&engine))?;

    let store = Arc::new(MemoryStore::new());
    let queue = MemoryQueue::new();
    let processor = processor(store.clone(), engine);

    let job = store.create_job(&NewJob::new(client, domains)?).await?;
    queue.enqueue(job.id).await?;

    while let Some(job_id) = queue.pop() {
        match processor.process(job_id).await? {
            ProcessOutcome::Finished(summary) => println!(
                "Job {}: {} ({} completed, {} failed of {})",
                summary.job_id, summary.status, summary.completed, summary.failed, summary.total
            ),
            ProcessOutcome::JobNotFound(id) => println!("Job {id} not found"),
        }
    }

    print!("{}", results_csv(&store.list_results(job.id).await?));
    Ok(())
}
