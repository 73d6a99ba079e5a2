//! Grid retrieval runner.
//!
//! Runs retrieval jobs (single or batched) against Zarr sources through the
//! shared on-disk domain cache, and inspects or maintains that cache.

mod scheduler;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use domain_cache::{CacheStore, DiskCacheStore};
use grid_io::ZarrSourceAccessor;
use retrieval::{CancelToken, JobSpec, RetrievalConfig, RetrievalPipeline, TracingStatusSink};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use scheduler::{RetryPolicy, Scheduler};

#[derive(Parser, Debug)]
#[command(name = "retriever")]
#[command(about = "Chunked retrieval of dataset sub-regions through a shared domain cache")]
struct Args {
    /// Configuration file (YAML); environment variables override it
    #[arg(short, long, env = "RETRIEVER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single job
    Run {
        /// Job file (YAML or JSON)
        #[arg(long)]
        job: PathBuf,
    },

    /// Run several jobs concurrently, retrying transient failures
    Batch {
        /// Job files (YAML or JSON)
        #[arg(required = true)]
        jobs: Vec<PathBuf>,

        /// Maximum concurrent jobs
        #[arg(long, default_value = "4")]
        max_concurrent: usize,

        /// Maximum retry attempts per job
        #[arg(long, default_value = "3")]
        max_retries: u32,
    },

    /// Inspect or maintain the cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Entry counts and space used
    Stats,
    /// One line per entry
    List,
    /// Evict least recently used entries until `bytes` more fit
    Evict {
        #[arg(long)]
        bytes: u64,
    },
    /// Remove every entry
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Results go to stdout, logs to stderr
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(args.config.as_deref())?;
    info!(
        cache_dir = %config.cache.cache_dir.display(),
        max_bytes = config.cache.max_bytes,
        output_dir = %config.output_dir.display(),
        "Loaded configuration"
    );

    let store = DiskCacheStore::open(config.cache.clone(), config.zarr.clone())
        .await
        .context("failed to open cache")?;

    match args.command {
        Command::Run { job } => {
            let job = JobSpec::from_file(&job).with_context(|| format!("invalid job file {}", job.display()))?;
            let pipeline = build_pipeline(store, config);
            let cancel = cancel_on_ctrl_c();
            let sink = TracingStatusSink::new(job.id);
            let outcome = pipeline.run_attempt(&job, &sink, &cancel, false).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Command::Batch {
            jobs,
            max_concurrent,
            max_retries,
        } => {
            let mut specs = Vec::with_capacity(jobs.len());
            for path in &jobs {
                let job = JobSpec::from_file(path).with_context(|| format!("invalid job file {}", path.display()))?;
                specs.push((path.display().to_string(), job));
            }

            let pipeline = Arc::new(build_pipeline(store, config));
            let retry = RetryPolicy {
                max_retries,
                ..Default::default()
            };
            let scheduler = Arc::new(Scheduler::new(pipeline, max_concurrent, retry, cancel_on_ctrl_c()));
            let reports = scheduler.run_all(specs).await;
            println!("{}", serde_json::to_string_pretty(&reports)?);

            let failed = reports.iter().filter(|r| !r.succeeded()).count();
            if failed > 0 {
                bail!("{} of {} jobs failed", failed, reports.len());
            }
        }
        Command::Cache { action } => run_cache_action(&store, action).await?,
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<RetrievalConfig> {
    let config = match path {
        Some(path) => RetrievalConfig::from_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => RetrievalConfig::from_env(),
    };
    config
        .validate()
        .map_err(|e| anyhow!("invalid configuration: {}", e))?;
    Ok(config)
}

fn build_pipeline(store: DiskCacheStore, config: RetrievalConfig) -> RetrievalPipeline {
    let accessor = Arc::new(ZarrSourceAccessor::from_env());
    RetrievalPipeline::new(accessor, store.into_shared(), config)
}

/// Token that is cancelled on Ctrl+C.
fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal, cancelling jobs");
        token.cancel();
    });
    cancel
}

async fn run_cache_action(store: &DiskCacheStore, action: CacheAction) -> Result<()> {
    match action {
        CacheAction::Stats => {
            let stats = store.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        CacheAction::List => {
            for entry in store.entries().await? {
                println!(
                    "{}\t{}\t{}\t{}\t{}\t{}",
                    entry.key,
                    entry.state.as_str(),
                    entry.size_bytes,
                    entry.last_accessed.to_rfc3339(),
                    entry.variable,
                    entry.source_uri
                );
            }
        }
        CacheAction::Evict { bytes } => {
            let outcome = store.reserve(bytes).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        CacheAction::Clear => {
            let removed = store.clear().await?;
            println!("Removed {} cache entries", removed);
        }
    }
    Ok(())
}
