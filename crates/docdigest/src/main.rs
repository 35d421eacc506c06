use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{error, info, warn};

use docdigest::config::Config;
use docdigest::db::{self, Database};
use docdigest::persistence::SqlitePersistence;
use docdigest::pipeline::{Pipeline, PipelineConfig};
use docdigest::queue::{JobQueue, QueueSettings, SqliteJobQueue};
use docdigest::secrets::expand_home;
use docdigest::storage::sweep_orphaned_artifacts;
use docdigest::summarize::GeminiProvider;
use docdigest::worker::{JobDisposition, PoolSettings, WorkerPool};
use docdigest::{load_config, logging, resolve_secret, DocdigestError, JobService, ProgressTracker};

const DEFAULT_CONFIG_FILE: &str = "docdigest.json";
const RESULT_POLL: Duration = Duration::from_millis(500);
const SWEEP_GRACE: Duration = Duration::from_secs(15 * 60);

#[derive(Parser)]
#[command(name = "docdigest", version, about = "Summarize documents into PDF digests")]
struct Cli {
    /// Configuration file (JSON).
    #[arg(long, short, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Enqueue documents and process them until every job has settled.
    Run {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long, default_value = "local")]
        owner: String,
    },
    /// List dead-lettered jobs.
    DeadLetters,
    /// Move a dead-lettered job back to the queue.
    Retry { job_id: String },
    /// Remove rendered artifacts no document record points at.
    Sweep,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting docdigest v{}", env!("CARGO_PKG_VERSION"));

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<bool, DocdigestError> {
    let config = load_config(&cli.config)?;
    let database = open_database(&config)?;
    let queue = Arc::new(SqliteJobQueue::new(
        database.clone(),
        QueueSettings::from_config(&config.queue),
    ));
    let persistence = Arc::new(SqlitePersistence::new(database));

    match cli.command {
        Command::Run { files, owner } => process_files(&config, queue, persistence, &files, &owner),
        Command::DeadLetters => {
            for job in queue.list_dead_letters()? {
                println!(
                    "{}\t{}\tattempt {}\t{}",
                    job.id,
                    job.display_name,
                    job.attempt,
                    job.last_error.as_deref().unwrap_or("-")
                );
            }
            Ok(true)
        }
        Command::Retry { job_id } => {
            queue.retry_dead_letter(&job_id)?;
            info!("Job {} re-queued", job_id);
            Ok(true)
        }
        Command::Sweep => {
            let output_dir = PathBuf::from(expand_home(&config.output_directory));
            let report = sweep_orphaned_artifacts(&output_dir, persistence.as_ref(), SWEEP_GRACE)?;
            info!(
                "Sweep scanned {} artifacts, removed {}",
                report.scanned,
                report.removed.len()
            );
            Ok(true)
        }
    }
}

fn open_database(config: &Config) -> Result<Database, DocdigestError> {
    let path = match &config.database_path {
        Some(path) => PathBuf::from(expand_home(path)),
        None => db::default_database_path().ok_or_else(|| {
            DocdigestError::Config(docdigest::ConfigError::Validation {
                message: "database_path is not set and no home directory was found".to_string(),
            })
        })?,
    };
    Ok(Database::open(&path)?)
}

fn process_files(
    config: &Config,
    queue: Arc<SqliteJobQueue>,
    persistence: Arc<SqlitePersistence>,
    files: &[PathBuf],
    owner: &str,
) -> Result<bool, DocdigestError> {
    let summarization = &config.summarization;
    let api_key = resolve_secret(
        summarization.api_key.as_deref(),
        summarization.api_key_file.as_deref(),
        summarization.api_key_env.as_deref(),
    )?;
    let provider = GeminiProvider::new(
        summarization.resolved_endpoint(),
        api_key,
        summarization.temperature,
        summarization.max_output_tokens,
        Duration::from_secs(summarization.timeout_secs),
    )?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("docdigest-rt")
        .build()
        .map_err(|e| docdigest::WorkerError::SpawnFailed(format!("tokio runtime: {}", e)))?;

    let pipeline_config = Arc::new(PipelineConfig::from_config(config));
    let output_dir = pipeline_config.output_directory.clone();
    let pipeline = Arc::new(Pipeline::from_config(
        pipeline_config,
        Arc::new(provider),
        persistence.clone(),
        queue.clone(),
        runtime.handle().clone(),
    ));

    let tracker = ProgressTracker::new(Duration::from_secs(config.progress.retention_secs));
    let pool = WorkerPool::start(
        pipeline,
        queue.clone(),
        tracker.clone(),
        PoolSettings {
            worker_count: config.worker_count,
            poll_interval: Duration::from_millis(config.queue.poll_interval_ms),
            ..PoolSettings::default()
        },
    )?;
    let service = JobService::new(queue, tracker).with_waker(pool.waker());

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        if let Err(e) = ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst)) {
            warn!("Failed to install Ctrl-C handler: {}", e);
        }
    }

    let mut pending = HashSet::new();
    for file in files {
        let handle = service.enqueue(file.clone(), &display_name(file), owner)?;
        pending.insert(handle.job_id);
    }

    let mut all_succeeded = true;
    while !pending.is_empty() {
        if interrupted.load(Ordering::SeqCst) {
            warn!("Interrupted; {} job(s) left in the queue", pending.len());
            pool.shutdown();
            all_succeeded = false;
            break;
        }

        let Some(result) = pool.recv_result_timeout(RESULT_POLL) else {
            continue;
        };
        if !pending.contains(&result.job_id) || !result.disposition.is_terminal() {
            continue;
        }
        pending.remove(&result.job_id);

        match &result.disposition {
            JobDisposition::Completed {
                artifact_locator, ..
            } => {
                info!("Job {} completed: {}", result.job_id, artifact_locator);
                if !result.degraded_chunks.is_empty() {
                    warn!(
                        "Job {} summary has placeholders for chunks {:?}",
                        result.job_id, result.degraded_chunks
                    );
                }
            }
            _ => {
                all_succeeded = false;
                error!(
                    "Job {} failed: {}",
                    result.job_id,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }

    pool.wait();

    match sweep_orphaned_artifacts(&output_dir, persistence.as_ref(), SWEEP_GRACE) {
        Ok(report) if !report.removed.is_empty() => {
            info!("Removed {} orphaned artifacts", report.removed.len())
        }
        Ok(_) => {}
        Err(e) => warn!("Artifact sweep failed: {}", e),
    }

    Ok(all_succeeded)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
