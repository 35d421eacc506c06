//! Test harness for end-to-end runs.
//!
//! `TestHarness` owns a temp directory (inputs and outputs), a tokio runtime
//! for the summarization fan-out and one in-memory database shared by the
//! queue and the persistence gateway.

#![allow(dead_code)]

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use walkdir::WalkDir;

use docdigest::db::document_repo::{self, DocumentRow};
use docdigest::db::Database;
use docdigest::persistence::{PersistenceGateway, SqlitePersistence};
use docdigest::pipeline::{Pipeline, PipelineConfig};
use docdigest::processor::{PdfExtractor, TextExtractor};
use docdigest::queue::{BackoffPolicy, QueueSettings, SqliteJobQueue};
use docdigest::storage::PdfArtifactStore;
use docdigest::summarize::{SummarizationProvider, Summarizer, SummarizerSettings};
use docdigest::worker::{JobResult, PoolSettings, WorkerPool};
use docdigest::{JobService, ProgressTracker};

use super::fakes::{FakeOcr, FakeRasterizer};

/// Native text shorter than this triggers the OCR fallback.
pub const MIN_TEXT_CHARS: usize = 20;

pub struct TestHarness {
    pub temp_dir: TempDir,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub database: Database,
    pub queue: Arc<SqliteJobQueue>,
    pub persistence: Arc<SqlitePersistence>,
    pub tracker: ProgressTracker,
    runtime: tokio::runtime::Runtime,
}

impl TestHarness {
    /// Three attempts with millisecond backoff.
    pub fn new() -> Self {
        Self::with_queue_settings(fast_queue_settings(3))
    }

    pub fn with_queue_settings(settings: QueueSettings) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let input_dir = temp_dir.path().join("input");
        let output_dir = temp_dir.path().join("output");
        std::fs::create_dir_all(&input_dir).expect("Failed to create input directory");

        let database = Database::open_in_memory().expect("Failed to open database");
        let queue = Arc::new(SqliteJobQueue::new(database.clone(), settings));
        let persistence = Arc::new(SqlitePersistence::new(database.clone()));
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .expect("Failed to build runtime");

        Self {
            temp_dir,
            input_dir,
            output_dir,
            database,
            queue,
            persistence,
            tracker: ProgressTracker::default(),
            runtime,
        }
    }

    pub fn write_input(&self, filename: &str, content: &[u8]) -> PathBuf {
        let path = self.input_dir.join(filename);
        std::fs::write(&path, content).expect("Failed to write input file");
        path
    }

    pub fn pipeline_config(&self, max_chunk_chars: usize) -> PipelineConfig {
        PipelineConfig {
            output_directory: self.output_dir.clone(),
            ocr_languages: vec!["eng".to_string()],
            ocr_dpi: 150,
            min_text_chars: MIN_TEXT_CHARS,
            max_chunk_chars: NonZeroUsize::new(max_chunk_chars).expect("chunk size must be > 0"),
            summarizer: SummarizerSettings {
                timeout: Duration::from_secs(5),
                max_attempts: 2,
                backoff_base: Duration::from_millis(1),
                concurrency: NonZeroUsize::new(2).expect("non-zero"),
            },
        }
    }

    /// PDF extraction with the fake rasterizer and the given OCR engine.
    pub fn pdf_extractor(&self, ocr: FakeOcr) -> Arc<PdfExtractor> {
        Arc::new(PdfExtractor::new(
            Arc::new(FakeRasterizer::default()),
            Arc::new(ocr),
            150,
            MIN_TEXT_CHARS,
        ))
    }

    /// A pipeline backed by the harness database and output directory.
    pub fn pipeline(
        &self,
        extractor: Arc<dyn TextExtractor>,
        provider: Arc<dyn SummarizationProvider>,
        max_chunk_chars: usize,
    ) -> Arc<Pipeline> {
        self.pipeline_with_persistence(extractor, provider, self.persistence.clone(), max_chunk_chars)
    }

    pub fn pipeline_with_persistence(
        &self,
        extractor: Arc<dyn TextExtractor>,
        provider: Arc<dyn SummarizationProvider>,
        persistence: Arc<dyn PersistenceGateway>,
        max_chunk_chars: usize,
    ) -> Arc<Pipeline> {
        let config = self.pipeline_config(max_chunk_chars);
        let summarizer = Summarizer::new(provider, config.summarizer.clone());
        Arc::new(Pipeline::new(
            Arc::new(config),
            extractor,
            summarizer,
            Arc::new(PdfArtifactStore::new(&self.output_dir)),
            persistence,
            self.queue.clone(),
            self.runtime.handle().clone(),
        ))
    }

    pub fn start_pool(&self, pipeline: Arc<Pipeline>, workers: usize) -> WorkerPool {
        WorkerPool::start(
            pipeline,
            self.queue.clone(),
            self.tracker.clone(),
            PoolSettings {
                worker_count: workers,
                poll_interval: Duration::from_millis(10),
                prune_interval: Duration::from_secs(60),
            },
        )
        .expect("Failed to start worker pool")
    }

    pub fn service(&self, pool: &WorkerPool) -> JobService {
        JobService::new(self.queue.clone(), self.tracker.clone()).with_waker(pool.waker())
    }

    /// Collects every attempt result for `job_id` up to and including the
    /// terminal one. Panics after `timeout`.
    pub fn wait_for_terminal(
        &self,
        pool: &WorkerPool,
        job_id: &str,
        timeout: Duration,
    ) -> Vec<JobResult> {
        let deadline = Instant::now() + timeout;
        let mut results = Vec::new();
        while Instant::now() < deadline {
            let Some(result) = pool.recv_result_timeout(Duration::from_millis(50)) else {
                continue;
            };
            if result.job_id != job_id {
                continue;
            }
            let terminal = result.disposition.is_terminal();
            results.push(result);
            if terminal {
                return results;
            }
        }
        panic!(
            "job {} did not settle within {:?}; saw {:?}",
            job_id, timeout, results
        );
    }

    pub fn document_for(&self, job_id: &str) -> Option<DocumentRow> {
        document_repo::find_document_by_job(&self.database, job_id).expect("document lookup")
    }

    pub fn summary_for(&self, document_id: &str) -> Option<String> {
        document_repo::find_summary_content(&self.database, document_id).expect("summary lookup")
    }

    /// Every file currently under the output directory.
    pub fn list_outputs(&self) -> Vec<PathBuf> {
        if !self.output_dir.exists() {
            return Vec::new();
        }
        let mut files: Vec<PathBuf> = WalkDir::new(&self.output_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        files.sort();
        files
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn fast_queue_settings(max_attempts: u32) -> QueueSettings {
    QueueSettings {
        max_attempts,
        backoff: BackoffPolicy {
            base: Duration::from_millis(5),
            max: Duration::from_millis(20),
        },
        lease_timeout: Duration::from_secs(60),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_harness_creates_input_directory() {
        let harness = TestHarness::new();
        assert!(harness.input_dir.exists());
        assert!(harness.list_outputs().is_empty());
    }

    #[test]
    fn test_write_input_file() {
        let harness = TestHarness::new();
        let path = harness.write_input("scan.pdf", b"%PDF-1.5");
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.5");
    }
}
