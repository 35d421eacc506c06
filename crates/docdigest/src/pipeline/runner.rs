use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, info, info_span, warn};

use crate::broadcast::JobPhase;
use crate::chunker;
use crate::error::QueueError;
use crate::merge::{self, MergedSummary};
use crate::persistence::{NewDocument, PersistenceGateway};
use crate::processor::{
    Document, PdfExtractor, PdftoppmRasterizer, TesseractEngine, TextExtractor,
};
use crate::queue::JobQueue;
use crate::sanitize;
use crate::storage::{Artifact, ArtifactRenderer, PdfArtifactStore};
use crate::summarize::{SummarizationProvider, Summarizer};

use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::error::{PipelineError, PipelineWarning};
use super::progress::{ProgressEvent, ProgressReporter};

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    extractor: Arc<dyn TextExtractor>,
    summarizer: Summarizer,
    renderer: Arc<dyn ArtifactRenderer>,
    persistence: Arc<dyn PersistenceGateway>,
    queue: Arc<dyn JobQueue>,
    runtime: Handle,
}

impl Pipeline {
    /// Production constructor: pdftoppm + Tesseract extraction and PDF
    /// artifacts under the configured output directory.
    pub fn from_config(
        config: Arc<PipelineConfig>,
        provider: Arc<dyn SummarizationProvider>,
        persistence: Arc<dyn PersistenceGateway>,
        queue: Arc<dyn JobQueue>,
        runtime: Handle,
    ) -> Self {
        let extractor = PdfExtractor::new(
            Arc::new(PdftoppmRasterizer::new()),
            Arc::new(TesseractEngine::new(&config.ocr_languages)),
            config.ocr_dpi,
            config.min_text_chars,
        );
        let summarizer = Summarizer::new(provider, config.summarizer.clone());
        let renderer = PdfArtifactStore::new(&config.output_directory);

        Self {
            config,
            extractor: Arc::new(extractor),
            summarizer,
            renderer: Arc::new(renderer),
            persistence,
            queue,
            runtime,
        }
    }

    /// Inject specific sub-components.
    pub fn new(
        config: Arc<PipelineConfig>,
        extractor: Arc<dyn TextExtractor>,
        summarizer: Summarizer,
        renderer: Arc<dyn ArtifactRenderer>,
        persistence: Arc<dyn PersistenceGateway>,
        queue: Arc<dyn JobQueue>,
        runtime: Handle,
    ) -> Self {
        Self {
            config,
            extractor,
            summarizer,
            renderer,
            persistence,
            queue,
            runtime,
        }
    }

    /// Run the full pipeline for one leased job.
    ///
    /// Must be called from a thread outside the Tokio runtime; the
    /// summarization fan-out blocks on the runtime handle.
    pub fn run(
        &self,
        mut ctx: PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> (Result<(), PipelineError>, PipelineContext) {
        let filename = sanitize::redact_path(&ctx.job.source_ref);
        let _pipeline_span = info_span!("pipeline",
            job_id = %ctx.job.id,
            filename = %filename,
            attempt = ctx.job.attempt,
        )
        .entered();

        let result = self.run_steps(&mut ctx, progress);

        match &result {
            Ok(()) => info!(
                pages = ctx.page_count,
                ocr = ctx.used_ocr,
                chunks = ctx.chunk_count,
                "Pipeline finished"
            ),
            Err(e) => {
                warn!(error = %e, class = e.class().as_str(), "Pipeline failed");
                self.discard_unrecorded_artifact(&mut ctx);
            }
        }

        (result, ctx)
    }

    fn run_steps(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<(), PipelineError> {
        // Step 1: Extract text
        let document = {
            self.checkpoint(ctx, JobPhase::Extracting)?;
            let _step = info_span!("extract").entered();
            progress.report(ProgressEvent::Stage(JobPhase::Extracting));
            self.step_extract(ctx, progress)?
        };

        // Step 2: Chunk
        let chunks = {
            let _step = info_span!("chunk").entered();
            let chunks = chunker::split(&document.text, self.config.max_chunk_chars);
            debug!(chunks = chunks.len(), chars = document.text.len(), "Split text");
            ctx.chunk_count = chunks.len();
            chunks
        };
        drop(document);

        // Step 3: Summarize every chunk
        let partials = {
            self.checkpoint(ctx, JobPhase::Summarizing)?;
            let _step = info_span!("summarize", chunks = chunks.len()).entered();
            progress.report(ProgressEvent::Stage(JobPhase::Summarizing));
            let mut heartbeat = LeaseHeartbeat::new(self.queue.as_ref(), ctx);
            let partials =
                self.runtime
                    .block_on(self.summarizer.summarize_all(&chunks, |done, total| {
                        heartbeat.beat();
                        progress.report(ProgressEvent::Advance {
                            phase: JobPhase::Summarizing,
                            done,
                            total,
                        });
                    }));
            heartbeat.finish()?;
            partials
        };
        drop(chunks);

        // Step 4: Merge
        let summary = {
            let _step = info_span!("merge").entered();
            self.step_merge(ctx, partials)
        };

        // Step 5: Render
        let artifact = {
            self.checkpoint(ctx, JobPhase::Rendering)?;
            let _step = info_span!("render").entered();
            progress.report(ProgressEvent::Stage(JobPhase::Rendering));
            let artifact =
                self.renderer
                    .render(&ctx.job.id, &ctx.job.display_name, &summary)?;
            ctx.artifact = Some(artifact.clone());
            artifact
        };

        // Step 6: Persist
        {
            self.checkpoint(ctx, JobPhase::Persisting)?;
            let _step = info_span!("persist").entered();
            progress.report(ProgressEvent::Stage(JobPhase::Persisting));
            self.step_persist(ctx, &artifact, &summary)?;
        }

        ctx.summary = Some(summary);
        Ok(())
    }

    /// Stage boundary: honours cancellation and keeps the lease alive.
    fn checkpoint(&self, ctx: &PipelineContext, next: JobPhase) -> Result<(), PipelineError> {
        if ctx.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled { stage: next });
        }
        self.queue.renew_lease(&ctx.job.id, &ctx.worker_id)?;
        Ok(())
    }

    fn step_extract(
        &self,
        ctx: &mut PipelineContext,
        progress: &dyn ProgressReporter,
    ) -> Result<Document, PipelineError> {
        let mut heartbeat = LeaseHeartbeat::new(self.queue.as_ref(), ctx);
        let extracted = self
            .extractor
            .extract_with_progress(&ctx.job.source_ref, &mut |done, total| {
                heartbeat.beat();
                progress.report(ProgressEvent::Advance {
                    phase: JobPhase::Extracting,
                    done,
                    total,
                });
            });
        heartbeat.finish()?;
        let document = extracted?;
        ctx.page_count = document.page_count;
        ctx.used_ocr = document.used_ocr;
        debug!(
            pages = document.page_count,
            ocr = document.used_ocr,
            "Extracted text"
        );
        Ok(document)
    }

    fn step_merge(
        &self,
        ctx: &mut PipelineContext,
        partials: Vec<merge::PartialSummary>,
    ) -> MergedSummary {
        let summary = merge::merge(partials);
        for index in &summary.degraded_chunks {
            ctx.warnings
                .push(PipelineWarning::DegradedChunk { index: *index });
        }
        if summary.is_degraded() {
            warn!(
                degraded = summary.degraded_chunks.len(),
                chunks = summary.chunk_count,
                "Summary contains placeholders"
            );
        }
        summary
    }

    fn step_persist(
        &self,
        ctx: &mut PipelineContext,
        artifact: &Artifact,
        summary: &MergedSummary,
    ) -> Result<(), PipelineError> {
        let document_id = self.persistence.create_document_record(&NewDocument {
            job_id: ctx.job.id.clone(),
            title: ctx.job.display_name.clone(),
            artifact_locator: artifact.locator_string(),
            owner_id: ctx.job.owner_id.clone(),
        })?;
        // From here on the artifact is referenced, even if the summary fails.
        ctx.document_id = Some(document_id.clone());
        let summary_id = self.persistence.create_summary_record(
            &summary.text,
            &document_id,
            &ctx.job.owner_id,
        )?;

        debug!(document_id = %document_id, summary_id = %summary_id, "Recorded result");
        Ok(())
    }

    /// An artifact nobody will record is removed right away instead of
    /// waiting for the sweep.
    fn discard_unrecorded_artifact(&self, ctx: &mut PipelineContext) {
        if ctx.document_id.is_some() {
            return;
        }
        let Some(artifact) = ctx.artifact.as_ref() else {
            return;
        };
        // A document record written before a later step failed still points here.
        match self
            .persistence
            .is_artifact_referenced(&artifact.locator_string())
        {
            Ok(false) => {}
            Ok(true) => {
                debug!("Keeping artifact referenced by a document record");
                return;
            }
            Err(e) => warn!(error = %e, "Could not check artifact references"),
        }
        let Some(artifact) = ctx.artifact.take() else {
            return;
        };
        match self.renderer.discard(&artifact) {
            Ok(()) => debug!(
                artifact = %sanitize::redact_path(&artifact.locator),
                "Discarded unrecorded artifact"
            ),
            Err(e) => {
                warn!(error = %e, "Failed to discard unrecorded artifact");
                ctx.warnings.push(PipelineWarning::DiscardFailed {
                    locator: artifact.locator_string(),
                    error: e.to_string(),
                });
            }
        }
    }
}

/// Renews the lease from inside a long stage. The first failed renewal is
/// kept and reported once the stage returns.
struct LeaseHeartbeat<'a> {
    queue: &'a dyn JobQueue,
    job_id: &'a str,
    worker_id: &'a str,
    lost: Option<QueueError>,
}

impl<'a> LeaseHeartbeat<'a> {
    fn new(queue: &'a dyn JobQueue, ctx: &'a PipelineContext) -> Self {
        Self {
            queue,
            job_id: &ctx.job.id,
            worker_id: &ctx.worker_id,
            lost: None,
        }
    }

    fn beat(&mut self) {
        if self.lost.is_some() {
            return;
        }
        if let Err(e) = self.queue.renew_lease(self.job_id, self.worker_id) {
            warn!(error = %e, "Lease renewal failed mid-stage");
            self.lost = Some(e);
        }
    }

    fn finish(self) -> Result<(), QueueError> {
        match self.lost {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
