//! Per-chunk summarization with timeout, retry and bounded fan-out.
//!
//! Failures here never fail the job: a chunk that cannot be summarized gets a
//! placeholder and the merged output still covers every chunk.

pub mod gemini;
pub mod provider;

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};

use crate::chunker::Chunk;
use crate::error::ServiceError;
use crate::merge::PartialSummary;

pub use gemini::GeminiProvider;
pub use provider::{ProviderResponse, SummarizationProvider};

/// Text used in place of a chunk summary that could not be produced.
pub const PLACEHOLDER: &str = "Summary not available for this text.";

#[derive(Debug, Clone)]
pub struct SummarizerSettings {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub concurrency: NonZeroUsize,
}

impl Default for SummarizerSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
            concurrency: NonZeroUsize::new(4).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

#[derive(Clone)]
pub struct Summarizer {
    provider: Arc<dyn SummarizationProvider>,
    settings: SummarizerSettings,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn SummarizationProvider>, settings: SummarizerSettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &SummarizerSettings {
        &self.settings
    }

    /// Summarizes one chunk, retrying transient provider failures.
    pub async fn summarize_chunk(&self, chunk: &Chunk) -> PartialSummary {
        let max_attempts = self.settings.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let response =
                match tokio::time::timeout(self.settings.timeout, self.provider.summarize(&chunk.text))
                    .await
                {
                    Ok(response) => response,
                    Err(_) => ProviderResponse::ServiceError(ServiceError::Timeout),
                };

            match response {
                ProviderResponse::Success(text) if !text.trim().is_empty() => {
                    return PartialSummary {
                        chunk_index: chunk.index,
                        text,
                        ok: true,
                    };
                }
                ProviderResponse::Success(_) | ProviderResponse::Empty => {
                    tracing::warn!(chunk = chunk.index, attempt, "Provider returned no summary");
                    return placeholder(chunk.index);
                }
                ProviderResponse::ServiceError(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        chunk = chunk.index,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient provider failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                ProviderResponse::ServiceError(e) => {
                    tracing::warn!(
                        chunk = chunk.index,
                        attempt,
                        transient = e.is_transient(),
                        error = %e,
                        "Giving up on chunk, using placeholder"
                    );
                    return placeholder(chunk.index);
                }
            }
        }

        placeholder(chunk.index)
    }

    /// Summarizes every chunk with at most `concurrency` calls in flight and
    /// returns once all of them resolved. `on_done(completed, total)` runs after
    /// each chunk. Results come back in completion order.
    pub async fn summarize_all<F>(&self, chunks: &[Chunk], mut on_done: F) -> Vec<PartialSummary>
    where
        F: FnMut(usize, usize),
    {
        let total = chunks.len();
        let mut pending = stream::iter(chunks.iter().map(|chunk| self.summarize_chunk(chunk)))
            .buffer_unordered(self.settings.concurrency.get());

        let mut partials = Vec::with_capacity(total);
        while let Some(partial) = pending.next().await {
            partials.push(partial);
            on_done(partials.len(), total);
        }
        partials
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.settings.backoff_base.saturating_mul(factor)
    }
}

fn placeholder(chunk_index: usize) -> PartialSummary {
    PartialSummary {
        chunk_index,
        text: PLACEHOLDER.to_string(),
        ok: false,
    }
}
