use async_trait::async_trait;

use crate::error::ServiceError;

/// Outcome of one provider call. Callers must handle every variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderResponse {
    Success(String),
    /// The provider answered but produced no text.
    Empty,
    ServiceError(ServiceError),
}

/// An external language-model service that condenses a chunk of text.
#[async_trait]
pub trait SummarizationProvider: Send + Sync {
    async fn summarize(&self, chunk_text: &str) -> ProviderResponse;
}
