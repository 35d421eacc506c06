//! Recording finished jobs: one document record and one summary record per job.

mod sqlite;

use crate::error::PersistenceError;

pub use sqlite::SqlitePersistence;

/// Document record request. `job_id` is the idempotency key.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub job_id: String,
    pub title: String,
    pub artifact_locator: String,
    pub owner_id: String,
}

pub trait PersistenceGateway: Send + Sync {
    /// Creates (or, for a retried job, refreshes) the document record.
    fn create_document_record(&self, document: &NewDocument) -> Result<String, PersistenceError>;

    /// Creates (or replaces) the summary linked to `document_id`.
    fn create_summary_record(
        &self,
        content: &str,
        document_id: &str,
        owner_id: &str,
    ) -> Result<String, PersistenceError>;

    /// Whether any document record points at `locator`.
    fn is_artifact_referenced(&self, locator: &str) -> Result<bool, PersistenceError>;
}
