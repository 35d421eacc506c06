use chrono::Utc;

use super::{NewDocument, PersistenceGateway};
use crate::db::document_repo::{self, DocumentRow, SummaryRow};
use crate::db::{format_timestamp, Database};
use crate::error::PersistenceError;

/// [`PersistenceGateway`] over the local SQLite database.
#[derive(Clone)]
pub struct SqlitePersistence {
    db: Database,
}

impl SqlitePersistence {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl PersistenceGateway for SqlitePersistence {
    fn create_document_record(&self, document: &NewDocument) -> Result<String, PersistenceError> {
        let row = DocumentRow {
            id: uuid::Uuid::new_v4().to_string(),
            job_id: document.job_id.clone(),
            title: document.title.clone(),
            artifact_locator: document.artifact_locator.clone(),
            owner_id: document.owner_id.clone(),
            created_at: format_timestamp(Utc::now()),
        };
        document_repo::upsert_document(&self.db, &row)
            .map_err(|e| PersistenceError::Document(e.to_string()))
    }

    fn create_summary_record(
        &self,
        content: &str,
        document_id: &str,
        owner_id: &str,
    ) -> Result<String, PersistenceError> {
        let row = SummaryRow {
            id: uuid::Uuid::new_v4().to_string(),
            document_id: document_id.to_string(),
            content: content.to_string(),
            owner_id: owner_id.to_string(),
            created_at: format_timestamp(Utc::now()),
        };
        document_repo::upsert_summary(&self.db, &row)
            .map_err(|e| PersistenceError::Summary(e.to_string()))
    }

    fn is_artifact_referenced(&self, locator: &str) -> Result<bool, PersistenceError> {
        Ok(document_repo::locator_exists(&self.db, locator)?)
    }
}
