//! Document and summary repository.
//!
//! Both inserts are upserts keyed by the natural owner of the row (`job_id` for
//! documents, `document_id` for summaries) so a retried job never duplicates
//! records.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A document row.
#[derive(Debug, Clone)]
pub struct DocumentRow {
    pub id: String,
    pub job_id: String,
    pub title: String,
    pub artifact_locator: String,
    pub owner_id: String,
    pub created_at: String,
}

impl DocumentRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            title: row.get("title")?,
            artifact_locator: row.get("artifact_locator")?,
            owner_id: row.get("owner_id")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// A summary row.
#[derive(Debug, Clone)]
pub struct SummaryRow {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub owner_id: String,
    pub created_at: String,
}

/// Inserts or refreshes the document for `row.job_id`. Returns the stored id,
/// which is the existing one when the job already had a document.
pub fn upsert_document(db: &Database, row: &DocumentRow) -> Result<String, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO documents (id, job_id, title, artifact_locator, owner_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (job_id) DO UPDATE SET
                title = excluded.title,
                artifact_locator = excluded.artifact_locator,
                owner_id = excluded.owner_id",
            params![
                row.id,
                row.job_id,
                row.title,
                row.artifact_locator,
                row.owner_id,
                row.created_at,
            ],
        )?;
        let id: String = conn.query_row(
            "SELECT id FROM documents WHERE job_id = ?1",
            params![row.job_id],
            |r| r.get(0),
        )?;
        Ok(id)
    })
}

/// Inserts or replaces the summary content for `row.document_id`.
pub fn upsert_summary(db: &Database, row: &SummaryRow) -> Result<String, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO summaries (id, document_id, content, owner_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (document_id) DO UPDATE SET
                content = excluded.content,
                owner_id = excluded.owner_id",
            params![
                row.id,
                row.document_id,
                row.content,
                row.owner_id,
                row.created_at,
            ],
        )?;
        let id: String = conn.query_row(
            "SELECT id FROM summaries WHERE document_id = ?1",
            params![row.document_id],
            |r| r.get(0),
        )?;
        Ok(id)
    })
}

pub fn find_document_by_job(db: &Database, job_id: &str) -> Result<Option<DocumentRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM documents WHERE job_id = ?1",
                params![job_id],
                DocumentRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

pub fn find_summary_content(
    db: &Database,
    document_id: &str,
) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let content = conn
            .query_row(
                "SELECT content FROM summaries WHERE document_id = ?1",
                params![document_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(content)
    })
}

/// Returns true if any document points at `locator`.
pub fn locator_exists(db: &Database, locator: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE artifact_locator = ?1",
            params![locator],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    })
}
