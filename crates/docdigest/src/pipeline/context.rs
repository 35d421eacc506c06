use tokio_util::sync::CancellationToken;

use crate::merge::MergedSummary;
use crate::queue::Job;
use crate::storage::Artifact;

use super::error::PipelineWarning;

pub struct PipelineContext {
    // Input
    pub job: Job,
    pub worker_id: String,
    pub cancel: CancellationToken,

    // Extraction facts; the text itself is dropped once chunked
    pub page_count: usize,
    pub used_ocr: bool,
    pub chunk_count: usize,

    // Set after merge
    pub summary: Option<MergedSummary>,

    // Set after render; cleared again if the artifact is discarded
    pub artifact: Option<Artifact>,

    // Set once the document record exists
    pub document_id: Option<String>,

    // Non-fatal warnings
    pub warnings: Vec<PipelineWarning>,
}

impl PipelineContext {
    pub fn new(job: Job, worker_id: &str, cancel: CancellationToken) -> Self {
        Self {
            job,
            worker_id: worker_id.to_string(),
            cancel,
            page_count: 0,
            used_ocr: false,
            chunk_count: 0,
            summary: None,
            artifact: None,
            document_id: None,
            warnings: Vec::new(),
        }
    }
}
