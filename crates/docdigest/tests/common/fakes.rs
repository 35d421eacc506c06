//! In-process stand-ins for the OCR engine, rasterizer, extractor,
//! summarization provider and persistence backend.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use docdigest::error::{ExtractionError, PersistenceError, ServiceError};
use docdigest::persistence::{NewDocument, PersistenceGateway};
use docdigest::processor::{Document, OcrEngine, PageImage, PageRasterizer, TextExtractor};
use docdigest::summarize::{ProviderResponse, SummarizationProvider};

/// Writes a dummy image per page into the scratch directory.
#[derive(Default)]
pub struct FakeRasterizer {
    pub pages_rendered: AtomicUsize,
}

impl PageRasterizer for FakeRasterizer {
    fn rasterize(
        &self,
        _pdf: &Path,
        page: u32,
        _dpi: u32,
        scratch: &Path,
    ) -> Result<PageImage, ExtractionError> {
        let path = scratch.join(format!("page-{:03}.png", page));
        std::fs::write(&path, b"not really a png").map_err(ExtractionError::Scratch)?;
        self.pages_rendered.fetch_add(1, Ordering::SeqCst);
        Ok(PageImage { page, path })
    }
}

/// Recognizes `"<text> <page>"` on every page, or fails every call.
pub struct FakeOcr {
    text: Option<String>,
    pub calls: AtomicUsize,
}

impl FakeOcr {
    pub fn reading(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn broken() -> Self {
        Self {
            text: None,
            calls: AtomicUsize::new(0),
        }
    }
}

impl OcrEngine for FakeOcr {
    fn recognize(&self, image: &PageImage) -> Result<String, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.text {
            Some(text) => Ok(format!("{} {}", text, image.page)),
            None => Err(ExtractionError::Ocr {
                page: image.page,
                reason: "tesseract exited with status 1".to_string(),
            }),
        }
    }
}

/// Returns fixed text for every document. While `corrupt` is set it
/// reports the file as unreadable instead.
pub struct StaticExtractor {
    text: String,
    corrupt: AtomicBool,
}

impl StaticExtractor {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            corrupt: AtomicBool::new(false),
        }
    }

    pub fn set_corrupt(&self, corrupt: bool) {
        self.corrupt.store(corrupt, Ordering::SeqCst);
    }
}

impl TextExtractor for StaticExtractor {
    fn extract(&self, path: &Path) -> Result<Document, ExtractionError> {
        if self.corrupt.load(Ordering::SeqCst) {
            return Err(ExtractionError::Corrupt {
                path: path.to_path_buf(),
                reason: "invalid file header".to_string(),
            });
        }
        Ok(Document {
            text: self.text.clone(),
            page_count: 1,
            used_ocr: false,
        })
    }
}

/// Answers `"summary of <chunk>"`. Chunks listed in `rejected` get a
/// permanent HTTP 400 instead, chunks in `unavailable` a transient 503 on
/// every call.
#[derive(Default)]
pub struct EchoProvider {
    rejected: Vec<String>,
    unavailable: Vec<String>,
    calls: Mutex<Vec<String>>,
}

impl EchoProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(chunks: &[&str]) -> Self {
        Self {
            rejected: chunks.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn unavailable_for(chunks: &[&str]) -> Self {
        Self {
            unavailable: chunks.iter().map(|c| c.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SummarizationProvider for EchoProvider {
    async fn summarize(&self, chunk_text: &str) -> ProviderResponse {
        self.calls.lock().unwrap().push(chunk_text.to_string());
        if self.rejected.iter().any(|r| r == chunk_text) {
            return ProviderResponse::ServiceError(ServiceError::Status {
                status: 400,
                body: "request rejected".to_string(),
            });
        }
        if self.unavailable.iter().any(|u| u == chunk_text) {
            return ProviderResponse::ServiceError(ServiceError::Status {
                status: 503,
                body: "model overloaded".to_string(),
            });
        }
        ProviderResponse::Success(format!("summary of {}", chunk_text.trim()))
    }
}

/// A backend that is always down.
pub struct UnavailablePersistence;

impl PersistenceGateway for UnavailablePersistence {
    fn create_document_record(&self, _document: &NewDocument) -> Result<String, PersistenceError> {
        Err(PersistenceError::Unavailable("connection refused".to_string()))
    }

    fn create_summary_record(
        &self,
        _content: &str,
        _document_id: &str,
        _owner_id: &str,
    ) -> Result<String, PersistenceError> {
        Err(PersistenceError::Unavailable("connection refused".to_string()))
    }

    fn is_artifact_referenced(&self, _locator: &str) -> Result<bool, PersistenceError> {
        Ok(false)
    }
}
