pub mod ocr;
pub mod pdf;
pub mod raster;

use std::path::{Path, PathBuf};

use crate::error::ExtractionError;

pub use ocr::{OcrEngine, TesseractEngine};
pub use pdf::PdfExtractor;
pub use raster::{PageRasterizer, PdftoppmRasterizer};

/// Extracted text of one source document. Owned by the worker for the
/// lifetime of a single job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub text: String,
    pub page_count: usize,
    pub used_ocr: bool,
}

/// A rasterized page waiting for recognition.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 1-based page number.
    pub page: u32,
    pub path: PathBuf,
}

pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Document, ExtractionError>;

    /// Like [`TextExtractor::extract`], calling `on_page(done, total)` after
    /// every page that went through OCR.
    fn extract_with_progress(
        &self,
        path: &Path,
        on_page: &mut dyn FnMut(usize, usize),
    ) -> Result<Document, ExtractionError> {
        let _ = on_page;
        self.extract(path)
    }
}
