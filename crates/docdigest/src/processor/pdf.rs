use std::path::Path;
use std::sync::Arc;

use crate::error::ExtractionError;
use crate::processor::ocr::OcrEngine;
use crate::processor::raster::PageRasterizer;
use crate::processor::{Document, TextExtractor};

/// Structural PDF text extraction with a rasterize + OCR fallback for
/// image-only documents.
pub struct PdfExtractor {
    rasterizer: Arc<dyn PageRasterizer>,
    ocr: Arc<dyn OcrEngine>,
    dpi: u32,
    min_text_chars: usize,
}

impl PdfExtractor {
    pub fn new(
        rasterizer: Arc<dyn PageRasterizer>,
        ocr: Arc<dyn OcrEngine>,
        dpi: u32,
        min_text_chars: usize,
    ) -> Self {
        Self {
            rasterizer,
            ocr,
            dpi,
            min_text_chars,
        }
    }

    /// Rasterizes and recognizes every page in order.
    ///
    /// All page images live in a scratch directory that is removed when this
    /// function returns, on success and on every error path.
    fn ocr_pages(
        &self,
        path: &Path,
        page_count: usize,
        on_page: &mut dyn FnMut(usize, usize),
    ) -> Result<String, ExtractionError> {
        let _span = tracing::info_span!("extract.ocr_fallback", pages = page_count).entered();

        let scratch = tempfile::Builder::new()
            .prefix("docdigest-ocr-")
            .tempdir()
            .map_err(ExtractionError::Scratch)?;

        let mut text = String::new();
        for page in 1..=page_count as u32 {
            let image = self
                .rasterizer
                .rasterize(path, page, self.dpi, scratch.path())?;
            let recognized = self.ocr.recognize(&image);
            // Release the page image before the next one is rendered.
            if let Err(e) = std::fs::remove_file(&image.path) {
                log::debug!("Could not remove page image {}: {}", image.path.display(), e);
            }
            let page_text = recognized?;
            text.push_str(page_text.trim_end());
            text.push('\n');
            on_page(page as usize, page_count);
        }

        Ok(text)
    }
}

impl TextExtractor for PdfExtractor {
    fn extract(&self, path: &Path) -> Result<Document, ExtractionError> {
        self.extract_with_progress(path, &mut |_, _| {})
    }

    fn extract_with_progress(
        &self,
        path: &Path,
        on_page: &mut dyn FnMut(usize, usize),
    ) -> Result<Document, ExtractionError> {
        let pdf_bytes = std::fs::read(path).map_err(|e| ExtractionError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

        let doc = lopdf::Document::load_mem(&pdf_bytes).map_err(|e| ExtractionError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let page_count = doc.get_pages().len();
        let text = extract_text_from_pdf(&doc);

        if !needs_ocr(&text, self.min_text_chars) {
            return Ok(Document {
                text,
                page_count,
                used_ocr: false,
            });
        }

        tracing::info!(
            pages = page_count,
            native_chars = text.trim().chars().count(),
            "Native text below threshold, falling back to OCR"
        );

        let text = self.ocr_pages(path, page_count, on_page)?;
        let chars = text.trim().chars().count();
        if chars < self.min_text_chars.max(1) {
            return Err(ExtractionError::InsufficientText {
                chars,
                required: self.min_text_chars.max(1),
            });
        }

        Ok(Document {
            text,
            page_count,
            used_ocr: true,
        })
    }
}

fn extract_text_from_pdf(doc: &lopdf::Document) -> String {
    let mut text = String::new();

    for (page_num, _) in doc.get_pages() {
        match doc.extract_text(&[page_num]) {
            Ok(page_text) => {
                text.push_str(&page_text);
                text.push('\n');
            }
            Err(e) => log::debug!("No text layer on page {}: {}", page_num, e),
        }
    }

    text
}

/// Marker lopdf emits for CID fonts it cannot decode.
const IDENTITY_H_PATTERN: &str = "?Identity-H Unimplemented?";

/// Texts at most this long skip the alphanumeric ratio check.
const MIN_TOTAL_CHARS: usize = 50;

/// Below this share of alphanumeric characters the text is considered garbled.
const MIN_ALPHANUMERIC_PERCENT: usize = 10;

/// Returns true when natively extracted text is too short or too garbled to use.
fn needs_ocr(text: &str, min_text_chars: usize) -> bool {
    let trimmed = text.trim();

    let cleaned = trimmed
        .replace(IDENTITY_H_PATTERN, "")
        .replace(['\n', ' '], "");

    if cleaned.is_empty() || cleaned.chars().count() < min_text_chars {
        return true;
    }

    let total_chars = trimmed.chars().count();
    let alphanumeric_chars = trimmed.chars().filter(|c| c.is_alphanumeric()).count();

    total_chars > MIN_TOTAL_CHARS
        && alphanumeric_chars * 100 < total_chars * MIN_ALPHANUMERIC_PERCENT
}
