use std::io::Cursor;

use crate::error::ExtractionError;
use crate::processor::PageImage;

/// Optical character recognition over a single page image.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &PageImage) -> Result<String, ExtractionError>;
}

/// Tesseract via leptess.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    languages: String,
}

impl TesseractEngine {
    pub fn new(languages: &[String]) -> Self {
        let languages = if languages.is_empty() {
            "eng".to_string()
        } else {
            languages.join("+")
        };
        Self { languages }
    }

    pub fn languages(&self) -> &str {
        &self.languages
    }

    pub fn recognize_bytes(&self, page: u32, image_data: &[u8]) -> Result<String, ExtractionError> {
        let ocr_err = |reason: String| ExtractionError::Ocr { page, reason };

        let img = image::load_from_memory(image_data)
            .map_err(|e| ocr_err(format!("Failed to load image: {}", e)))?;

        // leptess only accepts encoded image bytes
        let mut png_data = Vec::new();
        img.write_to(&mut Cursor::new(&mut png_data), image::ImageFormat::Png)
            .map_err(|e| ocr_err(format!("Failed to convert image: {}", e)))?;

        let mut lt = leptess::LepTess::new(None, &self.languages)
            .map_err(|e| ocr_err(format!("Failed to initialize Tesseract: {}", e)))?;

        lt.set_image_from_mem(&png_data)
            .map_err(|e| ocr_err(format!("Failed to set image for OCR: {}", e)))?;

        lt.get_utf8_text()
            .map_err(|e| ocr_err(format!("Recognition failed: {}", e)))
    }
}

impl OcrEngine for TesseractEngine {
    fn recognize(&self, image: &PageImage) -> Result<String, ExtractionError> {
        let _span = tracing::debug_span!("extract.ocr_page", page = image.page).entered();

        let data = std::fs::read(&image.path).map_err(|e| ExtractionError::Ocr {
            page: image.page,
            reason: format!("Failed to read page image: {}", e),
        })?;
        self.recognize_bytes(image.page, &data)
    }
}
