use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::ExtractionError;
use crate::processor::PageImage;

/// Renders a single PDF page to an image file inside `scratch`.
pub trait PageRasterizer: Send + Sync {
    fn rasterize(
        &self,
        pdf: &Path,
        page: u32,
        dpi: u32,
        scratch: &Path,
    ) -> Result<PageImage, ExtractionError>;
}

/// Rasterizer backed by poppler's `pdftoppm`.
#[derive(Debug, Clone)]
pub struct PdftoppmRasterizer {
    program: PathBuf,
}

impl PdftoppmRasterizer {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("pdftoppm"),
        }
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for PdftoppmRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

impl PageRasterizer for PdftoppmRasterizer {
    fn rasterize(
        &self,
        pdf: &Path,
        page: u32,
        dpi: u32,
        scratch: &Path,
    ) -> Result<PageImage, ExtractionError> {
        let prefix = scratch.join(format!("page-{}", page));
        let page_arg = page.to_string();

        let output = Command::new(&self.program)
            .arg("-png")
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-f")
            .arg(&page_arg)
            .arg("-l")
            .arg(&page_arg)
            .arg(pdf)
            .arg(&prefix)
            .output()
            .map_err(|e| ExtractionError::Rasterize {
                page,
                reason: format!(
                    "Failed to run {}: {}. Make sure poppler-utils is installed.",
                    self.program.display(),
                    e
                ),
            })?;

        if !output.status.success() {
            return Err(ExtractionError::Rasterize {
                page,
                reason: format!(
                    "{} exited with {}: {}",
                    self.program.display(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        // pdftoppm zero-pads the page suffix to the width of the page count
        let path = find_rendered_page(&prefix, page).ok_or_else(|| ExtractionError::Rasterize {
            page,
            reason: "Rendered page image not found".to_string(),
        })?;

        Ok(PageImage { page, path })
    }
}

fn find_rendered_page(prefix: &Path, page: u32) -> Option<PathBuf> {
    let prefix = prefix.display();
    [
        format!("{}-{}.png", prefix, page),
        format!("{}-{:02}.png", prefix, page),
        format!("{}-{:03}.png", prefix, page),
        format!("{}-{:04}.png", prefix, page),
    ]
    .into_iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}
