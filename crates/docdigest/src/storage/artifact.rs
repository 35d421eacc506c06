use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::RenderError;
use crate::merge::MergedSummary;
use crate::sanitize::artifact_stem;
use crate::storage::pdf_writer::render_text_pdf;

/// Reference to a rendered summary in durable storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub locator: PathBuf,
}

impl Artifact {
    pub fn locator_string(&self) -> String {
        self.locator.to_string_lossy().into_owned()
    }
}

pub trait ArtifactRenderer: Send + Sync {
    /// Writes the merged summary for `job_id`. Rendering the same job twice
    /// replaces the earlier output.
    fn render(
        &self,
        job_id: &str,
        display_name: &str,
        summary: &MergedSummary,
    ) -> Result<Artifact, RenderError>;

    /// Removes an artifact that will not be recorded.
    fn discard(&self, artifact: &Artifact) -> Result<(), RenderError>;
}

/// Stores artifacts as PDFs at `<output>/<job_id>/<stem>-summary.pdf`.
pub struct PdfArtifactStore {
    output_directory: PathBuf,
}

impl PdfArtifactStore {
    pub fn new<P: AsRef<Path>>(output_directory: P) -> Self {
        Self {
            output_directory: output_directory.as_ref().to_path_buf(),
        }
    }

    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }

    /// Deterministic location for a job's artifact.
    pub fn locator_for(&self, job_id: &str, display_name: &str) -> PathBuf {
        self.output_directory
            .join(job_id)
            .join(format!("{}-summary.pdf", artifact_stem(display_name)))
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), RenderError> {
        std::fs::create_dir_all(path).map_err(|e| RenderError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

impl ArtifactRenderer for PdfArtifactStore {
    fn render(
        &self,
        job_id: &str,
        display_name: &str,
        summary: &MergedSummary,
    ) -> Result<Artifact, RenderError> {
        let locator = self.locator_for(job_id, display_name);
        let dir = locator
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.output_directory.clone());
        self.ensure_directory(&dir)?;

        let title = format!("Summary: {}", display_name);
        let bytes = render_text_pdf(&title, &summary.text)?;

        // Write next to the target and rename so readers never see a partial file.
        let write_err = |e: std::io::Error| RenderError::WriteFile {
            path: locator.clone(),
            source: e,
        };
        let mut staged = tempfile::Builder::new()
            .prefix(".render-")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(write_err)?;
        staged.write_all(&bytes).map_err(write_err)?;
        staged.as_file().sync_all().map_err(write_err)?;
        staged.persist(&locator).map_err(|e| write_err(e.error))?;

        Ok(Artifact { locator })
    }

    fn discard(&self, artifact: &Artifact) -> Result<(), RenderError> {
        match std::fs::remove_file(&artifact.locator) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(RenderError::WriteFile {
                    path: artifact.locator.clone(),
                    source: e,
                })
            }
        }

        // Drop the per-job directory if this was its only file.
        if let Some(parent) = artifact.locator.parent() {
            if parent != self.output_directory {
                let _ = std::fs::remove_dir(parent);
            }
        }
        Ok(())
    }
}
