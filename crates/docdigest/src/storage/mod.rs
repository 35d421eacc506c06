pub mod artifact;
pub mod pdf_writer;
pub mod sweep;

pub use artifact::{Artifact, ArtifactRenderer, PdfArtifactStore};
pub use sweep::{sweep_orphaned_artifacts, SweepReport};
