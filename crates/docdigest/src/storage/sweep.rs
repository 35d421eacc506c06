//! Reconciliation of artifacts that were rendered but never recorded.
//!
//! A worker that crashes between rendering and persistence leaves a file no
//! document record points at. The sweep removes such files once they are older
//! than a grace period, so in-flight jobs are never touched.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use walkdir::WalkDir;

use crate::error::PersistenceError;
use crate::persistence::PersistenceGateway;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub removed: Vec<PathBuf>,
}

/// Removes unreferenced `*-summary.pdf` files under `output_dir` older than `grace`.
pub fn sweep_orphaned_artifacts(
    output_dir: &Path,
    gateway: &dyn PersistenceGateway,
    grace: Duration,
) -> Result<SweepReport, PersistenceError> {
    let _span = tracing::info_span!("sweep", grace_secs = grace.as_secs()).entered();
    let mut report = SweepReport::default();

    if !output_dir.exists() {
        return Ok(report);
    }

    let now = SystemTime::now();

    for entry in WalkDir::new(output_dir)
        .min_depth(1)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !entry.file_type().is_file() || !is_artifact(path) {
            continue;
        }
        report.scanned += 1;

        let age = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or(Duration::ZERO);
        if age < grace {
            continue;
        }

        if gateway.is_artifact_referenced(&path.to_string_lossy())? {
            continue;
        }

        match std::fs::remove_file(path) {
            Ok(()) => {
                log::info!("Removed orphaned artifact {}", path.display());
                if let Some(parent) = path.parent().filter(|p| *p != output_dir) {
                    let _ = std::fs::remove_dir(parent);
                }
                report.removed.push(path.to_path_buf());
            }
            Err(e) => log::warn!("Failed to remove orphaned artifact {}: {}", path.display(), e),
        }
    }

    Ok(report)
}

fn is_artifact(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with("-summary.pdf"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::persistence::{NewDocument, SqlitePersistence};
    use tempfile::TempDir;

    fn write_artifact(root: &Path, job_id: &str) -> PathBuf {
        let dir = root.join(job_id);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("paper-summary.pdf");
        std::fs::write(&path, b"%PDF-1.5").unwrap();
        path
    }

    #[test]
    fn test_sweep_removes_only_unreferenced() {
        let temp_dir = TempDir::new().unwrap();
        let gateway = SqlitePersistence::new(Database::open_in_memory().unwrap());

        let kept = write_artifact(temp_dir.path(), "job-kept");
        let orphan = write_artifact(temp_dir.path(), "job-orphan");
        std::fs::write(temp_dir.path().join("notes.txt"), b"unrelated").unwrap();

        gateway
            .create_document_record(&NewDocument {
                job_id: "job-kept".to_string(),
                title: "paper".to_string(),
                artifact_locator: kept.to_string_lossy().into_owned(),
                owner_id: "u".to_string(),
            })
            .unwrap();

        let report = sweep_orphaned_artifacts(temp_dir.path(), &gateway, Duration::ZERO).unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.removed, vec![orphan.clone()]);
        assert!(kept.exists());
        assert!(!orphan.exists());
        assert!(!temp_dir.path().join("job-orphan").exists());
        assert!(temp_dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_sweep_respects_grace_period() {
        let temp_dir = TempDir::new().unwrap();
        let gateway = SqlitePersistence::new(Database::open_in_memory().unwrap());
        let fresh = write_artifact(temp_dir.path(), "job-new");

        let report =
            sweep_orphaned_artifacts(temp_dir.path(), &gateway, Duration::from_secs(3600)).unwrap();

        assert!(report.removed.is_empty());
        assert!(fresh.exists());
    }

    #[test]
    fn test_sweep_missing_directory() {
        let gateway = SqlitePersistence::new(Database::open_in_memory().unwrap());
        let report =
            sweep_orphaned_artifacts(Path::new("/nonexistent/out"), &gateway, Duration::ZERO)
                .unwrap();
        assert_eq!(report, SweepReport::default());
    }
}
