//! On-disk persistence for per-attempt artifact sets.
//!
//! Layout, relative to the store root:
//!
//! ```text
//! attempts/<attempt_id>/files/<path>   one file per bundle entry
//! attempts/<attempt_id>/index.json     the ArtifactIndex record
//! attempts/<attempt_id>/report.json    the merged ValidationReport
//! ```
//!
//! Attempt directories are immutable once written: a second write to
//! the same attempt id is an error, and loading always recomputes
//! digests and rejects any disagreement with the index.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::bundle::{ArtifactBundle, BundleError, FileEntry};
use crate::report::ValidationReport;
use crate::types::{AttemptId, JobId, ModuleId};

/// Errors from the artifact store.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("artifact store I/O failure at {path}: {source}")]
    #[diagnostic(code(modforge::artifact::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The attempt directory already exists; attempts are immutable.
    #[error("attempt {attempt_id} already persisted")]
    #[diagnostic(
        code(modforge::artifact::attempt_exists),
        help("Attempt artifacts are write-once; allocate a new attempt id instead.")
    )]
    AttemptExists { attempt_id: AttemptId },

    #[error("malformed index for attempt {attempt_id}: {source}")]
    #[diagnostic(code(modforge::artifact::index))]
    Index {
        attempt_id: AttemptId,
        #[source]
        source: serde_json::Error,
    },

    /// A loaded file's digest or the bundle digest disagrees with the
    /// index record.
    #[error(transparent)]
    #[diagnostic(code(modforge::artifact::verify))]
    Verify(#[from] BundleError),

    /// The index references a file missing from disk.
    #[error("attempt {attempt_id} is missing file {path:?}")]
    #[diagnostic(code(modforge::artifact::missing_file))]
    MissingFile { attempt_id: AttemptId, path: String },
}

/// One file row in an [`ArtifactIndex`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub path: String,
    pub digest: String,
    pub bytes: u64,
}

/// Metadata record for one persisted bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactIndex {
    pub job_id: JobId,
    pub attempt_id: AttemptId,
    pub bundle_digest: String,
    pub files: Vec<IndexEntry>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_id: Option<ModuleId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

/// Filesystem-backed store of per-attempt artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

fn write_all(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, bytes).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl ArtifactStore {
    /// Open (and create, if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("attempts")).map_err(|source| StoreError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn attempt_dir(&self, attempt_id: AttemptId) -> PathBuf {
        self.root.join("attempts").join(attempt_id.to_string())
    }

    /// Persist a bundle as a new immutable attempt directory and return
    /// its index record.
    pub fn write_attempt(
        &self,
        job_id: JobId,
        attempt_id: AttemptId,
        module_id: Option<&ModuleId>,
        stage: Option<&str>,
        bundle: &ArtifactBundle,
    ) -> Result<ArtifactIndex, StoreError> {
        let dir = self.attempt_dir(attempt_id);
        if dir.exists() {
            return Err(StoreError::AttemptExists { attempt_id });
        }

        for entry in bundle.iter() {
            let target = dir.join("files").join(entry.path());
            write_all(&target, entry.bytes())?;
        }

        let index = ArtifactIndex {
            job_id,
            attempt_id,
            bundle_digest: bundle.digest(),
            files: bundle
                .iter()
                .map(|e| IndexEntry {
                    path: e.path().to_string(),
                    digest: e.digest().to_string(),
                    bytes: e.len() as u64,
                })
                .collect(),
            created_at: Utc::now(),
            module_id: module_id.cloned(),
            stage: stage.map(str::to_owned),
        };

        let body = serde_json::to_vec_pretty(&index).map_err(|source| StoreError::Index {
            attempt_id,
            source,
        })?;
        write_all(&dir.join("index.json"), &body)?;
        Ok(index)
    }

    /// Persist the merged validation report for an attempt; returns the
    /// store-relative `report_ref` used by attestations.
    pub fn write_report(
        &self,
        attempt_id: AttemptId,
        report: &ValidationReport,
    ) -> Result<String, StoreError> {
        let body = serde_json::to_vec_pretty(report).map_err(|source| StoreError::Index {
            attempt_id,
            source,
        })?;
        write_all(&self.attempt_dir(attempt_id).join("report.json"), &body)?;
        Ok(format!("attempts/{attempt_id}/report.json"))
    }

    /// Load an attempt, recomputing every digest. Any disagreement with
    /// the index is rejected.
    pub fn load_attempt(
        &self,
        attempt_id: AttemptId,
    ) -> Result<(ArtifactIndex, ArtifactBundle), StoreError> {
        let dir = self.attempt_dir(attempt_id);
        let index_path = dir.join("index.json");
        let raw = std::fs::read(&index_path).map_err(|source| StoreError::Io {
            path: index_path,
            source,
        })?;
        let index: ArtifactIndex = serde_json::from_slice(&raw).map_err(|source| {
            StoreError::Index {
                attempt_id,
                source,
            }
        })?;

        let mut bundle = ArtifactBundle::new();
        for row in &index.files {
            let file_path = dir.join("files").join(&row.path);
            let bytes = std::fs::read(&file_path).map_err(|_| StoreError::MissingFile {
                attempt_id,
                path: row.path.clone(),
            })?;
            let entry = FileEntry::new(row.path.clone(), bytes)?;
            if entry.digest() != row.digest {
                return Err(BundleError::DigestMismatch {
                    expected: row.digest.clone(),
                    actual: entry.digest().to_string(),
                }
                .into());
            }
            bundle.insert(entry);
        }
        bundle.verify(&index.bundle_digest)?;
        Ok((index, bundle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> ArtifactBundle {
        ArtifactBundle::from_entries([
            FileEntry::new("modules/w/o/adapter.py", b"x = 1".to_vec()).unwrap(),
            FileEntry::new("modules/w/o/manifest.json", b"{}".to_vec()).unwrap(),
        ])
        .unwrap()
    }

    #[test]
    fn round_trip_preserves_digest() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let (job, attempt) = (JobId::new(), AttemptId::new());
        let original = bundle();

        let index = store
            .write_attempt(job, attempt, None, Some("implement"), &original)
            .unwrap();
        assert_eq!(index.bundle_digest, original.digest());

        let (loaded_index, loaded) = store.load_attempt(attempt).unwrap();
        assert_eq!(loaded_index.bundle_digest, original.digest());
        assert_eq!(loaded.digest(), original.digest());
    }

    #[test]
    fn attempts_are_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let attempt = AttemptId::new();
        store
            .write_attempt(JobId::new(), attempt, None, None, &bundle())
            .unwrap();
        assert!(matches!(
            store.write_attempt(JobId::new(), attempt, None, None, &bundle()),
            Err(StoreError::AttemptExists { .. })
        ));
    }

    #[test]
    fn tampered_file_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let attempt = AttemptId::new();
        store
            .write_attempt(JobId::new(), attempt, None, None, &bundle())
            .unwrap();

        let victim = dir
            .path()
            .join("attempts")
            .join(attempt.to_string())
            .join("files/modules/w/o/adapter.py");
        std::fs::write(&victim, b"x = 2").unwrap();

        assert!(matches!(
            store.load_attempt(attempt),
            Err(StoreError::Verify(BundleError::DigestMismatch { .. }))
        ));
    }

    #[test]
    fn report_ref_is_store_relative() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let attempt = AttemptId::new();
        store
            .write_attempt(JobId::new(), attempt, None, None, &bundle())
            .unwrap();
        let report_ref = store
            .write_report(attempt, &ValidationReport::new())
            .unwrap();
        assert_eq!(report_ref, format!("attempts/{attempt}/report.json"));
        assert!(dir
            .path()
            .join("attempts")
            .join(attempt.to_string())
            .join("report.json")
            .exists());
    }
}
