//! Deterministic file bundles with content-addressed identity.
//!
//! Bundles are ordered maps keyed by canonical (lexicographic) path
//! order. The bundle digest hashes the sequence of (path, file digest)
//! pairs in that order, so identical content always yields the same
//! digest no matter how the bundle was assembled.

use std::collections::BTreeMap;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::policy::path_is_safe;
use crate::types::ModuleId;

/// Errors from bundle construction and verification.
#[derive(Debug, Error, Diagnostic)]
pub enum BundleError {
    /// Path contains traversal segments, forbidden characters, or an
    /// absolute prefix.
    #[error("unsafe bundle path: {path:?}")]
    #[diagnostic(
        code(modforge::artifact::unsafe_path),
        help("Bundle paths must be relative, slash-separated, and free of '..' segments.")
    )]
    UnsafePath { path: String },

    /// Path does not live under the module's directory prefix.
    #[error("path {path:?} is outside module prefix {prefix:?}")]
    #[diagnostic(code(modforge::artifact::prefix_violation))]
    PrefixViolation { path: String, prefix: String },

    /// Recomputed digest disagrees with the expected value.
    #[error("bundle digest mismatch: expected {expected}, recomputed {actual}")]
    #[diagnostic(
        code(modforge::artifact::digest_mismatch),
        help("The bundle content changed since the digest was recorded; reject it.")
    )]
    DigestMismatch { expected: String, actual: String },
}

/// SHA-256 hex digest of a byte slice.
#[must_use]
pub fn file_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// One file in a bundle: relative path, content, and content digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    path: String,
    bytes: Vec<u8>,
    digest: String,
}

impl FileEntry {
    /// Create an entry, validating the path.
    pub fn new(path: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Result<Self, BundleError> {
        let path = path.into();
        if !path_is_safe(&path) {
            return Err(BundleError::UnsafePath { path });
        }
        let bytes = bytes.into();
        let digest = file_digest(&bytes);
        Ok(Self {
            path,
            bytes,
            digest,
        })
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Difference between two bundles, by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleDiff {
    pub added: Vec<String>,
    pub deleted: Vec<String>,
    /// Same path present in both, different file digest.
    pub changed: Vec<String>,
}

impl BundleDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.changed.is_empty()
    }
}

/// Ordered mapping of [`FileEntry`] values, indexed by canonical
/// lexicographic path order.
///
/// Same content ⇒ same digest; this is a tested property, including
/// under permutation of the input order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArtifactBundle {
    files: BTreeMap<String, FileEntry>,
}

impl ArtifactBundle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from any iteration order; the map canonicalizes it.
    pub fn from_entries(
        entries: impl IntoIterator<Item = FileEntry>,
    ) -> Result<Self, BundleError> {
        let mut bundle = Self::new();
        for entry in entries {
            bundle.insert(entry);
        }
        Ok(bundle)
    }

    /// Insert or replace a file.
    pub fn insert(&mut self, entry: FileEntry) {
        self.files.insert(entry.path.clone(), entry);
    }

    /// Remove a file by path.
    pub fn remove(&mut self, path: &str) -> Option<FileEntry> {
        self.files.remove(path)
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.files.get(path)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Paths in canonical order.
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        self.files.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileEntry> {
        self.files.values()
    }

    /// Bundle digest: SHA-256 over the (path, file digest) sequence in
    /// canonical path order, with unambiguous separators.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for entry in self.files.values() {
            hasher.update(entry.path.as_bytes());
            hasher.update([0u8]);
            hasher.update(entry.digest.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Recompute the digest and compare against an expected value.
    /// Installers must call this immediately before accepting a bundle.
    pub fn verify(&self, expected: &str) -> Result<(), BundleError> {
        let actual = self.digest();
        if actual != expected {
            return Err(BundleError::DigestMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(())
    }

    /// Require that every path lives under the module's prefix.
    pub fn ensure_prefix(&self, module: &ModuleId) -> Result<(), BundleError> {
        let prefix = module.bundle_prefix();
        for path in self.files.keys() {
            if !path.starts_with(&prefix) {
                return Err(BundleError::PrefixViolation {
                    path: path.clone(),
                    prefix,
                });
            }
        }
        Ok(())
    }

    /// Added / deleted / changed sets between two bundles.
    #[must_use]
    pub fn diff(a: &ArtifactBundle, b: &ArtifactBundle) -> BundleDiff {
        let mut diff = BundleDiff::default();
        for (path, entry) in &b.files {
            match a.files.get(path) {
                None => diff.added.push(path.clone()),
                Some(prev) if prev.digest != entry.digest => diff.changed.push(path.clone()),
                Some(_) => {}
            }
        }
        for path in a.files.keys() {
            if !b.files.contains_key(path) {
                diff.deleted.push(path.clone());
            }
        }
        diff
    }

    /// A copy with `changed` applied on top and `deleted` removed.
    /// This is how an IMPLEMENT response merges onto the prior attempt.
    pub fn with_changes(
        &self,
        changed: impl IntoIterator<Item = FileEntry>,
        deleted: &[String],
    ) -> Result<ArtifactBundle, BundleError> {
        let mut next = self.clone();
        for entry in changed {
            next.insert(entry);
        }
        for path in deleted {
            next.remove(path);
        }
        Ok(next)
    }
}
