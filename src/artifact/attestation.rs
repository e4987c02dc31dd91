//! Attestation records: the installer's trust root.
//!
//! An attestation binds a bundle digest to the validated report that
//! produced it. Records are append-only (`attestations/<job_id>.json`,
//! write-once) and an installer must verify by recomputation — see
//! [`verify_attested`] — before accepting any bundle.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::artifact::bundle::ArtifactBundle;
use crate::types::{JobId, ModuleId};

/// Identifier of the validator build that produced an attestation.
pub const VALIDATOR_BUILD_ID: &str = concat!("modforge-", env!("CARGO_PKG_VERSION"));

/// Errors from attestation persistence and verification.
#[derive(Debug, Error, Diagnostic)]
pub enum AttestationError {
    #[error("attestation I/O failure at {path}: {source}")]
    #[diagnostic(code(modforge::attestation::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Attestations are append-only; a record for this job exists.
    #[error("attestation for job {job_id} already recorded")]
    #[diagnostic(code(modforge::attestation::exists))]
    AlreadyRecorded { job_id: JobId },

    #[error("malformed attestation record: {0}")]
    #[diagnostic(code(modforge::attestation::malformed))]
    Malformed(#[from] serde_json::Error),

    /// The bundle's recomputed digest disagrees with the attestation.
    #[error("bundle digest mismatch: attested {attested}, recomputed {actual}")]
    #[diagnostic(
        code(modforge::attestation::digest_mismatch),
        help("The bundle is not the one that was validated; the installer must reject it.")
    )]
    DigestMismatch { attested: String, actual: String },

    /// The signing hash does not cover the record's own fields.
    #[error("attestation signing hash is inconsistent with its fields")]
    #[diagnostic(code(modforge::attestation::signing_mismatch))]
    SigningMismatch,
}

/// Signing hash over the identity tuple an installer trusts.
#[must_use]
pub fn signing_hash(
    module_id: &ModuleId,
    version: &str,
    bundle_digest: &str,
    validator_build_id: &str,
) -> String {
    let mut hasher = Sha256::new();
    for part in [
        module_id.to_string().as_str(),
        version,
        bundle_digest,
        validator_build_id,
    ] {
        hasher.update(part.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// The record emitted on successful validation, consumed by installers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attestation {
    pub job_id: JobId,
    pub module_id: ModuleId,
    pub version: String,
    pub bundle_digest: String,
    pub report_ref: String,
    pub validator_build_id: String,
    pub signing_hash: String,
    pub created_at: DateTime<Utc>,
}

impl Attestation {
    /// Build a record, computing the signing hash from its fields.
    #[must_use]
    pub fn new(
        job_id: JobId,
        module_id: ModuleId,
        version: impl Into<String>,
        bundle_digest: impl Into<String>,
        report_ref: impl Into<String>,
    ) -> Self {
        let version = version.into();
        let bundle_digest = bundle_digest.into();
        let signing_hash = signing_hash(&module_id, &version, &bundle_digest, VALIDATOR_BUILD_ID);
        Self {
            job_id,
            module_id,
            version,
            bundle_digest,
            report_ref: report_ref.into(),
            validator_build_id: VALIDATOR_BUILD_ID.to_string(),
            signing_hash,
            created_at: Utc::now(),
        }
    }

    /// Recompute the signing hash from the record's own fields.
    pub fn check_signing(&self) -> Result<(), AttestationError> {
        let expected = signing_hash(
            &self.module_id,
            &self.version,
            &self.bundle_digest,
            &self.validator_build_id,
        );
        if expected != self.signing_hash {
            return Err(AttestationError::SigningMismatch);
        }
        Ok(())
    }
}

/// The installer-side guard: recompute the bundle digest and the
/// signing hash, rejecting on any disagreement. This is the only path
/// by which a bundle may be accepted for promotion.
pub fn verify_attested(
    bundle: &ArtifactBundle,
    attestation: &Attestation,
) -> Result<(), AttestationError> {
    attestation.check_signing()?;
    let actual = bundle.digest();
    if actual != attestation.bundle_digest {
        return Err(AttestationError::DigestMismatch {
            attested: attestation.bundle_digest.clone(),
            actual,
        });
    }
    Ok(())
}

/// Append-only filesystem store of attestation records.
#[derive(Debug, Clone)]
pub struct AttestationStore {
    root: PathBuf,
}

impl AttestationStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, AttestationError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("attestations")).map_err(|source| {
            AttestationError::Io {
                path: root.clone(),
                source,
            }
        })?;
        Ok(Self { root })
    }

    fn record_path(&self, job_id: JobId) -> PathBuf {
        self.root
            .join("attestations")
            .join(format!("{job_id}.json"))
    }

    /// Record an attestation; refuses to overwrite an existing record.
    pub fn append(&self, attestation: &Attestation) -> Result<(), AttestationError> {
        let path = self.record_path(attestation.job_id);
        if path.exists() {
            return Err(AttestationError::AlreadyRecorded {
                job_id: attestation.job_id,
            });
        }
        let body = serde_json::to_vec_pretty(attestation)?;
        std::fs::write(&path, body).map_err(|source| AttestationError::Io { path, source })
    }

    /// Load the attestation for a job, if one was recorded.
    pub fn load(&self, job_id: JobId) -> Result<Option<Attestation>, AttestationError> {
        let path = self.record_path(job_id);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(AttestationError::Io { path, source }),
        };
        let attestation: Attestation = serde_json::from_slice(&raw)?;
        Ok(Some(attestation))
    }
}
