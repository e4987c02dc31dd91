//! Content-addressed artifact bundles and their persistence.
//!
//! An [`ArtifactBundle`](bundle::ArtifactBundle) is a deterministic
//! mapping from relative path to file content; its digest is the
//! supply-chain identity everything downstream trusts. The
//! [`ArtifactStore`](store::ArtifactStore) persists one immutable
//! directory per attempt, and [`attestation`] holds the append-only
//! trust records an installer verifies by recomputation.

pub mod attestation;
pub mod bundle;
pub mod store;

pub use attestation::{Attestation, AttestationError, AttestationStore, verify_attested};
pub use bundle::{ArtifactBundle, BundleDiff, BundleError, FileEntry, file_digest};
pub use store::{ArtifactIndex, ArtifactStore, IndexEntry, StoreError};
