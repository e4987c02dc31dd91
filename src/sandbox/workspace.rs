//! Ephemeral per-attempt workspaces.
//!
//! Each sandbox run materializes the candidate bundle into a fresh
//! temporary directory. The directory is removed on every exit path —
//! success, failure, panic, cancellation — via the `TempDir` guard.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use tempfile::TempDir;
use thiserror::Error;

use crate::artifact::bundle::ArtifactBundle;

/// Errors while provisioning a workspace.
#[derive(Debug, Error, Diagnostic)]
pub enum WorkspaceError {
    #[error("failed to create sandbox workspace: {0}")]
    #[diagnostic(code(modforge::sandbox::workspace_create))]
    Create(#[source] std::io::Error),

    #[error("failed to materialize {path:?} into workspace: {source}")]
    #[diagnostic(code(modforge::sandbox::materialize))]
    Materialize {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// RAII workspace: owns a temp directory for exactly one sandbox run.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    /// Create an empty workspace.
    pub fn create() -> Result<Self, WorkspaceError> {
        let dir = TempDir::with_prefix("modforge-sbx-").map_err(WorkspaceError::Create)?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Write every bundle file under the workspace root, preserving the
    /// bundle-relative layout.
    pub fn materialize(&self, bundle: &ArtifactBundle) -> Result<(), WorkspaceError> {
        for entry in bundle.iter() {
            let target = self.dir.path().join(entry.path());
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|source| {
                    WorkspaceError::Materialize {
                        path: entry.path().to_string(),
                        source,
                    }
                })?;
            }
            std::fs::write(&target, entry.bytes()).map_err(|source| {
                WorkspaceError::Materialize {
                    path: entry.path().to_string(),
                    source,
                }
            })?;
        }
        Ok(())
    }

    /// Write a harness file (driver script) at the workspace root,
    /// outside the module tree.
    pub fn write_harness(&self, name: &str, content: &str) -> Result<PathBuf, WorkspaceError> {
        let target = self.dir.path().join(name);
        std::fs::write(&target, content).map_err(|source| WorkspaceError::Materialize {
            path: name.to_string(),
            source,
        })?;
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::bundle::FileEntry;

    #[test]
    fn materializes_and_cleans_up() {
        let bundle = ArtifactBundle::from_entries([
            FileEntry::new("modules/w/o/adapter.py", b"x = 1".to_vec()).unwrap(),
        ])
        .unwrap();

        let root;
        {
            let workspace = Workspace::create().unwrap();
            workspace.materialize(&bundle).unwrap();
            root = workspace.root().to_path_buf();
            assert!(root.join("modules/w/o/adapter.py").exists());
        }
        assert!(!root.exists(), "workspace must be destroyed on drop");
    }
}
