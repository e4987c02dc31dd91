//! Explicit adapter registry.
//!
//! Installed modules are registered here by the installer (or by a
//! startup scan of the installed-modules directory), keyed by module
//! id. Nothing registers itself at import time; the registry is the
//! only discovery path and is read-only from the builder's side.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::artifact::bundle::{ArtifactBundle, FileEntry};
use crate::manifest::Manifest;
use crate::types::ModuleId;

/// Errors while scanning an installed-modules tree.
#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    #[error("registry scan I/O failure at {path}: {source}")]
    #[diagnostic(code(modforge::registry::io))]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("installed module at {path} has an invalid manifest: {source}")]
    #[diagnostic(code(modforge::registry::manifest))]
    Manifest {
        path: PathBuf,
        #[source]
        source: crate::manifest::ManifestError,
    },
}

/// One installed module.
#[derive(Debug, Clone)]
pub struct RegisteredModule {
    pub module_id: ModuleId,
    pub manifest: Manifest,
    pub bundle_digest: String,
    pub root: PathBuf,
}

/// Module-id-keyed registry, populated explicitly.
#[derive(Debug, Default)]
pub struct AdapterRegistry {
    entries: FxHashMap<ModuleId, RegisteredModule>,
}

impl AdapterRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an installed module. Called by the
    /// installer after its digest verification passed.
    pub fn register(&mut self, module: RegisteredModule) {
        self.entries.insert(module.module_id.clone(), module);
    }

    #[must_use]
    pub fn get(&self, module_id: &ModuleId) -> Option<&RegisteredModule> {
        self.entries.get(module_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Populate by scanning `<root>/modules/<category>/<platform>/`
    /// directories; each must carry a valid manifest. Returns how many
    /// modules were registered.
    pub fn scan_dir(&mut self, root: impl AsRef<Path>) -> Result<usize, RegistryError> {
        let root = root.as_ref();
        let modules_dir = root.join("modules");
        if !modules_dir.exists() {
            return Ok(0);
        }
        let mut registered = 0;
        for category in sorted_dirs(&modules_dir)? {
            for platform in sorted_dirs(&category)? {
                let manifest_path = platform.join("manifest.json");
                if !manifest_path.exists() {
                    continue;
                }
                let raw = std::fs::read(&manifest_path).map_err(|source| RegistryError::Io {
                    path: manifest_path.clone(),
                    source,
                })?;
                let manifest =
                    Manifest::from_json(&raw).map_err(|source| RegistryError::Manifest {
                        path: manifest_path.clone(),
                        source,
                    })?;
                let bundle = bundle_from_dir(root, &manifest.module_id)?;
                self.register(RegisteredModule {
                    module_id: manifest.module_id.clone(),
                    bundle_digest: bundle.digest(),
                    root: platform.clone(),
                    manifest,
                });
                registered += 1;
            }
        }
        Ok(registered)
    }
}

fn sorted_dirs(path: &Path) -> Result<Vec<PathBuf>, RegistryError> {
    let entries = std::fs::read_dir(path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn bundle_from_dir(root: &Path, module_id: &ModuleId) -> Result<ArtifactBundle, RegistryError> {
    let dir = root
        .join("modules")
        .join(module_id.category())
        .join(module_id.platform());
    let mut bundle = ArtifactBundle::new();
    let entries = std::fs::read_dir(&dir).map_err(|source| RegistryError::Io {
        path: dir.clone(),
        source,
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    for file in files {
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let bytes = std::fs::read(&file).map_err(|source| RegistryError::Io {
            path: file.clone(),
            source,
        })?;
        if let Ok(entry) = FileEntry::new(format!("{}{name}", module_id.bundle_prefix()), bytes) {
            bundle.insert(entry);
        }
    }
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::MANIFEST_SCHEMA_ID;

    #[test]
    fn scan_registers_valid_modules() {
        let dir = tempfile::tempdir().unwrap();
        let module_dir = dir.path().join("modules/weather/openweather");
        std::fs::create_dir_all(&module_dir).unwrap();
        let manifest = serde_json::json!({
            "$id": MANIFEST_SCHEMA_ID,
            "module_id": "weather/openweather",
            "version": "0.1.0",
            "category": "weather",
            "platform": "openweather",
            "entrypoint": "adapter.py",
            "capabilities": ["pagination"],
        });
        std::fs::write(
            module_dir.join("manifest.json"),
            manifest.to_string(),
        )
        .unwrap();
        std::fs::write(module_dir.join("adapter.py"), "x = 1\n").unwrap();

        let mut registry = AdapterRegistry::new();
        assert_eq!(registry.scan_dir(dir.path()).unwrap(), 1);
        let module: ModuleId = "weather/openweather".parse().unwrap();
        let entry = registry.get(&module).unwrap();
        assert_eq!(entry.manifest.version, "0.1.0");
        assert!(!entry.bundle_digest.is_empty());
    }

    #[test]
    fn empty_tree_registers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = AdapterRegistry::new();
        assert_eq!(registry.scan_dir(dir.path()).unwrap(), 0);
        assert!(registry.is_empty());
    }
}
