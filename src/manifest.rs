//! Module manifests: declared identity, version, and capabilities.
//!
//! The manifest is persisted alongside the bundle as
//! `modules/<category>/<platform>/manifest.json` and is the input to
//! hard-gate selection: every declared capability's required suite must
//! pass before attestation.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::path_is_safe;
use crate::types::{Capability, ModuleId};

/// `$id` of the manifest schema this crate understands.
pub const MANIFEST_SCHEMA_ID: &str = "modforge/manifest/1.0.0";

/// Errors from manifest parsing and validation.
#[derive(Debug, Error, Diagnostic)]
pub enum ManifestError {
    /// The document is not valid JSON or carries unknown keys.
    #[error("manifest does not conform to schema: {0}")]
    #[diagnostic(
        code(modforge::manifest::schema),
        help("Unknown top-level keys are rejected; check the field list against {MANIFEST_SCHEMA_ID}.")
    )]
    Schema(#[from] serde_json::Error),

    /// `version` is not MAJOR.MINOR.PATCH.
    #[error("manifest version {version:?} is not MAJOR.MINOR.PATCH: {source}")]
    #[diagnostic(code(modforge::manifest::version))]
    Version {
        version: String,
        #[source]
        source: semver::Error,
    },

    /// `module_id` does not equal `category + "/" + platform`.
    #[error("module_id {module_id} does not match category/platform {category}/{platform}")]
    #[diagnostic(code(modforge::manifest::identity_mismatch))]
    IdentityMismatch {
        module_id: String,
        category: String,
        platform: String,
    },

    /// The `$id` names a schema this build does not understand.
    #[error("unsupported manifest schema id {found:?} (expected {MANIFEST_SCHEMA_ID})")]
    #[diagnostic(code(modforge::manifest::unsupported_schema))]
    UnsupportedSchema { found: String },

    /// Entrypoint path is unsafe or empty.
    #[error("manifest entrypoint {entrypoint:?} is not a safe relative path")]
    #[diagnostic(code(modforge::manifest::entrypoint))]
    Entrypoint { entrypoint: String },

    /// No capabilities declared.
    #[error("manifest declares no capabilities")]
    #[diagnostic(code(modforge::manifest::no_capabilities))]
    NoCapabilities,
}

/// Declarative metadata describing a module's identity, version,
/// capabilities, and outputs. Unknown top-level keys are rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(rename = "$id", default = "default_schema_id")]
    pub schema_id: String,
    pub module_id: ModuleId,
    pub version: String,
    pub category: String,
    pub platform: String,
    pub entrypoint: String,
    pub capabilities: Vec<Capability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limits: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

fn default_schema_id() -> String {
    MANIFEST_SCHEMA_ID.to_string()
}

impl Manifest {
    /// Parse from JSON bytes and run full validation.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ManifestError> {
        let manifest: Manifest = serde_json::from_slice(bytes)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Check invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.schema_id != MANIFEST_SCHEMA_ID {
            return Err(ManifestError::UnsupportedSchema {
                found: self.schema_id.clone(),
            });
        }
        semver::Version::parse(&self.version).map_err(|source| ManifestError::Version {
            version: self.version.clone(),
            source,
        })?;
        if self.module_id.category() != self.category || self.module_id.platform() != self.platform
        {
            return Err(ManifestError::IdentityMismatch {
                module_id: self.module_id.to_string(),
                category: self.category.clone(),
                platform: self.platform.clone(),
            });
        }
        if self.entrypoint.is_empty() || !path_is_safe(&self.entrypoint) {
            return Err(ManifestError::Entrypoint {
                entrypoint: self.entrypoint.clone(),
            });
        }
        if self.capabilities.is_empty() {
            return Err(ManifestError::NoCapabilities);
        }
        Ok(())
    }

    /// Minimal manifest for a freshly scaffolded module.
    #[must_use]
    pub fn starter(module_id: &ModuleId, capabilities: Vec<Capability>) -> Self {
        let capabilities = if capabilities.is_empty() {
            vec![Capability::Pagination]
        } else {
            capabilities
        };
        Self {
            schema_id: MANIFEST_SCHEMA_ID.to_string(),
            module_id: module_id.clone(),
            version: "0.1.0".to_string(),
            category: module_id.category().to_string(),
            platform: module_id.platform().to_string(),
            entrypoint: "adapter.py".to_string(),
            capabilities,
            auth: None,
            pagination: None,
            rate_limits: None,
            outputs: None,
            artifacts: None,
            description: None,
            dependencies: Vec::new(),
        }
    }

    /// Whether a capability is declared.
    #[must_use]
    pub fn declares(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_json() -> serde_json::Value {
        serde_json::json!({
            "$id": MANIFEST_SCHEMA_ID,
            "module_id": "weather/openweather",
            "version": "1.2.3",
            "category": "weather",
            "platform": "openweather",
            "entrypoint": "adapter.py",
            "capabilities": ["auth", "pagination"],
        })
    }

    #[test]
    fn parses_valid_manifest() {
        let manifest = Manifest::from_json(valid_json().to_string().as_bytes()).unwrap();
        assert_eq!(manifest.module_id.to_string(), "weather/openweather");
        assert!(manifest.declares(Capability::Auth));
        assert!(!manifest.declares(Capability::Charts));
    }

    #[test]
    fn rejects_unknown_top_level_keys() {
        let mut doc = valid_json();
        doc["shiny"] = serde_json::json!(true);
        assert!(matches!(
            Manifest::from_json(doc.to_string().as_bytes()),
            Err(ManifestError::Schema(_))
        ));
    }

    #[test]
    fn rejects_loose_version() {
        let mut doc = valid_json();
        doc["version"] = serde_json::json!("1.2");
        assert!(matches!(
            Manifest::from_json(doc.to_string().as_bytes()),
            Err(ManifestError::Version { .. })
        ));
    }

    #[test]
    fn rejects_identity_mismatch() {
        let mut doc = valid_json();
        doc["platform"] = serde_json::json!("darksky");
        assert!(matches!(
            Manifest::from_json(doc.to_string().as_bytes()),
            Err(ManifestError::IdentityMismatch { .. })
        ));
    }

    #[test]
    fn starter_is_valid() {
        let id: ModuleId = "weather/openweather".parse().unwrap();
        let manifest = Manifest::starter(&id, vec![Capability::Auth]);
        manifest.validate().unwrap();
    }
}
