//! Core identity types for the modforge build system.
//!
//! This module defines the vocabulary used everywhere else: module
//! identities, capability declarations, and the ids and terminal states
//! a build job carries end-to-end.
//!
//! # Key Types
//!
//! - [`ModuleId`]: the `(category, platform)` identity of a module
//! - [`Capability`]: closed set of declarable module features
//! - [`JobId`], [`AttemptId`], [`CorrelationId`]: opaque run identifiers
//! - [`BuildStatus`] / [`FailureReason`]: terminal outcomes of a job
//!
//! # Examples
//!
//! ```rust
//! use modforge::types::ModuleId;
//!
//! let id: ModuleId = "weather/openweather".parse().unwrap();
//! assert_eq!(id.category(), "weather");
//! assert_eq!(id.platform(), "openweather");
//! assert_eq!(id.to_string(), "weather/openweather");
//! assert_eq!(id.bundle_prefix(), "modules/weather/openweather/");
//! ```

use std::fmt;
use std::str::FromStr;

use miette::Diagnostic;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

/// Error raised when a module identity does not satisfy the slug rules.
#[derive(Debug, Error, Diagnostic, Clone, PartialEq, Eq)]
pub enum ModuleIdError {
    /// One of the two segments is not a lowercase slug.
    #[error("invalid slug {value:?} in module id")]
    #[diagnostic(
        code(modforge::types::invalid_slug),
        help("Slugs must match [a-z0-9_]+ (lowercase, no separators).")
    )]
    InvalidSlug { value: String },

    /// The canonical form did not contain exactly one `/`.
    #[error("module id {value:?} is not in category/platform form")]
    #[diagnostic(code(modforge::types::malformed_module_id))]
    Malformed { value: String },
}

fn is_slug(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

/// Identity of a data-integration module: `(category, platform)`.
///
/// Both segments are lowercase slugs (`[a-z0-9_]+`). The canonical
/// rendering is `category/platform` and is used as identity everywhere:
/// manifests, bundle path prefixes, generator responses, attestations.
///
/// `ModuleId` is immutable; construction validates both segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId {
    category: String,
    platform: String,
}

impl ModuleId {
    /// Build a module id from its two segments.
    pub fn new(
        category: impl Into<String>,
        platform: impl Into<String>,
    ) -> Result<Self, ModuleIdError> {
        let category = category.into();
        let platform = platform.into();
        for segment in [&category, &platform] {
            if !is_slug(segment) {
                return Err(ModuleIdError::InvalidSlug {
                    value: segment.clone(),
                });
            }
        }
        Ok(Self { category, platform })
    }

    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    #[must_use]
    pub fn platform(&self) -> &str {
        &self.platform
    }

    /// The directory prefix every file of this module must live under.
    #[must_use]
    pub fn bundle_prefix(&self) -> String {
        format!("modules/{}/{}/", self.category, self.platform)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.platform)
    }
}

impl FromStr for ModuleId {
    type Err = ModuleIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(2, '/');
        match (parts.next(), parts.next()) {
            (Some(category), Some(platform)) if !platform.contains('/') => {
                ModuleId::new(category, platform)
            }
            _ => Err(ModuleIdError::Malformed {
                value: s.to_string(),
            }),
        }
    }
}

// Serialized as the canonical "category/platform" string so manifests
// and wire records stay human-readable.
impl Serialize for ModuleId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ModuleId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Declared feature of a module, from a closed set.
///
/// Capabilities gate validation suites: a bundle only attests when the
/// required suite of every declared capability passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Auth,
    Pagination,
    RateLimits,
    Charts,
    Credentials,
}

impl Capability {
    /// All members of the closed set, in canonical order.
    pub const ALL: [Capability; 5] = [
        Capability::Auth,
        Capability::Pagination,
        Capability::RateLimits,
        Capability::Charts,
        Capability::Credentials,
    ];

    /// Stable lowercase name, matching the serialized form.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Auth => "auth",
            Capability::Pagination => "pagination",
            Capability::RateLimits => "rate_limits",
            Capability::Charts => "charts",
            Capability::Credentials => "credentials",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! uuid_newtype {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Mint a fresh random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

uuid_newtype!(
    /// Identifier of one logical build request.
    JobId,
    "job"
);
uuid_newtype!(
    /// Identifier of one IMPLEMENT+VALIDATE cycle within a job.
    AttemptId,
    "att"
);
uuid_newtype!(
    /// Correlation id threaded through gateway calls and events.
    CorrelationId,
    "cor"
);

/// Why a job ended in `FAILED`.
///
/// These are the user-visible classifications from the error table;
/// everything else stays internal to the repair loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    PolicyViolation,
    BudgetExhausted,
    ProviderAuth,
    ResourceExhausted,
    ThrashDetected,
    RepairAttemptsExhausted,
}

impl FailureReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::PolicyViolation => "policy_violation",
            FailureReason::BudgetExhausted => "budget_exhausted",
            FailureReason::ProviderAuth => "provider_auth",
            FailureReason::ResourceExhausted => "resource_exhausted",
            FailureReason::ThrashDetected => "thrash_detected",
            FailureReason::RepairAttemptsExhausted => "repair_attempts_exhausted",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal state of a build job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BuildStatus {
    /// The merged report validated and an attestation was written.
    Validated { bundle_digest: String },
    /// The job failed with a classified reason.
    Failed {
        reason: FailureReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
    /// The job was cancelled (deadline or external cancel).
    Aborted,
}

impl BuildStatus {
    #[must_use]
    pub fn is_validated(&self) -> bool {
        matches!(self, BuildStatus::Validated { .. })
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, BuildStatus::Failed { .. })
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, BuildStatus::Aborted)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildStatus::Validated { .. } => write!(f, "VALIDATED"),
            BuildStatus::Failed { reason, note } => match note {
                Some(note) => write!(f, "FAILED: {reason} ({note})"),
                None => write!(f, "FAILED: {reason}"),
            },
            BuildStatus::Aborted => write!(f, "ABORTED: cancelled"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_id_round_trips() {
        let id = ModuleId::new("weather", "openweather").unwrap();
        assert_eq!(id.to_string(), "weather/openweather");
        let parsed: ModuleId = "weather/openweather".parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn module_id_rejects_bad_slugs() {
        assert!(ModuleId::new("Weather", "openweather").is_err());
        assert!(ModuleId::new("weather", "open-weather").is_err());
        assert!(ModuleId::new("", "x").is_err());
        assert!("weather".parse::<ModuleId>().is_err());
        assert!("a/b/c".parse::<ModuleId>().is_err());
    }

    #[test]
    fn module_id_serde_is_canonical_string() {
        let id: ModuleId = "finance/stripe".parse().unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#""finance/stripe""#);
        let back: ModuleId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn capability_serde_names() {
        let json = serde_json::to_string(&Capability::RateLimits).unwrap();
        assert_eq!(json, r#""rate_limits""#);
        let parsed: Capability = serde_json::from_str(r#""charts""#).unwrap();
        assert_eq!(parsed, Capability::Charts);
    }

    #[test]
    fn status_display_matches_contract() {
        let failed = BuildStatus::Failed {
            reason: FailureReason::ThrashDetected,
            note: None,
        };
        assert_eq!(failed.to_string(), "FAILED: thrash_detected");
        assert_eq!(BuildStatus::Aborted.to_string(), "ABORTED: cancelled");
    }
}
