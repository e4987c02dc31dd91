//! The generator request/response contract.
//!
//! Every provider response is parsed into [`GenerateResponse`] and then
//! checked against the hard rules: no markdown fences in file content,
//! every path under the job's module prefix, bounded change counts and
//! file sizes. Violations are never retried against the same provider.

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::path_is_safe;
use crate::types::{Capability, CorrelationId, JobId, ModuleId};

/// Purpose lane a request is routed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Codegen,
    Repair,
    Critic,
}

impl Purpose {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Codegen => "codegen",
            Purpose::Repair => "repair",
            Purpose::Critic => "critic",
        }
    }
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational budget a single call may consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetHint {
    pub tokens: u64,
    pub cost_microcents: u64,
    pub wall_ms: u64,
}

impl Default for BudgetHint {
    fn default() -> Self {
        Self {
            tokens: 8_192,
            cost_microcents: 5_000,
            wall_ms: 60_000,
        }
    }
}

/// A framed request handed to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub purpose: Purpose,
    pub prompt: String,
    pub schema_id: String,
    pub budget: BudgetHint,
    pub module_id: ModuleId,
    pub job_id: JobId,
    pub correlation_id: CorrelationId,
}

/// One file the generator wants to write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    pub content: String,
}

/// Capabilities and credential needs the generator declares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDeclaration {
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub credentials: Vec<String>,
}

/// The structured document a generator returns.
///
/// `validation_report` is the generator's self-assessment; it is
/// advisory only and never authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub stage: String,
    pub module: String,
    pub changed_files: Vec<ChangedFile>,
    #[serde(default)]
    pub deleted_files: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub policy: PolicyDeclaration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_report: Option<serde_json::Value>,
}

/// Limits applied when validating a response, taken from the policy
/// profile at call time.
#[derive(Debug, Clone, Copy)]
pub struct ResponseLimits {
    pub max_changed_files: usize,
    pub max_bytes_per_file: usize,
}

impl Default for ResponseLimits {
    fn default() -> Self {
        Self {
            max_changed_files: 10,
            max_bytes_per_file: 100 * 1024,
        }
    }
}

/// Ways a response can violate the generator contract.
#[derive(Debug, Error, Diagnostic)]
pub enum ContractViolation {
    #[error("response body is not valid generator JSON: {0}")]
    #[diagnostic(code(modforge::gateway::contract_parse))]
    Parse(#[from] serde_json::Error),

    #[error("file {path:?} contains a markdown code fence")]
    #[diagnostic(
        code(modforge::gateway::fenced_content),
        help("Generators must return raw file bodies, never fenced blocks.")
    )]
    Fenced { path: String },

    #[error("path {path:?} is outside modules/{module}/")]
    #[diagnostic(code(modforge::gateway::path_outside_module))]
    PathOutsideModule { path: String, module: String },

    #[error("path {path:?} is not a safe relative path")]
    #[diagnostic(code(modforge::gateway::unsafe_path))]
    UnsafePath { path: String },

    #[error("response changes {count} files, limit is {max}")]
    #[diagnostic(code(modforge::gateway::too_many_changes))]
    TooManyChanges { count: usize, max: usize },

    #[error("file {path:?} is {bytes} bytes, limit is {max}")]
    #[diagnostic(code(modforge::gateway::file_too_large))]
    FileTooLarge {
        path: String,
        bytes: usize,
        max: usize,
    },

    #[error("response module {found:?} does not match job module {expected}")]
    #[diagnostic(code(modforge::gateway::module_mismatch))]
    ModuleMismatch { expected: String, found: String },
}

/// Parse a raw provider body into a [`GenerateResponse`]. Truncated or
/// otherwise un-parseable bodies are contract violations — the gateway
/// never reassembles partial responses.
pub fn parse_response(body: &str) -> Result<GenerateResponse, ContractViolation> {
    Ok(serde_json::from_str(body)?)
}

/// Apply every hard rule of the generator contract.
pub fn validate_response(
    response: &GenerateResponse,
    module: &ModuleId,
    limits: &ResponseLimits,
) -> Result<(), ContractViolation> {
    let expected = module.to_string();
    if response.module != expected {
        return Err(ContractViolation::ModuleMismatch {
            expected,
            found: response.module.clone(),
        });
    }

    if response.changed_files.len() > limits.max_changed_files {
        return Err(ContractViolation::TooManyChanges {
            count: response.changed_files.len(),
            max: limits.max_changed_files,
        });
    }

    let prefix = module.bundle_prefix();
    for file in &response.changed_files {
        if !path_is_safe(&file.path) {
            return Err(ContractViolation::UnsafePath {
                path: file.path.clone(),
            });
        }
        if !file.path.starts_with(&prefix) {
            return Err(ContractViolation::PathOutsideModule {
                path: file.path.clone(),
                module: module.to_string(),
            });
        }
        if file.content.contains("```") {
            return Err(ContractViolation::Fenced {
                path: file.path.clone(),
            });
        }
        if file.content.len() > limits.max_bytes_per_file {
            return Err(ContractViolation::FileTooLarge {
                path: file.path.clone(),
                bytes: file.content.len(),
                max: limits.max_bytes_per_file,
            });
        }
    }
    for path in &response.deleted_files {
        if !path_is_safe(path) {
            return Err(ContractViolation::UnsafePath { path: path.clone() });
        }
        if !path.starts_with(&prefix) {
            return Err(ContractViolation::PathOutsideModule {
                path: path.clone(),
                module: module.to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module() -> ModuleId {
        "weather/openweather".parse().unwrap()
    }

    fn response(path: &str, content: &str) -> GenerateResponse {
        GenerateResponse {
            stage: "implement".into(),
            module: "weather/openweather".into(),
            changed_files: vec![ChangedFile {
                path: path.into(),
                content: content.into(),
            }],
            deleted_files: vec![],
            assumptions: vec![],
            rationale: String::new(),
            policy: PolicyDeclaration::default(),
            validation_report: None,
        }
    }

    #[test]
    fn accepts_conforming_response() {
        let resp = response("modules/weather/openweather/adapter.py", "x = 1\n");
        validate_response(&resp, &module(), &ResponseLimits::default()).unwrap();
    }

    #[test]
    fn rejects_markdown_fence() {
        let resp = response(
            "modules/weather/openweather/adapter.py",
            "```python\nx = 1\n```",
        );
        assert!(matches!(
            validate_response(&resp, &module(), &ResponseLimits::default()),
            Err(ContractViolation::Fenced { .. })
        ));
    }

    #[test]
    fn rejects_path_outside_module() {
        let resp = response("modules/weather/darksky/adapter.py", "x = 1");
        assert!(matches!(
            validate_response(&resp, &module(), &ResponseLimits::default()),
            Err(ContractViolation::PathOutsideModule { .. })
        ));
    }

    #[test]
    fn rejects_traversal() {
        let resp = response("modules/weather/openweather/../../etc/passwd", "x");
        assert!(matches!(
            validate_response(&resp, &module(), &ResponseLimits::default()),
            Err(ContractViolation::UnsafePath { .. })
        ));
    }

    #[test]
    fn rejects_change_count_over_limit() {
        let mut resp = response("modules/weather/openweather/a.py", "x");
        for i in 0..10 {
            resp.changed_files.push(ChangedFile {
                path: format!("modules/weather/openweather/f{i}.py"),
                content: "x".into(),
            });
        }
        assert!(matches!(
            validate_response(&resp, &module(), &ResponseLimits::default()),
            Err(ContractViolation::TooManyChanges { count: 11, max: 10 })
        ));
    }

    #[test]
    fn rejects_oversized_file() {
        let resp = response(
            "modules/weather/openweather/a.py",
            &"x".repeat(100 * 1024 + 1),
        );
        assert!(matches!(
            validate_response(&resp, &module(), &ResponseLimits::default()),
            Err(ContractViolation::FileTooLarge { .. })
        ));
    }

    #[test]
    fn rejects_module_mismatch() {
        let mut resp = response("modules/weather/openweather/a.py", "x");
        resp.module = "finance/stripe".into();
        assert!(matches!(
            validate_response(&resp, &module(), &ResponseLimits::default()),
            Err(ContractViolation::ModuleMismatch { .. })
        ));
    }

    #[test]
    fn truncated_body_is_parse_violation() {
        assert!(matches!(
            parse_response(r#"{"stage": "implement", "module": "w/o", "changed"#),
            Err(ContractViolation::Parse(_))
        ));
    }
}
