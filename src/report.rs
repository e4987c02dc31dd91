//! Validation findings: the structured currency every checker speaks.
//!
//! The static analyzer, the sandbox runner, and the gateway's contract
//! layer all report problems as [`Finding`] values collected into a
//! [`ValidationReport`]. The orchestrator classifies reports, feeds fix
//! hints into repair prompts, and computes [`FailureFingerprint`]s to
//! detect non-progressing repair loops.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::Capability;

/// Severity of a single finding. `Ord` is derived so gate checks read
/// naturally (`severity >= Severity::Error`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
            Self::Fatal => write!(f, "fatal"),
        }
    }
}

/// Closed taxonomy of finding kinds.
///
/// The declaration order doubles as the stable tie-break order used
/// when findings share a path and line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingKind {
    ImportPolicy,
    Syntax,
    ContractMissingMethod,
    ContractBadDecorator,
    TestFailure,
    Auth,
    RateLimit,
    SchemaMismatch,
    Runtime,
    Timeout,
    PolicyViolation,
    ResourceExhausted,
}

impl FindingKind {
    pub const ALL: [FindingKind; 12] = [
        FindingKind::ImportPolicy,
        FindingKind::Syntax,
        FindingKind::ContractMissingMethod,
        FindingKind::ContractBadDecorator,
        FindingKind::TestFailure,
        FindingKind::Auth,
        FindingKind::RateLimit,
        FindingKind::SchemaMismatch,
        FindingKind::Runtime,
        FindingKind::Timeout,
        FindingKind::PolicyViolation,
        FindingKind::ResourceExhausted,
    ];

    /// Canonical wire name (`IMPORT_POLICY`, ...).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::ImportPolicy => "IMPORT_POLICY",
            FindingKind::Syntax => "SYNTAX",
            FindingKind::ContractMissingMethod => "CONTRACT_MISSING_METHOD",
            FindingKind::ContractBadDecorator => "CONTRACT_BAD_DECORATOR",
            FindingKind::TestFailure => "TEST_FAILURE",
            FindingKind::Auth => "AUTH",
            FindingKind::RateLimit => "RATE_LIMIT",
            FindingKind::SchemaMismatch => "SCHEMA_MISMATCH",
            FindingKind::Runtime => "RUNTIME",
            FindingKind::Timeout => "TIMEOUT",
            FindingKind::PolicyViolation => "POLICY_VIOLATION",
            FindingKind::ResourceExhausted => "RESOURCE_EXHAUSTED",
        }
    }

    /// Position in the declaration order, for stable sorting.
    #[must_use]
    pub fn order(&self) -> usize {
        Self::ALL.iter().position(|k| k == self).unwrap_or(usize::MAX)
    }

    /// The severity this kind carries unless a caller overrides it.
    /// Policy violations are fatal; everything else is an error.
    #[must_use]
    pub fn default_severity(&self) -> Severity {
        match self {
            FindingKind::PolicyViolation => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    /// Whether this kind ends the job without entering repair.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, FindingKind::PolicyViolation)
    }
}

impl std::fmt::Display for FindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line/column position within a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl SourceLocation {
    #[must_use]
    pub fn line(line: u32) -> Self {
        Self { line, column: None }
    }

    #[must_use]
    pub fn at(line: u32, column: u32) -> Self {
        Self {
            line,
            column: Some(column),
        }
    }
}

/// Structured guidance injected into the next repair prompt.
///
/// `signature` is a stable slug (it participates in failure
/// fingerprints); `summary` is the human text the prompt carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FixHint {
    pub signature: String,
    pub summary: String,
}

impl FixHint {
    #[must_use]
    pub fn new(signature: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            summary: summary.into(),
        }
    }
}

/// One validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<FixHint>,
}

impl Finding {
    /// Construct with the kind's default severity.
    #[must_use]
    pub fn new(kind: FindingKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.default_severity(),
            message: message.into(),
            path: None,
            location: None,
            hint: None,
        }
    }

    /// Construct an advisory (warn-level) finding.
    #[must_use]
    pub fn warning(kind: FindingKind, message: impl Into<String>) -> Self {
        let mut finding = Self::new(kind, message);
        finding.severity = Severity::Warn;
        finding
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    #[must_use]
    pub fn with_hint(mut self, hint: FixHint) -> Self {
        self.hint = Some(hint);
        self
    }

    /// Whether this finding closes the validation gate.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.severity >= Severity::Error
    }

    fn sort_key(&self) -> (&str, u32, usize) {
        (
            self.path.as_deref().unwrap_or(""),
            self.location.map(|l| l.line).unwrap_or(0),
            self.kind.order(),
        )
    }

    fn dedup_key(&self) -> (FindingKind, Option<&str>, Option<u32>, &str) {
        (
            self.kind,
            self.path.as_deref(),
            self.location.map(|l| l.line),
            &self.message,
        )
    }
}

/// Outcome of one test suite run inside the sandbox.
///
/// `required` marks hard-gate suites: the bundle can only attest when
/// every required suite passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteOutcome {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability: Option<Capability>,
    pub required: bool,
    pub passed: bool,
}

/// Union of findings plus suite outcomes for one validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ValidationReport {
    pub findings: Vec<Finding>,
    pub suites: Vec<SuiteOutcome>,
}

impl ValidationReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, finding: Finding) {
        self.findings.push(finding);
    }

    pub fn push_suite(&mut self, suite: SuiteOutcome) {
        self.suites.push(suite);
    }

    /// Stable-sort findings by (path, line, kind).
    pub fn sort(&mut self) {
        self.findings.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    }

    /// Merge static findings (first) with runtime findings, dropping
    /// duplicates by (kind, path, location, message). Suite outcomes
    /// are appended; suites only come from the runtime side.
    #[must_use]
    pub fn merged(static_report: ValidationReport, runtime_report: ValidationReport) -> Self {
        let mut merged = ValidationReport::new();
        let mut seen: Vec<(FindingKind, Option<String>, Option<u32>, String)> = Vec::new();
        for finding in static_report
            .findings
            .into_iter()
            .chain(runtime_report.findings)
        {
            let key = {
                let (kind, path, line, message) = finding.dedup_key();
                (kind, path.map(str::to_owned), line, message.to_owned())
            };
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            merged.findings.push(finding);
        }
        merged.suites = static_report
            .suites
            .into_iter()
            .chain(runtime_report.suites)
            .collect();
        merged
    }

    /// Whether any finding blocks validation.
    #[must_use]
    pub fn has_blocking(&self) -> bool {
        self.findings.iter().any(Finding::is_blocking)
    }

    /// Whether any terminal-kind finding is present.
    #[must_use]
    pub fn has_terminal(&self) -> bool {
        self.findings
            .iter()
            .any(|f| f.kind.is_terminal() && f.is_blocking())
    }

    /// A report validates iff it has no error/fatal findings and every
    /// hard-gate suite passed. Warnings are recorded but do not close
    /// the gate.
    #[must_use]
    pub fn is_validated(&self) -> bool {
        !self.has_blocking() && self.suites.iter().all(|s| !s.required || s.passed)
    }

    /// Blocking findings of a specific kind.
    #[must_use]
    pub fn blocking_of(&self, kind: FindingKind) -> Vec<&Finding> {
        self.findings
            .iter()
            .filter(|f| f.kind == kind && f.is_blocking())
            .collect()
    }

    /// Names of suites that ran and failed.
    #[must_use]
    pub fn failing_suites(&self) -> Vec<&str> {
        self.suites
            .iter()
            .filter(|s| !s.passed)
            .map(|s| s.name.as_str())
            .collect()
    }
}

/// Stable digest of the ways an attempt failed.
///
/// Two consecutive attempts with equal fingerprints mean the repair
/// loop is not progressing and the job stops with `thrash_detected`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FailureFingerprint(String);

impl FailureFingerprint {
    /// Digest over (sorted blocking kinds, sorted failing test ids,
    /// sorted fix-hint signatures).
    #[must_use]
    pub fn compute(report: &ValidationReport) -> Self {
        let mut kinds: Vec<&str> = report
            .findings
            .iter()
            .filter(|f| f.is_blocking())
            .map(|f| f.kind.as_str())
            .collect();
        kinds.sort_unstable();
        kinds.dedup();

        let mut tests: Vec<&str> = report.failing_suites();
        tests.sort_unstable();
        tests.dedup();

        let mut hints: Vec<&str> = report
            .findings
            .iter()
            .filter(|f| f.is_blocking())
            .filter_map(|f| f.hint.as_ref().map(|h| h.signature.as_str()))
            .collect();
        hints.sort_unstable();
        hints.dedup();

        let mut hasher = Sha256::new();
        for section in [&kinds, &tests, &hints] {
            for item in section.iter() {
                hasher.update(item.as_bytes());
                hasher.update([0u8]);
            }
            hasher.update([0xff]);
        }
        Self(hex::encode(hasher.finalize()))
    }

    #[must_use]
    pub fn as_hex(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: FindingKind, path: &str, line: u32) -> Finding {
        Finding::new(kind, format!("{kind} at {path}:{line}"))
            .with_path(path)
            .with_location(SourceLocation::line(line))
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Warn < Severity::Error);
        assert!(Severity::Error < Severity::Fatal);
    }

    #[test]
    fn sort_is_stable_by_path_line_kind() {
        let mut report = ValidationReport::new();
        report.push(sample(FindingKind::TestFailure, "b.py", 3));
        report.push(sample(FindingKind::Syntax, "a.py", 9));
        report.push(sample(FindingKind::ImportPolicy, "a.py", 9));
        report.sort();
        let kinds: Vec<FindingKind> = report.findings.iter().map(|f| f.kind).collect();
        assert_eq!(
            kinds,
            vec![
                FindingKind::ImportPolicy,
                FindingKind::Syntax,
                FindingKind::TestFailure
            ]
        );
    }

    #[test]
    fn merged_dedups_and_keeps_static_first() {
        let mut stat = ValidationReport::new();
        stat.push(sample(FindingKind::ImportPolicy, "adapter.py", 1));
        let mut runtime = ValidationReport::new();
        runtime.push(sample(FindingKind::ImportPolicy, "adapter.py", 1));
        runtime.push(sample(FindingKind::TestFailure, "test_adapter.py", 12));

        let merged = ValidationReport::merged(stat, runtime);
        assert_eq!(merged.findings.len(), 2);
        assert_eq!(merged.findings[0].kind, FindingKind::ImportPolicy);
    }

    #[test]
    fn validation_gate_requires_suites() {
        let mut report = ValidationReport::new();
        report.push_suite(SuiteOutcome {
            name: "capability:auth".into(),
            capability: Some(Capability::Auth),
            required: true,
            passed: false,
        });
        assert!(!report.is_validated());
        report.suites[0].passed = true;
        assert!(report.is_validated());
    }

    #[test]
    fn warnings_do_not_close_gate() {
        let mut report = ValidationReport::new();
        report.push(Finding::warning(FindingKind::RateLimit, "burst near cap"));
        assert!(report.is_validated());
    }

    #[test]
    fn fingerprint_ignores_finding_order() {
        let mut a = ValidationReport::new();
        a.push(sample(FindingKind::Syntax, "x.py", 1));
        a.push(sample(FindingKind::TestFailure, "t.py", 2));
        let mut b = ValidationReport::new();
        b.push(sample(FindingKind::TestFailure, "t.py", 2));
        b.push(sample(FindingKind::Syntax, "x.py", 1));
        assert_eq!(
            FailureFingerprint::compute(&a),
            FailureFingerprint::compute(&b)
        );
    }

    #[test]
    fn fingerprint_distinguishes_kinds() {
        let mut a = ValidationReport::new();
        a.push(sample(FindingKind::Syntax, "x.py", 1));
        let mut b = ValidationReport::new();
        b.push(sample(FindingKind::Runtime, "x.py", 1));
        assert_ne!(
            FailureFingerprint::compute(&a),
            FailureFingerprint::compute(&b)
        );
    }

    #[test]
    fn wire_names_match_taxonomy() {
        assert_eq!(
            serde_json::to_string(&FindingKind::ContractMissingMethod).unwrap(),
            r#""CONTRACT_MISSING_METHOD""#
        );
    }
}
