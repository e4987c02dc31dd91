//! Sandboxed dynamic validation of candidate bundles.
//!
//! The runner contract is `run(bundle, profile, mode) → ValidationReport`
//! through the state machine
//!
//! ```text
//! IDLE → ACQUIRING → PREPARED → EXECUTING → COLLECTING → RELEASED
//!                      └────────────┴──────────→ ABORTED
//! ```
//!
//! The ephemeral workspace is destroyed on every exit path. Before
//! execution the static import check runs a second time with the
//! runtime profile (defense in depth); during execution a dynamic
//! import hook inside the driver denies anything outside the profile's
//! allowlist, catching dynamic-import bypasses.

pub mod charts;
pub mod exec;
pub mod harness;
pub mod workspace;

use async_trait::async_trait;
use miette::Diagnostic;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::analyzer::StaticAnalyzer;
use crate::artifact::bundle::ArtifactBundle;
use crate::manifest::Manifest;
use crate::policy::{NetworkMode, PolicyProfile};
use crate::report::{Finding, FindingKind, FixHint, SuiteOutcome, ValidationReport};
use crate::types::Capability;

pub use exec::{ExecError, ExecOutcome, RawSandboxReport};
pub use workspace::{Workspace, WorkspaceError};

/// Lifecycle states of one sandbox run, reported through tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    Idle,
    Acquiring,
    Prepared,
    Executing,
    Collecting,
    Released,
    Aborted,
}

/// Hard failures that prevent producing a report at all. Everything a
/// repair loop can act on becomes a finding instead.
#[derive(Debug, Error, Diagnostic)]
pub enum SandboxError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Exec(#[from] ExecError),

    #[error("sandbox run cancelled")]
    #[diagnostic(code(modforge::sandbox::cancelled))]
    Cancelled,
}

/// The validation runner contract consumed by the orchestrator.
#[async_trait]
pub trait SandboxRunner: Send + Sync {
    async fn run(
        &self,
        bundle: &ArtifactBundle,
        profile: &PolicyProfile,
        mode: &NetworkMode,
        cancel: &CancellationToken,
    ) -> Result<ValidationReport, SandboxError>;
}

/// Subprocess-backed runner hosting generated code in a Python
/// interpreter under rlimits.
pub struct ProcessSandbox {
    python_bin: String,
}

impl Default for ProcessSandbox {
    fn default() -> Self {
        Self {
            python_bin: "python3".to_string(),
        }
    }
}

impl ProcessSandbox {
    #[must_use]
    pub fn new(python_bin: impl Into<String>) -> Self {
        Self {
            python_bin: python_bin.into(),
        }
    }

    fn transition(state: RunnerState) {
        debug!(state = ?state, "sandbox state");
    }
}

#[async_trait]
impl SandboxRunner for ProcessSandbox {
    #[instrument(skip_all, err)]
    async fn run(
        &self,
        bundle: &ArtifactBundle,
        profile: &PolicyProfile,
        mode: &NetworkMode,
        cancel: &CancellationToken,
    ) -> Result<ValidationReport, SandboxError> {
        Self::transition(RunnerState::Idle);
        let mut report = ValidationReport::new();

        let manifest = bundle
            .iter()
            .find(|e| e.path().ends_with("/manifest.json"))
            .and_then(|e| Manifest::from_json(e.bytes()).ok());
        let Some(manifest) = manifest else {
            report.push(
                Finding::new(
                    FindingKind::SchemaMismatch,
                    "bundle carries no parseable manifest.json",
                )
                .with_hint(FixHint::new(
                    "manifest:schema",
                    "Emit a manifest.json conforming to the manifest schema.",
                )),
            );
            Self::transition(RunnerState::Aborted);
            return Ok(report);
        };

        // Defense in depth: repeat the static import check with the
        // runtime profile before anything is executed.
        let static_pass = StaticAnalyzer::new(profile).analyze(bundle);
        if static_pass.has_terminal() {
            Self::transition(RunnerState::Aborted);
            return Ok(static_pass);
        }

        Self::transition(RunnerState::Acquiring);
        let workspace = Workspace::create()?;
        workspace.materialize(bundle)?;

        let module_dir = format!(
            "modules/{}/{}",
            manifest.module_id.category(),
            manifest.module_id.platform()
        );
        let prefix = manifest.module_id.bundle_prefix();
        let test_files: Vec<String> = bundle
            .paths()
            .iter()
            .filter_map(|p| p.strip_prefix(prefix.as_str()))
            .filter(|rel| {
                rel.rsplit('/').next().is_some_and(|name| {
                    name.starts_with("test_") && name.ends_with(".py")
                })
            })
            .map(str::to_owned)
            .collect();

        let local_modules: Vec<String> = bundle
            .paths()
            .iter()
            .filter(|p| p.ends_with(".py"))
            .filter_map(|p| p.rsplit('/').next())
            .map(|name| name.trim_end_matches(".py").to_string())
            .collect();
        let driver = harness::render_driver(
            profile,
            mode,
            &module_dir,
            &manifest.entrypoint,
            &test_files,
            &local_modules,
        );
        let driver_path = workspace.write_harness(harness::DRIVER_FILE, &driver)?;
        Self::transition(RunnerState::Prepared);

        Self::transition(RunnerState::Executing);
        let outcome = match exec::run_driver(
            &self.python_bin,
            workspace.root(),
            &driver_path,
            std::time::Duration::from_secs(profile.wall_clock_seconds),
            cancel,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(ExecError::Cancelled) => {
                Self::transition(RunnerState::Aborted);
                return Err(SandboxError::Cancelled);
            }
            Err(err) => {
                Self::transition(RunnerState::Aborted);
                return Err(err.into());
            }
        };

        Self::transition(RunnerState::Collecting);
        collect(&mut report, &manifest, &outcome, &workspace);
        Self::transition(RunnerState::Released);
        Ok(report)
    }
}

/// Fold an execution outcome into findings and suite results.
fn collect(
    report: &mut ValidationReport,
    manifest: &Manifest,
    outcome: &ExecOutcome,
    workspace: &Workspace,
) {
    if outcome.timed_out {
        report.push(Finding::new(
            FindingKind::Timeout,
            format!(
                "sandbox exceeded the wall-clock cap after {:.1}s",
                outcome.elapsed.as_secs_f64()
            ),
        ));
        return;
    }

    if outcome.killed_by_limits() {
        report.push(Finding::new(
            FindingKind::ResourceExhausted,
            "sandbox process was killed by a resource cap",
        ));
        return;
    }

    let Some(raw) = &outcome.report else {
        let tail: String = outcome
            .stderr
            .chars()
            .rev()
            .take(400)
            .collect::<String>()
            .chars()
            .rev()
            .collect();
        report.push(Finding::new(
            FindingKind::Runtime,
            format!("sandbox produced no report (exit {:?}): {tail}", outcome.exit_code),
        ));
        return;
    };

    if let Some(err) = &raw.harness_error {
        let kind = if err.contains("memory cap") {
            FindingKind::ResourceExhausted
        } else {
            FindingKind::Runtime
        };
        report.push(Finding::new(kind, format!("harness failure: {err}")));
    }

    for denied in &raw.denied_imports {
        report.push(
            Finding::new(
                FindingKind::PolicyViolation,
                format!(
                    "dynamic import of `{}` denied by policy (from {})",
                    denied.name, denied.source
                ),
            )
            .with_hint(FixHint::new(
                format!("policy:forbidden_import:{}", denied.name),
                format!("Remove the dynamic `{}` import.", denied.name),
            )),
        );
    }

    if !raw.adapter_loaded && raw.harness_error.is_none() {
        let detail = raw
            .adapter_error
            .clone()
            .unwrap_or_else(|| "adapter class failed to load".to_string());
        report.push(
            Finding::new(FindingKind::Runtime, detail).with_hint(FixHint::new(
                "contract:adapter_load",
                "Ensure the entrypoint defines a registered adapter class that instantiates cleanly.",
            )),
        );
    }

    for test in &raw.tests {
        if !test.passed {
            report.push(
                Finding::new(
                    FindingKind::TestFailure,
                    format!("test {} failed: {}", test.id, test.message),
                )
                .with_hint(FixHint::new(
                    format!("test:{}", test.id),
                    format!("Make test {} pass.", test.id),
                )),
            );
        }
    }

    for capability in &manifest.capabilities {
        if *capability == Capability::Charts {
            let passed = report_charts(raw, workspace, report);
            report.push_suite(chart_suite(passed));
            continue;
        }
        let marker = format!("test_{}", capability.as_str());
        let matching: Vec<_> = raw
            .tests
            .iter()
            .filter(|t| {
                t.id.rsplit('.')
                    .next()
                    .is_some_and(|method| method.starts_with(&marker))
            })
            .collect();
        report.push_suite(SuiteOutcome {
            name: format!("capability:{capability}"),
            capability: Some(*capability),
            required: true,
            passed: !matching.is_empty() && matching.iter().all(|t| t.passed),
        });
    }

    let unit_tests: Vec<_> = raw.tests.iter().collect();
    report.push_suite(SuiteOutcome {
        name: "unit".to_string(),
        capability: None,
        required: true,
        passed: !unit_tests.is_empty() && unit_tests.iter().all(|t| t.passed),
    });
}

/// Validate every declared chart artifact; true when all pass.
fn report_charts(
    raw: &RawSandboxReport,
    workspace: &Workspace,
    report: &mut ValidationReport,
) -> bool {
    if raw.artifacts.is_empty() {
        report.push(Finding::new(
            FindingKind::SchemaMismatch,
            "charts capability declared but no chart artifacts were emitted",
        ));
        return false;
    }
    let mut all_ok = true;
    for artifact in &raw.artifacts {
        let bytes = std::fs::read(workspace.root().join(&artifact.path)).unwrap_or_default();
        let issues = charts::validate_chart(&artifact.mime, &bytes, &artifact.series);
        for issue in issues {
            all_ok = false;
            report.push(
                Finding::new(
                    FindingKind::SchemaMismatch,
                    format!("chart {}: {issue}", artifact.path),
                )
                .with_path(&artifact.path),
            );
        }
    }
    all_ok
}

fn chart_suite(passed: bool) -> SuiteOutcome {
    SuiteOutcome {
        name: "capability:charts".to_string(),
        capability: Some(Capability::Charts),
        required: true,
        passed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::exec::{RawChartArtifact, RawTestOutcome};

    fn manifest(caps: Vec<Capability>) -> Manifest {
        Manifest::starter(&"weather/openweather".parse().unwrap(), caps)
    }

    fn outcome(raw: RawSandboxReport) -> ExecOutcome {
        ExecOutcome {
            report: Some(raw),
            stdout: String::new(),
            stderr: String::new(),
            exit_code: Some(0),
            timed_out: false,
            elapsed: std::time::Duration::from_millis(100),
        }
    }

    fn passing_raw() -> RawSandboxReport {
        RawSandboxReport {
            tests: vec![RawTestOutcome {
                id: "modforge_tests_0.TestAdapter.test_pagination_pages".into(),
                passed: true,
                message: String::new(),
            }],
            adapter_loaded: true,
            ..Default::default()
        }
    }

    #[test]
    fn passing_run_validates() {
        let workspace = Workspace::create().unwrap();
        let mut report = ValidationReport::new();
        collect(
            &mut report,
            &manifest(vec![Capability::Pagination]),
            &outcome(passing_raw()),
            &workspace,
        );
        assert!(report.is_validated(), "{report:?}");
    }

    #[test]
    fn failed_test_closes_gate_with_hint() {
        let mut raw = passing_raw();
        raw.tests[0].passed = false;
        raw.tests[0].message = "assertion failed".into();
        let workspace = Workspace::create().unwrap();
        let mut report = ValidationReport::new();
        collect(
            &mut report,
            &manifest(vec![Capability::Pagination]),
            &outcome(raw),
            &workspace,
        );
        assert!(!report.is_validated());
        let failures = report.blocking_of(FindingKind::TestFailure);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].hint.is_some());
        assert!(report.failing_suites().contains(&"capability:pagination"));
    }

    #[test]
    fn undeclared_capability_tests_do_not_gate() {
        let workspace = Workspace::create().unwrap();
        let mut report = ValidationReport::new();
        collect(
            &mut report,
            &manifest(vec![Capability::Pagination]),
            &outcome(passing_raw()),
            &workspace,
        );
        assert!(report.suites.iter().all(|s| s.name != "capability:auth"));
    }

    #[test]
    fn missing_capability_coverage_fails_suite() {
        let workspace = Workspace::create().unwrap();
        let mut report = ValidationReport::new();
        collect(
            &mut report,
            &manifest(vec![Capability::Auth]),
            &outcome(passing_raw()),
            &workspace,
        );
        assert!(!report.is_validated());
        assert!(report.failing_suites().contains(&"capability:auth"));
    }

    #[test]
    fn timeout_becomes_timeout_finding() {
        let workspace = Workspace::create().unwrap();
        let mut report = ValidationReport::new();
        collect(
            &mut report,
            &manifest(vec![Capability::Pagination]),
            &ExecOutcome {
                report: None,
                stdout: String::new(),
                stderr: String::new(),
                exit_code: None,
                timed_out: true,
                elapsed: std::time::Duration::from_secs(61),
            },
            &workspace,
        );
        assert_eq!(report.findings[0].kind, FindingKind::Timeout);
    }

    #[test]
    fn signal_kill_is_resource_exhausted() {
        let workspace = Workspace::create().unwrap();
        let mut report = ValidationReport::new();
        collect(
            &mut report,
            &manifest(vec![Capability::Pagination]),
            &ExecOutcome {
                report: None,
                stdout: String::new(),
                stderr: String::new(),
                exit_code: None,
                timed_out: false,
                elapsed: std::time::Duration::from_secs(2),
            },
            &workspace,
        );
        assert_eq!(report.findings[0].kind, FindingKind::ResourceExhausted);
    }

    #[test]
    fn denied_dynamic_import_is_policy_violation() {
        let mut raw = passing_raw();
        raw.denied_imports.push(exec::RawDeniedImport {
            name: "socket".into(),
            source: "adapter.py".into(),
        });
        let workspace = Workspace::create().unwrap();
        let mut report = ValidationReport::new();
        collect(
            &mut report,
            &manifest(vec![Capability::Pagination]),
            &outcome(raw),
            &workspace,
        );
        assert!(report.has_terminal());
    }

    #[test]
    fn charts_capability_requires_artifacts() {
        let workspace = Workspace::create().unwrap();
        let mut report = ValidationReport::new();
        let mut raw = passing_raw();
        raw.artifacts = vec![];
        collect(
            &mut report,
            &manifest(vec![Capability::Pagination, Capability::Charts]),
            &outcome(raw),
            &workspace,
        );
        assert!(!report.is_validated());
        assert!(report.failing_suites().contains(&"capability:charts"));
    }

    #[test]
    fn chart_artifact_validated_from_workspace_bytes() {
        let workspace = Workspace::create().unwrap();
        std::fs::create_dir_all(workspace.root().join("modules/weather/openweather")).unwrap();
        // JPEG bytes declared as PNG: signature mismatch.
        std::fs::write(
            workspace.root().join("modules/weather/openweather/chart.png"),
            [0xff, 0xd8, 0xff, 0xe0, 0, 0, 0, 0, 0, 0],
        )
        .unwrap();
        let mut raw = passing_raw();
        raw.artifacts = vec![RawChartArtifact {
            path: "modules/weather/openweather/chart.png".into(),
            mime: "image/png".into(),
            series: vec!["temp".into()],
        }];
        let mut report = ValidationReport::new();
        collect(
            &mut report,
            &manifest(vec![Capability::Pagination, Capability::Charts]),
            &outcome(raw),
            &workspace,
        );
        assert!(!report.is_validated());
        assert!(!report.blocking_of(FindingKind::SchemaMismatch).is_empty());
    }
}
