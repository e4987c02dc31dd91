//! Failure classification: repair, advance, or abort.
//!
//! Tie-breaks: TERMINAL wins, then NON_PROGRESSING, else RETRYABLE.
//! Within RETRYABLE the lead finding follows
//! [`RETRYABLE_PRIORITY`](super::prompts::RETRYABLE_PRIORITY).

use crate::gateway::GatewayError;
use crate::report::{FailureFingerprint, Finding, FindingKind, ValidationReport};
use crate::types::FailureReason;

use super::prompts;

/// What the orchestrator does with a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureClass {
    /// Exit the repair loop immediately with `FAILED`.
    Terminal(FailureReason),
    /// Two consecutive attempts with equal fingerprints.
    NonProgressing,
    /// Enter REPAIR; `lead` drives the prompt emphasis.
    Retryable { lead: FindingKind },
}

/// Classify a failed validation report.
pub fn classify_report(
    report: &ValidationReport,
    previous: Option<&FailureFingerprint>,
    current: &FailureFingerprint,
    resource_already_retried: bool,
) -> FailureClass {
    if report.has_terminal() {
        return FailureClass::Terminal(FailureReason::PolicyViolation);
    }
    let resource_hit = !report.blocking_of(FindingKind::ResourceExhausted).is_empty();
    if resource_hit && resource_already_retried {
        return FailureClass::Terminal(FailureReason::ResourceExhausted);
    }
    if previous == Some(current) {
        return FailureClass::NonProgressing;
    }
    let lead = prompts::lead_finding(report)
        .map(|f| f.kind)
        .unwrap_or(FindingKind::Runtime);
    FailureClass::Retryable { lead }
}

/// Outcome of mapping a gateway error into the orchestration flow.
#[derive(Debug)]
pub enum GatewayOutcome {
    /// The job ends now with this reason.
    Terminal(FailureReason),
    /// The job was cancelled.
    Cancelled,
    /// The failure is attempt-scoped; classify this synthetic report
    /// like any other failed validation (thrash detection included).
    AttemptFailed(ValidationReport),
}

/// Map the gateway taxonomy into orchestrator semantics.
#[must_use]
pub fn classify_gateway_error(error: &GatewayError) -> GatewayOutcome {
    match error {
        GatewayError::Cancelled => GatewayOutcome::Cancelled,
        GatewayError::BudgetExhausted(_) => {
            GatewayOutcome::Terminal(FailureReason::BudgetExhausted)
        }
        GatewayError::ProviderAuth => GatewayOutcome::Terminal(FailureReason::ProviderAuth),
        GatewayError::SchemaInvalid { reason } => {
            let mut report = ValidationReport::new();
            report.push(Finding::new(
                FindingKind::SchemaMismatch,
                format!("generator response rejected: {reason}"),
            ));
            GatewayOutcome::AttemptFailed(report)
        }
        GatewayError::ProviderTransient { message } => {
            let mut report = ValidationReport::new();
            report.push(Finding::new(
                FindingKind::RateLimit,
                format!("provider chain exhausted on transient failures: {message}"),
            ));
            GatewayOutcome::AttemptFailed(report)
        }
        GatewayError::ProviderFatal { message } => {
            let mut report = ValidationReport::new();
            report.push(Finding::new(
                FindingKind::Runtime,
                format!("provider failure: {message}"),
            ));
            GatewayOutcome::AttemptFailed(report)
        }
    }
}
