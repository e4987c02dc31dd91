//! Prompt composition for the scaffold / implement / repair lanes.
//!
//! Repair prompts are shaped from the previous attempt's validation
//! report: the highest-priority blocking finding leads, its fix hint is
//! emphasized, and the remaining hints follow in priority order.

use crate::report::{Finding, FindingKind, ValidationReport};
use crate::types::ModuleId;

/// Schema identifiers the gateway frames requests with.
pub const SCHEMA_SCAFFOLD: &str = "scaffold@1";
pub const SCHEMA_GENERATOR: &str = "generator@1";
pub const SCHEMA_CRITIC: &str = "critic@1";

/// Ordered preference for which retryable finding drives the repair
/// prompt. Earlier kinds win.
pub const RETRYABLE_PRIORITY: [FindingKind; 7] = [
    FindingKind::SchemaMismatch,
    FindingKind::ContractMissingMethod,
    FindingKind::ContractBadDecorator,
    FindingKind::ImportPolicy,
    FindingKind::Runtime,
    FindingKind::TestFailure,
    FindingKind::Syntax,
];

fn priority_rank(kind: FindingKind) -> usize {
    RETRYABLE_PRIORITY
        .iter()
        .position(|k| *k == kind)
        .unwrap_or(RETRYABLE_PRIORITY.len() + kind.order())
}

/// The blocking finding that should drive the next repair prompt.
#[must_use]
pub fn lead_finding(report: &ValidationReport) -> Option<&Finding> {
    report
        .findings
        .iter()
        .filter(|f| f.is_blocking())
        .min_by_key(|f| priority_rank(f.kind))
}

/// Compose the scaffold-plan request.
#[must_use]
pub fn scaffold_prompt(intent: &str, module: &ModuleId, critique: Option<&str>) -> String {
    let mut prompt = format!(
        "Plan a data-integration module for {module}.\n\
         Intent: {intent}\n\
         Respond with a {SCHEMA_SCAFFOLD} document: the file list under \
         modules/{module}/, declared capabilities, and assumptions. \
         Do not emit markdown fences.",
    );
    if let Some(critique) = critique {
        prompt.push_str("\n\nA reviewer rejected the previous plan:\n");
        prompt.push_str(critique);
        prompt.push_str("\nAddress every point above.");
    }
    prompt
}

/// Compose the first IMPLEMENT request.
#[must_use]
pub fn implement_prompt(intent: &str, module: &ModuleId, assumptions: &[String]) -> String {
    let mut prompt = format!(
        "Implement the adapter for {module}.\n\
         Intent: {intent}\n\
         The adapter class must carry @register_adapter(\"{module}\") and \
         define fetch_raw(self), transform(self, raw), get_schema(self). \
         Emit changed_files under modules/{module}/ only, raw file bodies, \
         no markdown fences.",
    );
    if !assumptions.is_empty() {
        prompt.push_str("\nPlan assumptions:\n");
        for assumption in assumptions {
            prompt.push_str("- ");
            prompt.push_str(assumption);
            prompt.push('\n');
        }
    }
    prompt
}

/// Compose the repair request from the previous attempt's report.
#[must_use]
pub fn repair_prompt(intent: &str, module: &ModuleId, report: &ValidationReport) -> String {
    let mut prompt = format!(
        "The previous implementation of {module} failed validation.\n\
         Intent: {intent}\n",
    );

    if let Some(lead) = lead_finding(report) {
        prompt.push_str(&format!(
            "\nFix this first ({}): {}\n",
            lead.kind, lead.message
        ));
        if let Some(hint) = &lead.hint {
            prompt.push_str(&format!("Hint: {}\n", hint.summary));
        }
    }

    let mut rest: Vec<&Finding> = report.findings.iter().filter(|f| f.is_blocking()).collect();
    rest.sort_by_key(|f| priority_rank(f.kind));
    if rest.len() > 1 {
        prompt.push_str("\nRemaining findings, in priority order:\n");
        for finding in rest.iter().skip(1) {
            prompt.push_str(&format!("- [{}] {}", finding.kind, finding.message));
            if let Some(hint) = &finding.hint {
                prompt.push_str(&format!(" (hint: {})", hint.summary));
            }
            prompt.push('\n');
        }
    }

    let failing = report.failing_suites();
    if !failing.is_empty() {
        prompt.push_str(&format!("\nFailing suites: {}\n", failing.join(", ")));
    }

    prompt.push_str(
        "\nReturn only the changed files, raw bodies, no markdown fences, \
         paths under the module directory.",
    );
    prompt
}

/// Compose the critic request for a scaffold plan.
#[must_use]
pub fn critic_prompt(module: &ModuleId, plan_json: &str) -> String {
    format!(
        "Score this scaffold plan for {module} on completeness, \
         feasibility, edge_cases, and efficiency, each in [0, 1], as a \
         {SCHEMA_CRITIC} document with a short critique.\n\nPlan:\n{plan_json}",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::FixHint;

    fn module() -> ModuleId {
        "weather/openweather".parse().unwrap()
    }

    #[test]
    fn lead_follows_priority_order() {
        let mut report = ValidationReport::new();
        report.push(Finding::new(FindingKind::Syntax, "bad indent"));
        report.push(Finding::new(FindingKind::ContractMissingMethod, "no get_schema"));
        report.push(Finding::new(FindingKind::TestFailure, "test failed"));
        assert_eq!(
            lead_finding(&report).unwrap().kind,
            FindingKind::ContractMissingMethod
        );
    }

    #[test]
    fn schema_mismatch_outranks_everything() {
        let mut report = ValidationReport::new();
        report.push(Finding::new(FindingKind::ContractMissingMethod, "x"));
        report.push(Finding::new(FindingKind::SchemaMismatch, "y"));
        assert_eq!(lead_finding(&report).unwrap().kind, FindingKind::SchemaMismatch);
    }

    #[test]
    fn repair_prompt_carries_lead_hint() {
        let mut report = ValidationReport::new();
        report.push(
            Finding::new(FindingKind::ContractMissingMethod, "missing get_schema").with_hint(
                FixHint::new(
                    "contract:add_method:get_schema",
                    "Define `get_schema` with 1 positional parameter(s) on `OpenweatherAdapter`.",
                ),
            ),
        );
        let prompt = repair_prompt("weather adapter", &module(), &report);
        assert!(prompt.contains("get_schema"));
        assert!(prompt.contains("Fix this first (CONTRACT_MISSING_METHOD)"));
    }

    #[test]
    fn scaffold_critique_round() {
        let prompt = scaffold_prompt("an adapter", &module(), Some("plan lacks error handling"));
        assert!(prompt.contains("plan lacks error handling"));
    }
}
