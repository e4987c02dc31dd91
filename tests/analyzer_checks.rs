//! Static analyzer behaviour against the security policy.

use modforge::analyzer::StaticAnalyzer;
use modforge::artifact::{ArtifactBundle, FileEntry};
use modforge::manifest::MANIFEST_SCHEMA_ID;
use modforge::policy::PolicyProfile;
use modforge::report::FindingKind;

fn manifest_json() -> Vec<u8> {
    serde_json::json!({
        "$id": MANIFEST_SCHEMA_ID,
        "module_id": "weather/openweather",
        "version": "0.1.0",
        "category": "weather",
        "platform": "openweather",
        "entrypoint": "adapter.py",
        "capabilities": ["pagination"],
    })
    .to_string()
    .into_bytes()
}

fn bundle(adapter: &str) -> ArtifactBundle {
    ArtifactBundle::from_entries([
        FileEntry::new("modules/weather/openweather/manifest.json", manifest_json()).unwrap(),
        FileEntry::new(
            "modules/weather/openweather/adapter.py",
            adapter.as_bytes().to_vec(),
        )
        .unwrap(),
    ])
    .unwrap()
}

const CLEAN: &str = r#"import json
import requests

@register_adapter("weather/openweather")
class OpenWeatherAdapter:
    def fetch_raw(self):
        return requests.get("https://api.example.com/data").json()

    def transform(self, raw):
        return {"temp": raw["main"]["temp"]}

    def get_schema(self):
        return {"temp": "float"}
"#;

#[test]
fn clean_bundle_yields_no_findings() {
    let profile = PolicyProfile::default();
    let report = StaticAnalyzer::new(&profile).analyze(&bundle(CLEAN));
    assert!(report.findings.is_empty(), "{:?}", report.findings);
    assert!(report.is_validated());
}

#[test]
fn forbidden_import_is_terminal_policy_violation() {
    let profile = PolicyProfile::default();
    let source = CLEAN.replace("import requests", "import subprocess");
    let report = StaticAnalyzer::new(&profile).analyze(&bundle(&source));
    assert!(report.has_terminal());
    let violations = report.blocking_of(FindingKind::PolicyViolation);
    assert!(
        violations
            .iter()
            .any(|f| f.message.contains("subprocess")),
        "{violations:?}"
    );
}

#[test]
fn forbidden_prefix_import_rejected() {
    let profile = PolicyProfile::default();
    let source = CLEAN.replace("import requests", "import ctypes.util");
    let report = StaticAnalyzer::new(&profile).analyze(&bundle(&source));
    assert!(report.has_terminal());
}

#[test]
fn dynamic_eval_is_policy_violation() {
    let profile = PolicyProfile::default();
    let source = CLEAN.replace(
        "        return {\"temp\": raw[\"main\"][\"temp\"]}",
        "        return eval(raw)",
    );
    let report = StaticAnalyzer::new(&profile).analyze(&bundle(&source));
    assert!(report.has_terminal());
}

#[test]
fn contract_findings_carry_fix_hints() {
    let profile = PolicyProfile::default();
    let source = CLEAN.replace(
        "    def get_schema(self):\n        return {\"temp\": \"float\"}\n",
        "",
    );
    let report = StaticAnalyzer::new(&profile).analyze(&bundle(&source));
    let missing = report.blocking_of(FindingKind::ContractMissingMethod);
    assert_eq!(missing.len(), 1);
    assert!(
        missing[0]
            .hint
            .as_ref()
            .is_some_and(|h| h.summary.contains("get_schema"))
    );
}

#[test]
fn wrong_arity_counts_as_missing_method() {
    let profile = PolicyProfile::default();
    let source = CLEAN.replace("def transform(self, raw):", "def transform(self):");
    let report = StaticAnalyzer::new(&profile).analyze(&bundle(&source));
    assert!(!report.blocking_of(FindingKind::ContractMissingMethod).is_empty());
}

/// Output ordering must be identical across repeated runs on identical
/// input: fingerprints and repair prompts depend on it.
#[test]
fn finding_order_is_stable_across_runs() {
    let profile = PolicyProfile::default();
    let source = CLEAN
        .replace("import requests", "import paramiko\nimport subprocess")
        .replace(
            "    def get_schema(self):\n        return {\"temp\": \"float\"}\n",
            "",
        );
    let bundle = bundle(&source);
    let analyzer = StaticAnalyzer::new(&profile);
    let baseline = analyzer.analyze(&bundle);
    assert!(baseline.findings.len() >= 3);
    for _ in 0..20 {
        let run = analyzer.analyze(&bundle);
        assert_eq!(run, baseline);
    }
    // Sorted by (path, line, kind): both imports precede the
    // class-level contract finding.
    let lines: Vec<u32> = baseline
        .findings
        .iter()
        .map(|f| f.location.map(|l| l.line).unwrap_or(0))
        .collect();
    let mut sorted = lines.clone();
    sorted.sort_unstable();
    assert_eq!(lines, sorted);
}
