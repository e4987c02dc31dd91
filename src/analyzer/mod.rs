//! Static analysis of candidate bundles against the security policy.
//!
//! The analyzer never executes code. It scans every Python source in a
//! bundle, applies the policy profile to the import graph and call
//! sites, and checks the adapter contract on the manifest's entrypoint.
//! Findings come back stable-sorted by (path, line, kind) — determinism
//! is a tested property, because fingerprints and repair prompts are
//! built from this output.

pub mod python;

use crate::artifact::bundle::ArtifactBundle;
use crate::manifest::Manifest;
use crate::policy::{FORBIDDEN_CALL_PATTERNS, PolicyProfile, import_is_forbidden};
use crate::report::{Finding, FindingKind, FixHint, SourceLocation, ValidationReport};

/// Required adapter methods and their arity (including `self`).
pub const REQUIRED_METHODS: &[(&str, usize)] =
    &[("fetch_raw", 1), ("transform", 2), ("get_schema", 1)];

/// Decorator that registers an adapter class with the runtime.
pub const REGISTRATION_DECORATOR: &str = "register_adapter";

/// Stateless analyzer applying one [`PolicyProfile`].
#[derive(Debug, Clone)]
pub struct StaticAnalyzer<'a> {
    profile: &'a PolicyProfile,
}

impl<'a> StaticAnalyzer<'a> {
    #[must_use]
    pub fn new(profile: &'a PolicyProfile) -> Self {
        Self { profile }
    }

    /// Analyze every source file in the bundle. The result is sorted
    /// and self-contained; the caller merges it with runtime findings.
    #[must_use]
    pub fn analyze(&self, bundle: &ArtifactBundle) -> ValidationReport {
        let mut report = ValidationReport::new();

        let manifest = bundle
            .iter()
            .find(|e| e.path().ends_with("/manifest.json"))
            .and_then(|e| match Manifest::from_json(e.bytes()) {
                Ok(manifest) => Some((e.path().to_string(), manifest)),
                Err(err) => {
                    report.push(
                        Finding::new(
                            FindingKind::SchemaMismatch,
                            format!("manifest rejected: {err}"),
                        )
                        .with_path(e.path())
                        .with_hint(FixHint::new(
                            "manifest:schema",
                            "Regenerate manifest.json to conform to the manifest schema.",
                        )),
                    );
                    None
                }
            });

        let entrypoint_path = manifest.as_ref().map(|(path, m)| {
            let dir = path.trim_end_matches("manifest.json");
            format!("{dir}{}", m.entrypoint)
        });

        // Imports of sibling files within the bundle (`from adapter
        // import ...` in the test file) are module-local, not external
        // dependencies.
        let local_modules: Vec<String> = bundle
            .paths()
            .iter()
            .filter(|p| p.ends_with(".py"))
            .filter_map(|p| p.rsplit('/').next())
            .map(|name| name.trim_end_matches(".py").to_string())
            .collect();

        for entry in bundle.iter() {
            if !entry.path().ends_with(".py") {
                continue;
            }
            let Ok(text) = std::str::from_utf8(entry.bytes()) else {
                report.push(
                    Finding::new(FindingKind::Syntax, "source file is not valid UTF-8")
                        .with_path(entry.path()),
                );
                continue;
            };
            let source = python::scan(text, FORBIDDEN_CALL_PATTERNS);
            self.check_imports(entry.path(), &source, &local_modules, &mut report);
            self.check_calls(entry.path(), &source, &mut report);
            self.check_syntax(entry.path(), &source, &mut report);

            let is_entrypoint = entrypoint_path.as_deref() == Some(entry.path());
            if is_entrypoint {
                self.check_contract(entry.path(), &source, &mut report);
            }
        }

        report.sort();
        report
    }

    fn check_imports(
        &self,
        path: &str,
        source: &python::PySource,
        local_modules: &[String],
        report: &mut ValidationReport,
    ) {
        for import in &source.imports {
            let location = SourceLocation::at(import.line, import.column);
            if local_modules.iter().any(|m| m == &import.name) && !import_is_forbidden(&import.name)
            {
                continue;
            }
            if import_is_forbidden(&import.name) {
                report.push(
                    Finding::new(
                        FindingKind::PolicyViolation,
                        format!("forbidden import `{}`", import.name),
                    )
                    .with_path(path)
                    .with_location(location)
                    .with_hint(FixHint::new(
                        format!("policy:forbidden_import:{}", import.name),
                        format!("Remove the `{}` import; it is never permitted.", import.name),
                    )),
                );
            } else if !self.profile.import_allowed(&import.name) {
                report.push(
                    Finding::new(
                        FindingKind::ImportPolicy,
                        format!(
                            "import `{}` is outside the allowed prefix list",
                            import.name
                        ),
                    )
                    .with_path(path)
                    .with_location(location)
                    .with_hint(FixHint::new(
                        format!("import_policy:{}", import.name),
                        format!(
                            "Replace `{}` with an allowed library or drop the dependency.",
                            import.name
                        ),
                    )),
                );
            }
        }
    }

    fn check_calls(&self, path: &str, source: &python::PySource, report: &mut ValidationReport) {
        for call in &source.calls {
            report.push(
                Finding::new(
                    FindingKind::PolicyViolation,
                    format!("forbidden call pattern `{}`: {}", call.pattern, call.description),
                )
                .with_path(path)
                .with_location(SourceLocation::at(call.line, call.column))
                .with_hint(FixHint::new(
                    format!("policy:forbidden_call:{}", call.pattern.trim_end_matches('(')),
                    format!("Remove the `{}...)` call; {}.", call.pattern, call.description),
                )),
            );
        }
    }

    fn check_syntax(&self, path: &str, source: &python::PySource, report: &mut ValidationReport) {
        for err in &source.syntax_errors {
            report.push(
                Finding::new(FindingKind::Syntax, err.message.clone())
                    .with_path(path)
                    .with_location(SourceLocation::at(err.line, err.column)),
            );
        }
    }

    /// Contract checks run only on the manifest's entrypoint file.
    fn check_contract(&self, path: &str, source: &python::PySource, report: &mut ValidationReport) {
        let adapter = source
            .classes
            .iter()
            .find(|c| c.decorators.iter().any(|d| d == REGISTRATION_DECORATOR))
            .or_else(|| {
                source
                    .classes
                    .iter()
                    .find(|c| c.name.ends_with("Adapter"))
            })
            .or_else(|| source.classes.first());

        let Some(adapter) = adapter else {
            report.push(
                Finding::new(
                    FindingKind::ContractBadDecorator,
                    "entrypoint defines no adapter class",
                )
                .with_path(path)
                .with_hint(FixHint::new(
                    "contract:define_adapter",
                    format!(
                        "Define an adapter class decorated with @{REGISTRATION_DECORATOR}."
                    ),
                )),
            );
            return;
        };

        if !adapter
            .decorators
            .iter()
            .any(|d| d == REGISTRATION_DECORATOR)
        {
            report.push(
                Finding::new(
                    FindingKind::ContractBadDecorator,
                    format!(
                        "adapter class `{}` lacks the @{REGISTRATION_DECORATOR} decorator",
                        adapter.name
                    ),
                )
                .with_path(path)
                .with_location(SourceLocation::line(adapter.line))
                .with_hint(FixHint::new(
                    "contract:add_decorator",
                    format!(
                        "Decorate `{}` with @{REGISTRATION_DECORATOR}(\"<category>/<platform>\").",
                        adapter.name
                    ),
                )),
            );
        }

        for (method, arity) in REQUIRED_METHODS {
            match adapter.methods.iter().find(|m| m.name == *method) {
                None => {
                    report.push(
                        Finding::new(
                            FindingKind::ContractMissingMethod,
                            format!("adapter class `{}` is missing `{method}`", adapter.name),
                        )
                        .with_path(path)
                        .with_location(SourceLocation::line(adapter.line))
                        .with_hint(FixHint::new(
                            format!("contract:add_method:{method}"),
                            format!(
                                "Define `{method}` with {arity} positional parameter(s) on `{}`.",
                                adapter.name
                            ),
                        )),
                    );
                }
                Some(found) if found.arity != *arity => {
                    report.push(
                        Finding::new(
                            FindingKind::ContractMissingMethod,
                            format!(
                                "`{method}` has arity {} but the contract requires {arity}",
                                found.arity
                            ),
                        )
                        .with_path(path)
                        .with_location(SourceLocation::line(found.line))
                        .with_hint(FixHint::new(
                            format!("contract:fix_arity:{method}"),
                            format!(
                                "Change `{method}` to take exactly {arity} positional parameter(s)."
                            ),
                        )),
                    );
                }
                Some(_) => {}
            }
        }
    }
}
