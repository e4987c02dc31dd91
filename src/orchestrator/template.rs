//! Starter bundle for a freshly scaffolded module.
//!
//! The first IMPLEMENT attempt merges generator output onto this
//! skeleton, so a response that only rewrites `adapter.py` still yields
//! a complete, testable bundle.

use crate::artifact::bundle::{ArtifactBundle, BundleError, FileEntry};
use crate::manifest::Manifest;
use crate::types::{Capability, ModuleId};

const ADAPTER_TEMPLATE: &str = r#"import json


@register_adapter("__MODULE_ID__")
class __CLASS_NAME__Adapter:
    def fetch_raw(self):
        return {"items": [], "page": 1}

    def transform(self, raw):
        return {"items": raw.get("items", []), "page": raw.get("page", 1)}

    def get_schema(self):
        return {"items": "list", "page": "int"}
"#;

const TEST_TEMPLATE: &str = r#"import unittest

from adapter import __CLASS_NAME__Adapter


class TestAdapter(unittest.TestCase):
    def setUp(self):
        self.adapter = __CLASS_NAME__Adapter()

    def test_transform_shapes_output(self):
        raw = self.adapter.fetch_raw()
        out = self.adapter.transform(raw)
        self.assertEqual(sorted(out), sorted(self.adapter.get_schema()))

    def test_pagination_default_page(self):
        out = self.adapter.transform(self.adapter.fetch_raw())
        self.assertEqual(out["page"], 1)
"#;

fn class_name(module_id: &ModuleId) -> String {
    module_id
        .platform()
        .split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// Build the three-file starter: manifest, adapter skeleton, test
/// skeleton.
pub fn starter_bundle(
    module_id: &ModuleId,
    capabilities: Vec<Capability>,
) -> Result<ArtifactBundle, BundleError> {
    let manifest = Manifest::starter(module_id, capabilities);
    let manifest_json =
        serde_json::to_vec_pretty(&manifest).expect("starter manifest serializes");
    let class = class_name(module_id);
    let prefix = module_id.bundle_prefix();

    ArtifactBundle::from_entries([
        FileEntry::new(format!("{prefix}manifest.json"), manifest_json)?,
        FileEntry::new(
            format!("{prefix}adapter.py"),
            ADAPTER_TEMPLATE
                .replace("__MODULE_ID__", &module_id.to_string())
                .replace("__CLASS_NAME__", &class)
                .into_bytes(),
        )?,
        FileEntry::new(
            format!("{prefix}test_adapter.py"),
            TEST_TEMPLATE.replace("__CLASS_NAME__", &class).into_bytes(),
        )?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::StaticAnalyzer;
    use crate::policy::PolicyProfile;

    #[test]
    fn starter_passes_static_analysis() {
        let module: ModuleId = "weather/openweather".parse().unwrap();
        let bundle = starter_bundle(&module, vec![Capability::Pagination]).unwrap();
        assert_eq!(bundle.len(), 3);
        let profile = PolicyProfile::default();
        let report = StaticAnalyzer::new(&profile).analyze(&bundle);
        assert!(report.findings.is_empty(), "{:?}", report.findings);
    }

    #[test]
    fn class_names_are_camel_cased() {
        let module: ModuleId = "finance/stripe_billing".parse().unwrap();
        assert_eq!(class_name(&module), "StripeBilling");
    }
}
