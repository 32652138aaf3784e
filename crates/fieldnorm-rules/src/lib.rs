//! Compiled-in mapping table and the value normalizer built on it.

use std::collections::BTreeMap;

use fieldnorm_core::NormalizableField;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod heuristics;

pub use heuristics::heuristic_for;

pub const CRATE_NAME: &str = "fieldnorm-rules";

const BUILTIN_MAPPINGS: &str = include_str!("../rules/system_mappings.yaml");
const SUPPORTED_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum RulesError {
    #[error("parsing mapping table: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("unsupported mapping table version {found} (expected {})", SUPPORTED_VERSION)]
    UnsupportedVersion { found: u32 },
    #[error("empty canonical value for `{raw}` in {field}")]
    EmptyCanonical { field: NormalizableField, raw: String },
}

#[derive(Debug, Deserialize)]
struct MappingFile {
    version: u32,
    #[serde(default)]
    fields: BTreeMap<NormalizableField, BTreeMap<String, String>>,
}

/// Raw observed string -> canonical string for one field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMapping {
    entries: BTreeMap<String, String>,
}

impl FieldMapping {
    pub fn exact(&self, value: &str) -> Option<&str> {
        self.entries.get(value).map(String::as_str)
    }

    /// First key in key order that matches ignoring case.
    pub fn case_insensitive(&self, value: &str) -> Option<&str> {
        let wanted = value.to_lowercase();
        self.entries
            .iter()
            .find(|(raw, _)| raw.to_lowercase() == wanted)
            .map(|(_, canonical)| canonical.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

}

/// Which stage of normalization produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Unset,
    Exact,
    CaseInsensitive,
    Heuristic,
    Passthrough,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub value: Option<String>,
    pub kind: MatchKind,
}

#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    fields: BTreeMap<NormalizableField, FieldMapping>,
}

impl MappingTable {
    /// The table shipped with the binary.
    pub fn builtin() -> Result<Self, RulesError> {
        Self::from_yaml_str(BUILTIN_MAPPINGS)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, RulesError> {
        let file: MappingFile = serde_yaml::from_str(text)?;
        if file.version != SUPPORTED_VERSION {
            return Err(RulesError::UnsupportedVersion {
                found: file.version,
            });
        }

        let mut fields = BTreeMap::new();
        for (field, entries) in file.fields {
            if let Some((raw, _)) = entries.iter().find(|(_, v)| v.trim().is_empty()) {
                return Err(RulesError::EmptyCanonical {
                    field,
                    raw: raw.clone(),
                });
            }
            let mapping = FieldMapping { entries };
            // An empty section configures nothing; the field stays out of default runs.
            if !mapping.is_empty() {
                fields.insert(field, mapping);
            }
        }
        Ok(Self { fields })
    }

    pub fn mapping(&self, field: NormalizableField) -> Option<&FieldMapping> {
        self.fields.get(&field)
    }

    pub fn configured_fields(&self) -> impl Iterator<Item = NormalizableField> + '_ {
        self.fields.keys().copied()
    }

    pub fn normalize(&self, field: NormalizableField, raw: Option<&str>) -> Option<String> {
        self.resolve(field, raw).value
    }

    /// String-keyed entry point; unknown field names pass the value through.
    pub fn normalize_named(&self, field_name: &str, raw: Option<&str>) -> Option<String> {
        let raw = raw.filter(|v| !v.trim().is_empty())?;
        match field_name.parse::<NormalizableField>() {
            Ok(field) => self.normalize(field, Some(raw)),
            Err(_) => Some(raw.to_string()),
        }
    }

    pub fn resolve(&self, field: NormalizableField, raw: Option<&str>) -> Resolution {
        let Some(raw) = raw.filter(|v| !v.trim().is_empty()) else {
            return Resolution {
                value: None,
                kind: MatchKind::Unset,
            };
        };
        let passthrough = || Resolution {
            value: Some(raw.to_string()),
            kind: MatchKind::Passthrough,
        };

        let Some(mapping) = self.mapping(field) else {
            return passthrough();
        };
        let trimmed = raw.trim();

        if let Some(canonical) = mapping.exact(trimmed) {
            return Resolution {
                value: Some(canonical.to_string()),
                kind: MatchKind::Exact,
            };
        }
        if let Some(canonical) = mapping.case_insensitive(trimmed) {
            return Resolution {
                value: Some(canonical.to_string()),
                kind: MatchKind::CaseInsensitive,
            };
        }
        if let Some(rule) = heuristic_for(field) {
            if let Some(canonical) = rule(&trimmed.to_lowercase()) {
                return Resolution {
                    value: Some(canonical.to_string()),
                    kind: MatchKind::Heuristic,
                };
            }
        }
        passthrough()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIS: NormalizableField = NormalizableField::StudentInformationSystem;

    fn table() -> MappingTable {
        MappingTable::builtin().expect("builtin table parses")
    }

    #[test]
    fn blank_values_become_unset_for_every_field() {
        let table = table();
        for field in NormalizableField::ALL {
            assert_eq!(table.normalize(field, None), None);
            assert_eq!(table.normalize(field, Some("")), None);
            assert_eq!(table.normalize(field, Some("   ")), None);
        }
        assert_eq!(table.normalize_named("unmapped_field", Some(" ")), None);
    }

    #[test]
    fn unknown_field_name_passes_through() {
        assert_eq!(
            table().normalize_named("unmapped_field", Some("X")),
            Some("X".to_string())
        );
    }

    #[test]
    fn field_without_mapping_passes_through() {
        let table = table();
        assert!(table.mapping(NormalizableField::PayrollSystem).is_none());
        assert_eq!(
            table.normalize(NormalizableField::PayrollSystem, Some("ADP Workforce Now")),
            Some("ADP Workforce Now".to_string())
        );
    }

    #[test]
    fn exact_match_takes_precedence() {
        let resolution = table().resolve(SIS, Some("Colleague"));
        assert_eq!(resolution.value.as_deref(), Some("Ellucian Colleague"));
        assert_eq!(resolution.kind, MatchKind::Exact);
    }

    #[test]
    fn case_insensitive_fallback_resolves_to_same_target() {
        let table = table();
        assert!(table.mapping(SIS).unwrap().exact("colleague").is_none());
        let resolution = table.resolve(SIS, Some("colleague"));
        assert_eq!(resolution.value.as_deref(), Some("Ellucian Colleague"));
        assert_eq!(resolution.kind, MatchKind::CaseInsensitive);
    }

    #[test]
    fn heuristics_follow_both_mapping_passes() {
        let table = table();
        let one = table.resolve(SIS, Some("Jenzabar ONE Legacy"));
        assert_eq!(one.value.as_deref(), Some("Jenzabar ONE"));
        assert_eq!(one.kind, MatchKind::Heuristic);
        assert_eq!(
            table.normalize(SIS, Some("Jenzabar Legacy")).as_deref(),
            Some("Jenzabar EX")
        );
        assert_eq!(
            table.normalize(SIS, Some("Banner Finance-ish-typo")).as_deref(),
            Some("Ellucian Banner")
        );
    }

    #[test]
    fn heuristics_do_not_leak_into_financial_fields() {
        assert_eq!(
            table()
                .normalize(NormalizableField::FinancialSystem, Some("Jenzabar legacy ledger"))
                .as_deref(),
            Some("Jenzabar legacy ledger")
        );
    }

    #[test]
    fn passthrough_keeps_original_text() {
        assert_eq!(
            table().normalize(SIS, Some("  Homegrown SIS ")).as_deref(),
            Some("  Homegrown SIS ")
        );
    }

    #[test]
    fn surrounding_whitespace_does_not_block_exact_match() {
        assert_eq!(
            table().normalize(SIS, Some(" Banner 9 ")).as_deref(),
            Some("Ellucian Banner")
        );
    }

    #[test]
    fn normalize_is_stable_on_its_own_output() {
        let table = table();
        for field in table.configured_fields().collect::<Vec<_>>() {
            let mapping = table.mapping(field).unwrap();
            for (raw, canonical) in mapping.iter() {
                let once = table.normalize(field, Some(raw));
                let twice = table.normalize(field, once.as_deref());
                assert_eq!(once, twice, "{field}: `{raw}` oscillates");
                assert_eq!(
                    table.normalize(field, Some(canonical)).as_deref(),
                    Some(canonical),
                    "{field}: canonical `{canonical}` is not a fixed point"
                );
            }
        }
        for sample in ["Jenzabar ONE Legacy", "old anthology box", "colleague", "Homegrown SIS"] {
            let once = table.normalize(SIS, Some(sample));
            assert_eq!(table.normalize(SIS, once.as_deref()), once);
        }
    }

    #[test]
    fn empty_field_section_is_not_configured() {
        let table = MappingTable::from_yaml_str(
            "version: 1\nfields:\n  hcm_hr: {}\n  payroll_system:\n    \"ADP\": \"ADP Workforce Now\"\n",
        )
        .unwrap();
        assert_eq!(
            table.configured_fields().collect::<Vec<_>>(),
            vec![NormalizableField::PayrollSystem]
        );
        assert!(table.mapping(NormalizableField::HcmHr).is_none());
    }

    #[test]
    fn rejects_unknown_version_and_field() {
        let err = MappingTable::from_yaml_str("version: 2\nfields: {}\n").unwrap_err();
        assert!(matches!(err, RulesError::UnsupportedVersion { found: 2 }));

        let err = MappingTable::from_yaml_str("version: 1\nfields:\n  shoe_size:\n    a: b\n")
            .unwrap_err();
        assert!(matches!(err, RulesError::Parse(_)));

        let err = MappingTable::from_yaml_str(
            "version: 1\nfields:\n  financial_system:\n    \"Banner\": \" \"\n",
        )
        .unwrap_err();
        assert!(matches!(err, RulesError::EmptyCanonical { .. }));
    }
}
