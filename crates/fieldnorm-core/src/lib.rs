//! Core domain model for organization system-field normalization.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "fieldnorm-core";

/// Vendor-system columns on the organizations table that normalization may rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalizableField {
    StudentInformationSystem,
    FinancialSystem,
    FinancialAid,
    HcmHr,
    PayrollSystem,
    PurchasingSystem,
    HousingManagement,
    LearningManagement,
    AdmissionsCrm,
    AlumniAdvancementCrm,
}

impl NormalizableField {
    pub const ALL: [NormalizableField; 10] = [
        NormalizableField::StudentInformationSystem,
        NormalizableField::FinancialSystem,
        NormalizableField::FinancialAid,
        NormalizableField::HcmHr,
        NormalizableField::PayrollSystem,
        NormalizableField::PurchasingSystem,
        NormalizableField::HousingManagement,
        NormalizableField::LearningManagement,
        NormalizableField::AdmissionsCrm,
        NormalizableField::AlumniAdvancementCrm,
    ];

    /// Column name in the organizations table; also the serialized name.
    pub fn column(self) -> &'static str {
        match self {
            NormalizableField::StudentInformationSystem => "student_information_system",
            NormalizableField::FinancialSystem => "financial_system",
            NormalizableField::FinancialAid => "financial_aid",
            NormalizableField::HcmHr => "hcm_hr",
            NormalizableField::PayrollSystem => "payroll_system",
            NormalizableField::PurchasingSystem => "purchasing_system",
            NormalizableField::HousingManagement => "housing_management",
            NormalizableField::LearningManagement => "learning_management",
            NormalizableField::AdmissionsCrm => "admissions_crm",
            NormalizableField::AlumniAdvancementCrm => "alumni_advancement_crm",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            NormalizableField::StudentInformationSystem => "Student Information System",
            NormalizableField::FinancialSystem => "Financial System",
            NormalizableField::FinancialAid => "Financial Aid",
            NormalizableField::HcmHr => "HCM/HR",
            NormalizableField::PayrollSystem => "Payroll System",
            NormalizableField::PurchasingSystem => "Purchasing System",
            NormalizableField::HousingManagement => "Housing Management",
            NormalizableField::LearningManagement => "Learning Management",
            NormalizableField::AdmissionsCrm => "Admissions CRM",
            NormalizableField::AlumniAdvancementCrm => "Alumni/Advancement CRM",
        }
    }

    pub fn value_of(self, org: &Organization) -> Option<&str> {
        let slot = match self {
            NormalizableField::StudentInformationSystem => &org.student_information_system,
            NormalizableField::FinancialSystem => &org.financial_system,
            NormalizableField::FinancialAid => &org.financial_aid,
            NormalizableField::HcmHr => &org.hcm_hr,
            NormalizableField::PayrollSystem => &org.payroll_system,
            NormalizableField::PurchasingSystem => &org.purchasing_system,
            NormalizableField::HousingManagement => &org.housing_management,
            NormalizableField::LearningManagement => &org.learning_management,
            NormalizableField::AdmissionsCrm => &org.admissions_crm,
            NormalizableField::AlumniAdvancementCrm => &org.alumni_advancement_crm,
        };
        slot.as_deref()
    }

    pub fn set_on(self, org: &mut Organization, value: Option<String>) {
        let slot = match self {
            NormalizableField::StudentInformationSystem => &mut org.student_information_system,
            NormalizableField::FinancialSystem => &mut org.financial_system,
            NormalizableField::FinancialAid => &mut org.financial_aid,
            NormalizableField::HcmHr => &mut org.hcm_hr,
            NormalizableField::PayrollSystem => &mut org.payroll_system,
            NormalizableField::PurchasingSystem => &mut org.purchasing_system,
            NormalizableField::HousingManagement => &mut org.housing_management,
            NormalizableField::LearningManagement => &mut org.learning_management,
            NormalizableField::AdmissionsCrm => &mut org.admissions_crm,
            NormalizableField::AlumniAdvancementCrm => &mut org.alumni_advancement_crm,
        };
        *slot = value;
    }
}

impl fmt::Display for NormalizableField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown normalizable field `{0}`")]
pub struct FieldParseError(pub String);

impl FromStr for NormalizableField {
    type Err = FieldParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        NormalizableField::ALL
            .into_iter()
            .find(|field| field.column() == wanted)
            .ok_or_else(|| FieldParseError(s.to_string()))
    }
}

/// Parse a list of field names, failing on the first unknown name.
pub fn parse_fields<S: AsRef<str>>(names: &[S]) -> Result<Vec<NormalizableField>, FieldParseError> {
    names.iter().map(|name| name.as_ref().parse()).collect()
}

/// Organization row as far as normalization is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub student_information_system: Option<String>,
    pub financial_system: Option<String>,
    pub financial_aid: Option<String>,
    pub hcm_hr: Option<String>,
    pub payroll_system: Option<String>,
    pub purchasing_system: Option<String>,
    pub housing_management: Option<String>,
    pub learning_management: Option<String>,
    pub admissions_crm: Option<String>,
    pub alumni_advancement_crm: Option<String>,
}

impl Organization {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with(mut self, field: NormalizableField, value: impl Into<String>) -> Self {
        field.set_on(&mut self, Some(value.into()));
        self
    }
}

/// Single non-null field value as read from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRecord {
    pub organization_id: Uuid,
    pub organization_name: String,
    pub value: String,
}

/// Persisted record of a field value immediately before normalization overwrote it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizationBackup {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub field: NormalizableField,
    pub original_value: Option<String>,
    pub normalized_value: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

/// Currently valid canonical values per field, maintained outside this system.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldOptionsCatalog {
    options: BTreeMap<NormalizableField, Vec<String>>,
}

impl FieldOptionsCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: NormalizableField, option: impl Into<String>) {
        self.options.entry(field).or_default().push(option.into());
    }

    pub fn options_for(&self, field: NormalizableField) -> Option<&[String]> {
        self.options.get(&field).map(Vec::as_slice)
    }

    /// `None` when the catalog has nothing for this field, so there is nothing to check against.
    pub fn allows(&self, field: NormalizableField, value: &str) -> Option<bool> {
        self.options_for(field)
            .filter(|opts| !opts.is_empty())
            .map(|opts| opts.iter().any(|o| o == value))
    }

    pub fn is_empty(&self) -> bool {
        self.options.values().all(Vec::is_empty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewEntry {
    pub organization_id: Uuid,
    pub organization_name: String,
    pub field: NormalizableField,
    pub current_value: String,
    pub proposed_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewReport {
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<PreviewEntry>,
    pub errors: Vec<String>,
}

impl PreviewReport {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            generated_at: Utc::now(),
            entries: Vec::new(),
            errors: vec![message.into()],
        }
    }

    pub fn counts_by_field(&self) -> BTreeMap<NormalizableField, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.entries {
            *counts.entry(entry.field).or_default() += 1;
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteReport {
    pub success: bool,
    pub processed_count: usize,
    pub errors: Vec<String>,
}

impl ExecuteReport {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            processed_count: 0,
            errors: vec![message.into()],
        }
    }

    pub fn from_parts(processed_count: usize, errors: Vec<String>) -> Self {
        Self {
            success: errors.is_empty(),
            processed_count,
            errors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevertReport {
    pub success: bool,
    pub reverted_count: usize,
    pub errors: Vec<String>,
}

impl RevertReport {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            reverted_count: 0,
            errors: vec![message.into()],
        }
    }

    pub fn from_parts(reverted_count: usize, errors: Vec<String>) -> Self {
        Self {
            success: errors.is_empty(),
            reverted_count,
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_names_round_trip_through_from_str() {
        for field in NormalizableField::ALL {
            assert_eq!(field.column().parse::<NormalizableField>(), Ok(field));
            assert_eq!(field.to_string(), field.column());
        }
        assert_eq!(
            "student_info".parse::<NormalizableField>(),
            Err(FieldParseError("student_info".into()))
        );
    }

    #[test]
    fn serde_name_matches_column() {
        let json = serde_json::to_string(&NormalizableField::AlumniAdvancementCrm).unwrap();
        assert_eq!(json, "\"alumni_advancement_crm\"");
    }

    #[test]
    fn typed_accessors_touch_only_their_column() {
        let mut org = Organization::new("Example College")
            .with(NormalizableField::FinancialAid, "PowerFAIDS");
        NormalizableField::StudentInformationSystem.set_on(&mut org, Some("Banner".into()));

        assert_eq!(NormalizableField::StudentInformationSystem.value_of(&org), Some("Banner"));
        assert_eq!(NormalizableField::FinancialAid.value_of(&org), Some("PowerFAIDS"));
        assert_eq!(NormalizableField::FinancialSystem.value_of(&org), None);

        NormalizableField::FinancialAid.set_on(&mut org, None);
        assert_eq!(NormalizableField::FinancialAid.value_of(&org), None);
    }

    #[test]
    fn catalog_without_options_does_not_judge() {
        let mut catalog = FieldOptionsCatalog::new();
        assert!(catalog.is_empty());
        catalog.insert(NormalizableField::StudentInformationSystem, "Ellucian Banner");
        assert!(!catalog.is_empty());
        assert_eq!(
            catalog.allows(NormalizableField::StudentInformationSystem, "Ellucian Banner"),
            Some(true)
        );
        assert_eq!(
            catalog.allows(NormalizableField::StudentInformationSystem, "Banner"),
            Some(false)
        );
        assert_eq!(catalog.allows(NormalizableField::PayrollSystem, "ADP"), None);
    }

    #[test]
    fn execute_report_success_tracks_errors() {
        assert!(ExecuteReport::from_parts(3, vec![]).success);
        let failed = ExecuteReport::from_parts(2, vec!["boom".into()]);
        assert!(!failed.success);
        assert_eq!(failed.processed_count, 2);
    }

    #[test]
    fn parse_fields_rejects_unknown_names() {
        let ok = parse_fields(&["financial_system", "hcm_hr"]).unwrap();
        assert_eq!(ok, vec![NormalizableField::FinancialSystem, NormalizableField::HcmHr]);
        assert!(parse_fields(&["financial_system", "nope"]).is_err());
    }
}
