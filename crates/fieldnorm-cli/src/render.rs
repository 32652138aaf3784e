use std::fmt::Write as _;

use fieldnorm_core::{ExecuteReport, NormalizableField, PreviewReport, RevertReport};
use fieldnorm_rules::Resolution;
use fieldnorm_web::FieldInfo;

fn quoted(value: Option<&str>) -> String {
    match value {
        Some(v) => format!("{v:?}"),
        None => "null".to_string(),
    }
}

pub fn fields_table(infos: &[FieldInfo]) -> String {
    let mut out = String::new();
    for info in infos {
        let _ = writeln!(
            out,
            "{:<26} {:<26} mappings={:<3} heuristics={}",
            info.field.column(),
            info.label,
            info.mapping_entries,
            if info.heuristics { "yes" } else { "no" }
        );
    }
    out
}

pub fn resolution(field: NormalizableField, input: Option<&str>, res: &Resolution) -> String {
    format!(
        "{field}: {} -> {} ({:?})",
        quoted(input),
        quoted(res.value.as_deref()),
        res.kind
    )
}

pub fn preview(report: &PreviewReport) -> String {
    let mut out = String::new();
    let counts = report.counts_by_field();
    let mut current: Option<NormalizableField> = None;
    for entry in &report.entries {
        if current != Some(entry.field) {
            current = Some(entry.field);
            let _ = writeln!(
                out,
                "{} ({} changes)",
                entry.field,
                counts.get(&entry.field).copied().unwrap_or_default()
            );
        }
        let _ = writeln!(
            out,
            "  {} [{}]: {} -> {}",
            entry.organization_name,
            entry.organization_id,
            quoted(Some(&entry.current_value)),
            quoted(entry.proposed_value.as_deref())
        );
    }
    let _ = writeln!(out, "preview: {} proposed changes", report.entries.len());
    push_errors(&mut out, &report.errors);
    out
}

pub fn execute(report: &ExecuteReport) -> String {
    let mut out = format!(
        "execute {}: processed={} errors={}\n",
        if report.success { "complete" } else { "finished with errors" },
        report.processed_count,
        report.errors.len()
    );
    push_errors(&mut out, &report.errors);
    out
}

pub fn revert(report: &RevertReport) -> String {
    let mut out = format!(
        "revert {}: reverted={} errors={}\n",
        if report.success { "complete" } else { "finished with errors" },
        report.reverted_count,
        report.errors.len()
    );
    push_errors(&mut out, &report.errors);
    out
}

fn push_errors(out: &mut String, errors: &[String]) {
    for err in errors {
        let _ = writeln!(out, "  error: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fieldnorm_core::PreviewEntry;
    use fieldnorm_rules::MatchKind;
    use uuid::Uuid;

    #[test]
    fn preview_groups_under_field_headers() {
        let entry = |name: &str, field| PreviewEntry {
            organization_id: Uuid::nil(),
            organization_name: name.to_string(),
            field,
            current_value: "Banner".into(),
            proposed_value: Some("Ellucian Banner".into()),
        };
        let report = PreviewReport {
            generated_at: Utc::now(),
            entries: vec![
                entry("A", NormalizableField::StudentInformationSystem),
                entry("B", NormalizableField::StudentInformationSystem),
                entry("C", NormalizableField::FinancialSystem),
            ],
            errors: vec!["financial_aid: failed to read records: down".into()],
        };

        let text = preview(&report);
        assert!(text.contains("student_information_system (2 changes)\n"));
        assert!(text.contains("financial_system (1 changes)\n"));
        assert!(text.contains("\"Banner\" -> \"Ellucian Banner\""));
        assert!(text.contains("preview: 3 proposed changes"));
        assert!(text.contains("error: financial_aid"));
    }

    #[test]
    fn unset_values_render_as_null() {
        let res = Resolution {
            value: None,
            kind: MatchKind::Unset,
        };
        assert_eq!(
            resolution(NormalizableField::HcmHr, Some("  "), &res),
            "hcm_hr: \"  \" -> null (Unset)"
        );
    }

    #[test]
    fn execute_summary_mentions_errors() {
        let text = execute(&ExecuteReport::from_parts(2, vec!["B overwrite failed".into()]));
        assert!(text.starts_with("execute finished with errors: processed=2 errors=1"));
        assert!(text.contains("error: B overwrite failed"));
    }
}
