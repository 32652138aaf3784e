//! Per-run report directories: `<root>/<run_id>/<operation>.json` plus `summary.md`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use fieldnorm_core::{ExecuteReport, PreviewReport, RevertReport};
use serde::Serialize;
use tokio::fs;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RunReportWriter {
    root: PathBuf,
}

impl RunReportWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn write_preview(&self, run_id: Uuid, report: &PreviewReport) -> Result<PathBuf> {
        self.write(run_id, "preview", report, preview_summary_markdown(run_id, report))
            .await
    }

    pub async fn write_execute(&self, run_id: Uuid, report: &ExecuteReport) -> Result<PathBuf> {
        let summary = outcome_markdown(
            run_id,
            "Execute",
            report.success,
            "Processed",
            report.processed_count,
            &report.errors,
        );
        self.write(run_id, "execute", report, summary).await
    }

    pub async fn write_revert(&self, run_id: Uuid, report: &RevertReport) -> Result<PathBuf> {
        let summary = outcome_markdown(
            run_id,
            "Revert",
            report.success,
            "Reverted",
            report.reverted_count,
            &report.errors,
        );
        self.write(run_id, "revert", report, summary).await
    }

    async fn write<T: Serialize>(
        &self,
        run_id: Uuid,
        operation: &str,
        report: &T,
        summary: String,
    ) -> Result<PathBuf> {
        let run_dir = self.root.join(run_id.to_string());
        fs::create_dir_all(&run_dir)
            .await
            .with_context(|| format!("creating {}", run_dir.display()))?;

        let json = serde_json::to_vec_pretty(report)
            .with_context(|| format!("serializing {operation} report"))?;
        let json_path = run_dir.join(format!("{operation}.json"));
        fs::write(&json_path, json)
            .await
            .with_context(|| format!("writing {}", json_path.display()))?;

        let summary_path = run_dir.join("summary.md");
        fs::write(&summary_path, summary)
            .await
            .with_context(|| format!("writing {}", summary_path.display()))?;

        Ok(run_dir)
    }
}

pub fn preview_summary_markdown(run_id: Uuid, report: &PreviewReport) -> String {
    let counts = report
        .counts_by_field()
        .iter()
        .map(|(field, count)| format!("- {} (`{}`): {}", field.label(), field, count))
        .collect::<Vec<_>>();
    let mut out = format!(
        "# Normalization Preview\n\n- Run ID: `{}`\n- Generated: {}\n- Proposed changes: {}\n\n## Changes By Field\n{}\n",
        run_id,
        report.generated_at,
        report.entries.len(),
        if counts.is_empty() {
            "- none".to_string()
        } else {
            counts.join("\n")
        }
    );
    push_errors(&mut out, &report.errors);
    out
}

fn outcome_markdown(
    run_id: Uuid,
    title: &str,
    success: bool,
    count_label: &str,
    count: usize,
    errors: &[String],
) -> String {
    let mut out = format!(
        "# Normalization {title}\n\n- Run ID: `{run_id}`\n- Finished: {}\n- Success: {success}\n- {count_label}: {count}\n",
        Utc::now()
    );
    push_errors(&mut out, errors);
    out
}

fn push_errors(out: &mut String, errors: &[String]) {
    if errors.is_empty() {
        return;
    }
    out.push_str("\n## Errors\n");
    for err in errors {
        out.push_str("- ");
        out.push_str(err);
        out.push('\n');
    }
}
