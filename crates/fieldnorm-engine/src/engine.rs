use std::sync::Arc;

use chrono::{DateTime, Utc};
use fieldnorm_core::{
    ExecuteReport, FieldOptionsCatalog, FieldRecord, NormalizableField, NormalizationBackup,
    PreviewEntry, PreviewReport, RevertReport,
};
use fieldnorm_rules::MappingTable;
use fieldnorm_storage::{ApplyError, NormalizationStore};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CONFIRMATION_REQUIRED: &str =
    "execute requires explicit confirmation (confirm = true); no changes were made";

/// Preview, execute and revert over one store and one mapping table.
#[derive(Clone)]
pub struct NormalizationEngine {
    store: Arc<dyn NormalizationStore>,
    table: Arc<MappingTable>,
    operator: Option<String>,
}

impl NormalizationEngine {
    pub fn new(store: Arc<dyn NormalizationStore>, table: MappingTable) -> Self {
        Self {
            store,
            table: Arc::new(table),
            operator: None,
        }
    }

    /// Identity recorded as `created_by` on every backup row this engine writes.
    pub fn with_operator(mut self, operator: Option<String>) -> Self {
        self.operator = operator;
        self
    }

    pub fn table(&self) -> &MappingTable {
        &self.table
    }

    /// Requested fields in request order without repeats; every mapped field when omitted.
    pub fn target_fields(&self, fields: Option<&[NormalizableField]>) -> Vec<NormalizableField> {
        match fields {
            Some(requested) => {
                let mut out = Vec::with_capacity(requested.len());
                for field in requested {
                    if !out.contains(field) {
                        out.push(*field);
                    }
                }
                out
            }
            None => self.table.configured_fields().collect(),
        }
    }

    fn changes_for(&self, field: NormalizableField, records: Vec<FieldRecord>) -> Vec<PreviewEntry> {
        records
            .into_iter()
            .filter_map(|record| {
                let proposed = self.table.normalize(field, Some(&record.value));
                if proposed.as_deref() == Some(record.value.as_str()) {
                    return None;
                }
                Some(PreviewEntry {
                    organization_id: record.organization_id,
                    organization_name: record.organization_name,
                    field,
                    current_value: record.value,
                    proposed_value: proposed,
                })
            })
            .collect()
    }

    pub async fn preview(&self, fields: Option<&[NormalizableField]>) -> PreviewReport {
        let targets = self.target_fields(fields);
        async {
            let mut entries = Vec::new();
            let mut errors = Vec::new();
            for field in targets {
                match self.store.records_with_value(field).await {
                    Ok(records) => {
                        let changes = self.changes_for(field, records);
                        info!(field = %field, changes = changes.len(), "previewed field");
                        entries.extend(changes);
                    }
                    Err(err) => {
                        error!(field = %field, error = %err, "reading field values failed");
                        errors.push(format!("{field}: failed to read records: {err}"));
                    }
                }
            }
            PreviewReport {
                generated_at: Utc::now(),
                entries,
                errors,
            }
        }
        .instrument(info_span!("normalize_preview"))
        .await
    }

    pub async fn execute(&self, fields: Option<&[NormalizableField]>, confirm: bool) -> ExecuteReport {
        if !confirm {
            warn!("execute called without confirmation; nothing written");
            return ExecuteReport::failed(CONFIRMATION_REQUIRED);
        }
        let targets = self.target_fields(fields);
        let span = info_span!("normalize_execute", operator = self.operator.as_deref().unwrap_or("-"));
        self.execute_confirmed(targets).instrument(span).await
    }

    async fn execute_confirmed(&self, targets: Vec<NormalizableField>) -> ExecuteReport {
        if let Err(err) = self.store.ensure_backup_table().await {
            error!(error = %err, "backup table unavailable; aborting before any change");
            return ExecuteReport::failed(format!(
                "cannot ensure backup table exists: {err}; no changes were made"
            ));
        }

        let catalog = match self.store.field_options().await {
            Ok(catalog) if catalog.is_empty() => {
                info!("field options catalog is empty; skipping option checks");
                None
            }
            Ok(catalog) => Some(catalog),
            Err(err) => {
                warn!(error = %err, "field options catalog unavailable; skipping option checks");
                None
            }
        };

        let mut processed = 0usize;
        let mut errors = Vec::new();

        for field in targets {
            let records = match self.store.records_with_value(field).await {
                Ok(records) => records,
                Err(err) => {
                    error!(field = %field, error = %err, "reading field values failed; skipping field");
                    errors.push(format!("{field}: failed to read records: {err}"));
                    continue;
                }
            };

            let mut field_processed = 0usize;
            for change in self.changes_for(field, records) {
                let backup = NormalizationBackup {
                    id: Uuid::new_v4(),
                    organization_id: change.organization_id,
                    field,
                    original_value: Some(change.current_value.clone()),
                    normalized_value: change.proposed_value.clone(),
                    created_at: Utc::now(),
                    created_by: self.operator.clone(),
                };

                let applied = self.store.apply_change(&backup).await;
                // The backup landed in both of these cases; only then is the option check reached.
                if matches!(applied, Ok(()) | Err(ApplyError::Overwrite(_))) {
                    if let Some(value) = catalog
                        .as_ref()
                        .and_then(|catalog| off_catalog_value(catalog, &change))
                    {
                        warn!(
                            field = %field,
                            value,
                            organization_id = %change.organization_id,
                            "normalized value is not in the field options catalog; writing anyway"
                        );
                    }
                }
                match applied {
                    Ok(()) => field_processed += 1,
                    Err(ApplyError::Backup(err)) => {
                        error!(organization_id = %change.organization_id, field = %field, error = %err, "backup write failed; value left unchanged");
                        errors.push(format!(
                            "{} ({}) {field}: backup write failed, value left unchanged: {err}",
                            change.organization_name, change.organization_id
                        ));
                    }
                    Err(ApplyError::Overwrite(err)) => {
                        error!(organization_id = %change.organization_id, field = %field, error = %err, "overwrite failed");
                        errors.push(format!(
                            "{} ({}) {field}: overwrite failed: {err}",
                            change.organization_name, change.organization_id
                        ));
                    }
                }
            }
            info!(field = %field, processed = field_processed, "normalized field");
            processed += field_processed;
        }

        info!(processed, errors = errors.len(), "execute finished");
        ExecuteReport::from_parts(processed, errors)
    }

    /// Restore `original_value` from every backup created at or after `since`.
    pub async fn revert(&self, since: Option<DateTime<Utc>>) -> RevertReport {
        async {
            let rows = match self.store.list_backups(since).await {
                Ok(rows) => rows,
                Err(err) => {
                    error!(error = %err, "reading backups failed");
                    return RevertReport::failed(format!("cannot read backups: {err}"));
                }
            };

            let mut reverted = 0usize;
            let mut errors = Vec::new();
            // Newest first: the oldest backup in the window is written last for a repeated record.
            for row in rows.iter().rev() {
                let backup = match row {
                    Ok(backup) => backup,
                    Err(err) => {
                        error!(error = %err, "skipping unreadable backup row");
                        errors.push(format!("unreadable backup row skipped: {err}"));
                        continue;
                    }
                };
                match self
                    .store
                    .update_field(
                        backup.organization_id,
                        backup.field,
                        backup.original_value.as_deref(),
                    )
                    .await
                {
                    Ok(()) => reverted += 1,
                    Err(err) => {
                        error!(backup_id = %backup.id, error = %err, "restore failed");
                        errors.push(format!(
                            "{} {}: restore from backup {} failed: {err}",
                            backup.organization_id, backup.field, backup.id
                        ));
                    }
                }
            }

            info!(reverted, errors = errors.len(), "revert finished");
            RevertReport::from_parts(reverted, errors)
        }
        .instrument(info_span!("normalize_revert", since = ?since))
        .await
    }
}

/// Proposed value when the catalog lists options for the field and this value is not one of them.
fn off_catalog_value<'a>(catalog: &FieldOptionsCatalog, change: &'a PreviewEntry) -> Option<&'a str> {
    let value = change.proposed_value.as_deref()?;
    (catalog.allows(change.field, value) == Some(false)).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldnorm_core::Organization;
    use fieldnorm_storage::{MemoryStore, StoreCall};

    const SIS: NormalizableField = NormalizableField::StudentInformationSystem;

    fn engine(store: Arc<MemoryStore>) -> NormalizationEngine {
        NormalizationEngine::new(store, MappingTable::builtin().unwrap())
    }

    #[test]
    fn target_fields_dedups_and_keeps_request_order() {
        let engine = engine(Arc::new(MemoryStore::new()));
        let targets = engine.target_fields(Some(&[
            NormalizableField::FinancialAid,
            SIS,
            NormalizableField::FinancialAid,
        ]));
        assert_eq!(targets, vec![NormalizableField::FinancialAid, SIS]);

        let all = engine.target_fields(None);
        assert!(all.contains(&SIS));
        assert!(!all.contains(&NormalizableField::PayrollSystem));
    }

    #[tokio::test]
    async fn unconfirmed_execute_touches_nothing() {
        let org = Organization::new("A").with(SIS, "Colleague");
        let store = Arc::new(MemoryStore::new().with_organizations([org]));
        let report = engine(store.clone()).execute(Some(&[SIS]), false).await;

        assert!(!report.success);
        assert_eq!(report.processed_count, 0);
        assert_eq!(report.errors, vec![CONFIRMATION_REQUIRED.to_string()]);
        assert!(store.calls().await.is_empty());
    }

    #[tokio::test]
    async fn backup_table_failure_aborts_before_reads() {
        let org = Organization::new("A").with(SIS, "Colleague");
        let store = Arc::new(
            MemoryStore::new()
                .with_organizations([org.clone()])
                .failing_backup_table(),
        );
        let report = engine(store.clone()).execute(None, true).await;

        assert!(!report.success);
        assert_eq!(report.processed_count, 0);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(store.calls().await, vec![StoreCall::EnsureBackupTable]);
        assert_eq!(
            store.organization(org.id).await.unwrap().student_information_system.as_deref(),
            Some("Colleague")
        );
    }

    #[test]
    fn off_catalog_only_when_field_has_options() {
        let mut catalog = FieldOptionsCatalog::new();
        catalog.insert(SIS, "Ellucian Banner");
        let change = |field, proposed: Option<&str>| PreviewEntry {
            organization_id: Uuid::nil(),
            organization_name: "A".into(),
            field,
            current_value: "x".into(),
            proposed_value: proposed.map(str::to_string),
        };

        let listed = change(SIS, Some("Ellucian Banner"));
        assert_eq!(off_catalog_value(&catalog, &listed), None);
        let unlisted = change(SIS, Some("Workday Student"));
        assert_eq!(off_catalog_value(&catalog, &unlisted), Some("Workday Student"));
        let cleared = change(SIS, None);
        assert_eq!(off_catalog_value(&catalog, &cleared), None);
        let no_options = change(NormalizableField::PayrollSystem, Some("ADP"));
        assert_eq!(off_catalog_value(&catalog, &no_options), None);
    }

    #[tokio::test]
    async fn missing_catalog_is_not_an_error() {
        let org = Organization::new("A").with(SIS, "Banner");
        let store = Arc::new(
            MemoryStore::new()
                .with_organizations([org])
                .failing_field_options(),
        );
        let report = engine(store).execute(Some(&[SIS]), true).await;
        assert!(report.success);
        assert_eq!(report.processed_count, 1);
    }

    #[tokio::test]
    async fn blank_value_is_cleared_to_null() {
        let org = Organization::new("A").with(NormalizableField::PayrollSystem, "   ");
        let store = Arc::new(MemoryStore::new().with_organizations([org.clone()]));
        let engine = engine(store.clone());

        let preview = engine.preview(Some(&[NormalizableField::PayrollSystem])).await;
        assert_eq!(preview.entries.len(), 1);
        assert_eq!(preview.entries[0].proposed_value, None);

        let report = engine
            .execute(Some(&[NormalizableField::PayrollSystem]), true)
            .await;
        assert_eq!(report.processed_count, 1);
        assert_eq!(
            store.organization(org.id).await.unwrap().payroll_system,
            None
        );
        assert_eq!(store.backups().await[0].original_value.as_deref(), Some("   "));
    }

    #[tokio::test]
    async fn operator_is_recorded_on_backups() {
        let org = Organization::new("A").with(SIS, "Banner");
        let store = Arc::new(MemoryStore::new().with_organizations([org]));
        engine(store.clone())
            .with_operator(Some("registrar-admin".into()))
            .execute(Some(&[SIS]), true)
            .await;
        assert_eq!(
            store.backups().await[0].created_by.as_deref(),
            Some("registrar-admin")
        );
    }
}
