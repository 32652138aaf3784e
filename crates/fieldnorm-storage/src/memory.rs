//! In-process store with a call journal and per-record failure injection.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fieldnorm_core::{
    FieldOptionsCatalog, FieldRecord, NormalizableField, NormalizationBackup, Organization,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{BackupRow, NormalizationStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    EnsureBackupTable,
    ReadRecords(NormalizableField),
    InsertBackup {
        organization_id: Uuid,
        field: NormalizableField,
    },
    UpdateField {
        organization_id: Uuid,
        field: NormalizableField,
        value: Option<String>,
    },
    ListBackups,
    FieldOptions,
}

impl StoreCall {
    pub fn is_write(&self) -> bool {
        matches!(self, StoreCall::InsertBackup { .. } | StoreCall::UpdateField { .. })
    }
}

/// Backup history row that no longer decodes, e.g. one naming a dropped column.
#[derive(Debug, Clone)]
struct UnreadableBackup {
    id: Uuid,
    field_name: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    organizations: Vec<Organization>,
    backups: Vec<NormalizationBackup>,
    unreadable_backups: Vec<UnreadableBackup>,
    backup_table_exists: bool,
    options: FieldOptionsCatalog,
    calls: Vec<StoreCall>,
    fail_backup_table: bool,
    fail_field_options: bool,
    fail_reads: HashSet<NormalizableField>,
    fail_backups_for: HashSet<Uuid>,
    fail_updates_for: HashSet<Uuid>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_organizations(mut self, orgs: impl IntoIterator<Item = Organization>) -> Self {
        self.state.get_mut().organizations.extend(orgs);
        self
    }

    pub fn with_field_options(mut self, options: FieldOptionsCatalog) -> Self {
        self.state.get_mut().options = options;
        self
    }

    /// Seed history as if an earlier run had written it.
    pub fn with_backups(mut self, backups: impl IntoIterator<Item = NormalizationBackup>) -> Self {
        let state = self.state.get_mut();
        state.backups.extend(backups);
        state.backup_table_exists = true;
        self
    }

    pub fn with_unreadable_backup(
        mut self,
        id: Uuid,
        field_name: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let state = self.state.get_mut();
        state.unreadable_backups.push(UnreadableBackup {
            id,
            field_name: field_name.into(),
            created_at,
        });
        state.backup_table_exists = true;
        self
    }

    pub fn failing_backup_table(mut self) -> Self {
        self.state.get_mut().fail_backup_table = true;
        self
    }

    pub fn failing_field_options(mut self) -> Self {
        self.state.get_mut().fail_field_options = true;
        self
    }

    pub fn failing_reads_for(mut self, field: NormalizableField) -> Self {
        self.state.get_mut().fail_reads.insert(field);
        self
    }

    pub fn failing_backups_for(mut self, organization_id: Uuid) -> Self {
        self.state.get_mut().fail_backups_for.insert(organization_id);
        self
    }

    pub fn failing_updates_for(mut self, organization_id: Uuid) -> Self {
        self.state.get_mut().fail_updates_for.insert(organization_id);
        self
    }

    pub async fn organization(&self, id: Uuid) -> Option<Organization> {
        let state = self.state.lock().await;
        state.organizations.iter().find(|o| o.id == id).cloned()
    }

    pub async fn backups(&self) -> Vec<NormalizationBackup> {
        self.state.lock().await.backups.clone()
    }

    pub async fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn write_count(&self) -> usize {
        let state = self.state.lock().await;
        state.calls.iter().filter(|c| c.is_write()).count()
    }
}

#[async_trait]
impl NormalizationStore for MemoryStore {
    async fn ensure_backup_table(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.calls.push(StoreCall::EnsureBackupTable);
        if state.fail_backup_table {
            return Err(StoreError::Unavailable(
                "backup table could not be created".to_string(),
            ));
        }
        state.backup_table_exists = true;
        Ok(())
    }

    async fn records_with_value(
        &self,
        field: NormalizableField,
    ) -> Result<Vec<FieldRecord>, StoreError> {
        let mut state = self.state.lock().await;
        state.calls.push(StoreCall::ReadRecords(field));
        if state.fail_reads.contains(&field) {
            return Err(StoreError::Unavailable(format!("read of {field} refused")));
        }
        Ok(state
            .organizations
            .iter()
            .filter_map(|org| {
                field.value_of(org).map(|value| FieldRecord {
                    organization_id: org.id,
                    organization_name: org.name.clone(),
                    value: value.to_string(),
                })
            })
            .collect())
    }

    async fn insert_backup(&self, backup: &NormalizationBackup) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.calls.push(StoreCall::InsertBackup {
            organization_id: backup.organization_id,
            field: backup.field,
        });
        if !state.backup_table_exists {
            return Err(StoreError::Unavailable(
                "backup table does not exist".to_string(),
            ));
        }
        if state.fail_backups_for.contains(&backup.organization_id) {
            return Err(StoreError::Unavailable(format!(
                "backup insert refused for {}",
                backup.organization_id
            )));
        }
        state.backups.push(backup.clone());
        Ok(())
    }

    async fn update_field(
        &self,
        organization_id: Uuid,
        field: NormalizableField,
        value: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.calls.push(StoreCall::UpdateField {
            organization_id,
            field,
            value: value.map(str::to_string),
        });
        if state.fail_updates_for.contains(&organization_id) {
            return Err(StoreError::Unavailable(format!(
                "update refused for {organization_id}"
            )));
        }
        let org = state
            .organizations
            .iter_mut()
            .find(|o| o.id == organization_id)
            .ok_or(StoreError::OrganizationNotFound(organization_id))?;
        field.set_on(org, value.map(str::to_string));
        Ok(())
    }

    async fn list_backups(&self, since: Option<DateTime<Utc>>) -> Result<Vec<BackupRow>, StoreError> {
        let mut state = self.state.lock().await;
        state.calls.push(StoreCall::ListBackups);
        if !state.backup_table_exists {
            return Err(StoreError::Unavailable(
                "backup table does not exist".to_string(),
            ));
        }
        let in_window = |ts: DateTime<Utc>| since.map_or(true, |since| ts >= since);

        let mut rows = state
            .backups
            .iter()
            .filter(|b| in_window(b.created_at))
            .map(|b| (b.created_at, Ok(b.clone())))
            .collect::<Vec<_>>();
        rows.extend(
            state
                .unreadable_backups
                .iter()
                .filter(|u| in_window(u.created_at))
                .map(|u| {
                    let err = StoreError::UnknownField {
                        id: u.id,
                        field: u.field_name.clone(),
                    };
                    (u.created_at, Err(err))
                }),
        );
        rows.sort_by_key(|(created_at, _)| *created_at);
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    async fn field_options(&self) -> Result<FieldOptionsCatalog, StoreError> {
        let mut state = self.state.lock().await;
        state.calls.push(StoreCall::FieldOptions);
        if state.fail_field_options {
            return Err(StoreError::Unavailable(
                "field options catalog unavailable".to_string(),
            ));
        }
        Ok(state.options.clone())
    }
}
