//! Store contract used by the normalization engines, plus Postgres and in-memory backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fieldnorm_core::{FieldOptionsCatalog, FieldRecord, NormalizableField, NormalizationBackup};
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::{MemoryStore, StoreCall};
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "fieldnorm-storage";

pub const BACKUP_TABLE: &str = "normalization_backups";

/// One row of backup history as read from the store.
pub type BackupRow = Result<NormalizationBackup, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("organization {0} not found")]
    OrganizationNotFound(Uuid),
    #[error("backup row {id} names unknown field `{field}`")]
    UnknownField { id: Uuid, field: String },
    #[error("backup row {id} is unreadable: {reason}")]
    UnreadableBackup { id: Uuid, reason: String },
    #[error("{0}")]
    Unavailable(String),
}

/// Which half of a backup-then-overwrite pair failed.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("backup write failed: {0}")]
    Backup(#[source] StoreError),
    #[error("overwrite failed: {0}")]
    Overwrite(#[source] StoreError),
}

#[async_trait]
pub trait NormalizationStore: Send + Sync {
    /// Create the backup table if it is missing. Must succeed when it already exists.
    async fn ensure_backup_table(&self) -> Result<(), StoreError>;

    /// Organizations whose `field` is non-null, in a stable order.
    async fn records_with_value(
        &self,
        field: NormalizableField,
    ) -> Result<Vec<FieldRecord>, StoreError>;

    async fn insert_backup(&self, backup: &NormalizationBackup) -> Result<(), StoreError>;

    async fn update_field(
        &self,
        organization_id: Uuid,
        field: NormalizableField,
        value: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Write the backup row, then overwrite the field with `backup.normalized_value`.
    /// The overwrite is never attempted when the backup write fails.
    async fn apply_change(&self, backup: &NormalizationBackup) -> Result<(), ApplyError> {
        self.insert_backup(backup).await.map_err(ApplyError::Backup)?;
        self.update_field(
            backup.organization_id,
            backup.field,
            backup.normalized_value.as_deref(),
        )
        .await
        .map_err(ApplyError::Overwrite)
    }

    /// Backups ordered by creation time, optionally only those created at or after `since`.
    /// A row that cannot be decoded is returned as its own `Err` so the rest stay usable.
    async fn list_backups(&self, since: Option<DateTime<Utc>>) -> Result<Vec<BackupRow>, StoreError>;

    async fn field_options(&self) -> Result<FieldOptionsCatalog, StoreError>;
}
