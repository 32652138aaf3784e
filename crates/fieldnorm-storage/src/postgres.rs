//! Postgres-backed store. Column names come only from `NormalizableField::column`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fieldnorm_core::{
    FieldOptionsCatalog, FieldRecord, NormalizableField, NormalizationBackup,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row};
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{ApplyError, BackupRow, NormalizationStore, StoreError, BACKUP_TABLE};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    async fn backup_table_exists(&self) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT to_regclass($1) IS NOT NULL AS present")
            .bind(BACKUP_TABLE)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("present")?)
    }
}

fn decode_backup(row: &PgRow) -> BackupRow {
    let id: Uuid = row.try_get("id")?;
    let field_name: String = row.try_get("field_name")?;
    let field = field_name
        .parse::<NormalizableField>()
        .map_err(|_| StoreError::UnknownField {
            id,
            field: field_name.clone(),
        })?;
    backup_columns(row, id, field).map_err(|err| StoreError::UnreadableBackup {
        id,
        reason: err.to_string(),
    })
}

fn backup_columns(
    row: &PgRow,
    id: Uuid,
    field: NormalizableField,
) -> Result<NormalizationBackup, sqlx::Error> {
    Ok(NormalizationBackup {
        id,
        organization_id: row.try_get("organization_id")?,
        field,
        original_value: row.try_get("original_value")?,
        normalized_value: row.try_get("normalized_value")?,
        created_at: row.try_get("created_at")?,
        created_by: row.try_get("created_by")?,
    })
}

async fn insert_backup_with<'c, E>(executor: E, backup: &NormalizationBackup) -> Result<(), StoreError>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO normalization_backups
            (id, organization_id, field_name, original_value, normalized_value, created_at, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(backup.id)
    .bind(backup.organization_id)
    .bind(backup.field.column())
    .bind(backup.original_value.as_deref())
    .bind(backup.normalized_value.as_deref())
    .bind(backup.created_at)
    .bind(backup.created_by.as_deref())
    .execute(executor)
    .await?;
    Ok(())
}

async fn update_field_with<'c, E>(
    executor: E,
    organization_id: Uuid,
    field: NormalizableField,
    value: Option<&str>,
) -> Result<(), StoreError>
where
    E: sqlx::Executor<'c, Database = Postgres>,
{
    let sql = format!(
        "UPDATE organizations SET {column} = $1 WHERE id = $2",
        column = field.column()
    );
    let result = sqlx::query(&sql)
        .bind(value)
        .bind(organization_id)
        .execute(executor)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::OrganizationNotFound(organization_id));
    }
    Ok(())
}

#[async_trait]
impl NormalizationStore for PgStore {
    async fn ensure_backup_table(&self) -> Result<(), StoreError> {
        let created = async {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS normalization_backups (
                    id UUID PRIMARY KEY,
                    organization_id UUID NOT NULL,
                    field_name TEXT NOT NULL,
                    original_value TEXT,
                    normalized_value TEXT,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    created_by TEXT
                )
                "#,
            )
            .execute(&self.pool)
            .await?;
            sqlx::query(
                r#"
                CREATE INDEX IF NOT EXISTS normalization_backups_created_at_idx
                    ON normalization_backups (created_at)
                "#,
            )
            .execute(&self.pool)
            .await?;
            Ok::<(), sqlx::Error>(())
        }
        .instrument(info_span!("ensure_backup_table"))
        .await;

        match created {
            Ok(()) => Ok(()),
            // A concurrent creator can win the race; what matters is that the table is there.
            Err(err) => {
                if self.backup_table_exists().await.unwrap_or(false) {
                    warn!(error = %err, "backup table DDL failed but table exists; continuing");
                    Ok(())
                } else {
                    Err(StoreError::Database(err))
                }
            }
        }
    }

    async fn records_with_value(
        &self,
        field: NormalizableField,
    ) -> Result<Vec<FieldRecord>, StoreError> {
        let sql = format!(
            r#"
            SELECT id, name, {column} AS value
              FROM organizations
             WHERE {column} IS NOT NULL
             ORDER BY name, id
            "#,
            column = field.column()
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(FieldRecord {
                organization_id: row.try_get("id")?,
                organization_name: row.try_get("name")?,
                value: row.try_get("value")?,
            });
        }
        debug!(field = %field, count = out.len(), "read field values");
        Ok(out)
    }

    async fn insert_backup(&self, backup: &NormalizationBackup) -> Result<(), StoreError> {
        insert_backup_with(&self.pool, backup).await
    }

    async fn update_field(
        &self,
        organization_id: Uuid,
        field: NormalizableField,
        value: Option<&str>,
    ) -> Result<(), StoreError> {
        update_field_with(&self.pool, organization_id, field, value).await
    }

    /// Both writes share one transaction, so a failed overwrite leaves no backup row behind.
    async fn apply_change(&self, backup: &NormalizationBackup) -> Result<(), ApplyError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| ApplyError::Backup(err.into()))?;
        insert_backup_with(&mut *tx, backup)
            .await
            .map_err(ApplyError::Backup)?;
        update_field_with(
            &mut *tx,
            backup.organization_id,
            backup.field,
            backup.normalized_value.as_deref(),
        )
        .await
        .map_err(ApplyError::Overwrite)?;
        tx.commit()
            .await
            .map_err(|err| ApplyError::Overwrite(err.into()))
    }

    async fn list_backups(&self, since: Option<DateTime<Utc>>) -> Result<Vec<BackupRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, organization_id, field_name, original_value, normalized_value,
                   created_at, created_by
              FROM normalization_backups
             WHERE $1::timestamptz IS NULL OR created_at >= $1
             ORDER BY created_at, id
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(decode_backup).collect())
    }

    async fn field_options(&self) -> Result<FieldOptionsCatalog, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT field_name, option_value
              FROM system_field_options
             ORDER BY field_name, display_order, option_value
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut catalog = FieldOptionsCatalog::new();
        for row in rows {
            let field_name: String = row.try_get("field_name")?;
            let option: String = row.try_get("option_value")?;
            match field_name.parse::<NormalizableField>() {
                Ok(field) => catalog.insert(field, option),
                Err(_) => debug!(field_name = %field_name, "skipping options for non-normalizable field"),
            }
        }
        Ok(catalog)
    }
}
