//! Preview / execute / revert orchestration for system-field normalization.

use std::sync::Arc;

use anyhow::{Context, Result};
use fieldnorm_rules::MappingTable;
use fieldnorm_storage::PgStore;

pub mod config;
pub mod engine;
pub mod reports;

pub use config::EngineConfig;
pub use engine::{NormalizationEngine, CONFIRMATION_REQUIRED};
pub use reports::RunReportWriter;

pub const CRATE_NAME: &str = "fieldnorm-engine";

/// Build an engine over Postgres using the compiled-in mapping table.
pub async fn connect_engine(config: &EngineConfig) -> Result<NormalizationEngine> {
    let table = MappingTable::builtin().context("loading built-in mapping table")?;
    let store = PgStore::connect(&config.database_url)
        .await
        .context("connecting to organizations database")?;
    Ok(NormalizationEngine::new(Arc::new(store), table).with_operator(config.operator.clone()))
}
