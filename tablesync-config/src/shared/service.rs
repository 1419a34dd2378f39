use serde::{Deserialize, Serialize};

use crate::Config;
use crate::shared::{DatabaseConfig, DatabaseKind, DefaultPolicy, TableSyncSpec, ValidationError};

/// Schema applied to bare source identifiers when the source config names none.
pub const DEFAULT_SOURCE_SCHEMA: &str = "dbo";

/// Schema applied to bare target identifiers when the target config names none.
pub const DEFAULT_TARGET_SCHEMA: &str = "public";

/// Configuration of the table synchronization service.
///
/// Loaded once at startup and treated as immutable for the lifetime of the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServiceConfig {
    /// Database the tables are read from.
    pub source: DatabaseConfig,
    /// Database the tables are rewritten into.
    pub target: DatabaseConfig,
    /// Fallback values for unset table settings.
    #[serde(default)]
    pub defaults: DefaultPolicy,
    /// Tables to synchronize, one worker is started for each entry.
    #[serde(default)]
    pub tables: Vec<TableSyncSpec>,
}

impl ServiceConfig {
    /// Validates the [`ServiceConfig`].
    ///
    /// Duplicate target tables are deliberately not rejected here, the coordinator reports them
    /// and keeps the first entry.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate("source")?;
        self.target.validate("target")?;

        if self.target.kind != DatabaseKind::Postgresql {
            return Err(ValidationError::InvalidConfig(format!(
                "the target database must be of type postgresql, got {}",
                self.target.kind
            )));
        }

        for (index, table) in self.tables.iter().enumerate() {
            table.validate(index)?;
        }

        Ok(())
    }

    /// Schema applied to bare source table identifiers.
    pub fn source_default_schema(&self) -> &str {
        self.source.default_schema_or(DEFAULT_SOURCE_SCHEMA)
    }

    /// Schema applied to bare target table identifiers.
    pub fn target_default_schema(&self) -> &str {
        self.target.default_schema_or(DEFAULT_TARGET_SCHEMA)
    }
}

impl Config for ServiceConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &[];
}
