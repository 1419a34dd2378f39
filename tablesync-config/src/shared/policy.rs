use serde::{Deserialize, Serialize};

/// Fallback policy applied to every table setting left unset in a [`crate::shared::TableSyncSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct DefaultPolicy {
    /// Seconds between two scheduled runs of a table.
    pub refresh_interval_secs: u64,
    /// Whether tables are synchronized on a schedule.
    pub auto_trigger: bool,
    /// Whether tables accept manual sync requests.
    pub manual_trigger: bool,
    /// Whether a missing target table is created from the source schema.
    pub create_target_table: bool,
}

impl Default for DefaultPolicy {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 300,
            auto_trigger: true,
            manual_trigger: true,
            create_target_table: false,
        }
    }
}
