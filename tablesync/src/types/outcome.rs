use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::SyncError;

/// What caused a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncTrigger {
    Scheduled,
    Manual,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncTrigger::Scheduled => f.write_str("scheduled"),
            SyncTrigger::Manual => f.write_str("manual"),
        }
    }
}

/// Summary of a successful run of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncReport {
    /// Rows written into the target, zero when the source returned no rows.
    pub rows_synced: u64,
    /// Whether the target table was created during the run.
    pub target_created: bool,
}

/// Result of one sync run, published by the worker once the run completes.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub source_table: String,
    pub target_table: String,
    pub trigger: SyncTrigger,
    /// Rows written, zero for failed runs.
    pub rows_synced: u64,
    /// The failure of the run, `None` when it succeeded.
    pub error: Option<SyncError>,
    pub duration: Duration,
    /// When the run completed.
    pub timestamp: DateTime<Utc>,
}

impl SyncOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Read-only view of a configured table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct TableStatus {
    pub source_table: String,
    pub target_table: String,
    pub refresh_interval_secs: u64,
    pub auto_trigger_enabled: bool,
    pub manual_trigger_enabled: bool,
}
