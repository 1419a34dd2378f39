use std::sync::Arc;
use std::time::Duration;

use tablesync_config::shared::{DefaultPolicy, TableSyncSpec};
use tokio::sync::broadcast;

use crate::coordinator::Coordinator;
use crate::database::memory::{MemorySourceDatabase, MemoryTargetDatabase};
use crate::engine::{EngineConfig, SyncEngine};
use crate::schema::{ColumnDescriptor, TableName};
use crate::types::{Cell, SyncOutcome, TableRow};

pub type MemoryEngine = SyncEngine<MemorySourceDatabase, MemoryTargetDatabase>;

pub type MemoryCoordinator = Coordinator<MemorySourceDatabase, MemoryTargetDatabase>;

pub fn users_table() -> TableName {
    TableName::new("dbo", "Users")
}

pub fn users_columns() -> Vec<ColumnDescriptor> {
    vec![
        ColumnDescriptor::new("UserID", "int").not_null(),
        ColumnDescriptor::new("Username", "nvarchar").with_length(50).not_null(),
        ColumnDescriptor::new("Email", "nvarchar").with_length(255),
        ColumnDescriptor::new("IsActive", "bit").not_null(),
        ColumnDescriptor::new("Balance", "decimal").with_precision(10, 2),
    ]
}

pub fn user_row(id: i32, username: &str, email: Option<&str>, active: bool) -> TableRow {
    TableRow::new(vec![
        Cell::I32(id),
        Cell::from(username),
        Cell::from(email),
        Cell::Bool(active),
        Cell::Numeric(rust_decimal::Decimal::new(i64::from(id) * 100, 2)),
    ])
}

/// Five users, of which `bob` and `eve` are inactive.
pub fn users_rows() -> Vec<TableRow> {
    vec![
        user_row(1, "ann", Some("ann@example.com"), true),
        user_row(2, "bob", Some("bob@example.com"), false),
        user_row(3, "cid", None, true),
        user_row(4, "dan", Some("dan@example.com"), true),
        user_row(5, "eve", Some("eve@example.com"), false),
    ]
}

/// Creates a source holding the users table.
pub async fn users_source() -> MemorySourceDatabase {
    let source = MemorySourceDatabase::new();
    source
        .add_table(users_table(), users_columns(), users_rows())
        .await;

    source
}

pub fn memory_engine(
    source: MemorySourceDatabase,
    target: MemoryTargetDatabase,
    create_target_table: bool,
) -> Arc<MemoryEngine> {
    Arc::new(SyncEngine::new(
        source,
        target,
        EngineConfig {
            create_target_table,
            ..EngineConfig::default()
        },
    ))
}

/// Defaults with scheduling disabled, so runs only happen when triggered.
pub fn manual_only_defaults() -> DefaultPolicy {
    DefaultPolicy {
        refresh_interval_secs: 3600,
        auto_trigger: false,
        manual_trigger: true,
        create_target_table: true,
    }
}

pub fn users_spec(target_table: &str) -> TableSyncSpec {
    TableSyncSpec::new("dbo.Users", target_table)
}

/// Waits for the next outcome published on `outcome_rx`.
///
/// # Panics
///
/// Panics when no outcome arrives within `timeout`.
pub async fn next_outcome(
    outcome_rx: &mut broadcast::Receiver<SyncOutcome>,
    timeout: Duration,
) -> SyncOutcome {
    tokio::time::timeout(timeout, outcome_rx.recv())
        .await
        .expect("no sync outcome within the timeout")
        .expect("outcome channel closed or lagged")
}
