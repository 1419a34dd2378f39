use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tablesync::database::base::SourceDatabase;
use tablesync::database::memory::MemoryTargetDatabase;
use tablesync::engine::{EngineConfig, SyncEngine};
use tablesync::error::{ErrorKind, SyncResult};
use tablesync::schema::{ColumnDescriptor, TableName};
use tablesync::sql::SelectStatement;
use tablesync::test_utils::fixtures::{
    manual_only_defaults, memory_engine, users_source, users_spec,
};
use tablesync::types::{SyncOutcome, SyncTrigger, TableRow};
use tablesync::workers::base::{Worker, WorkerHandle};
use tablesync::workers::table_sync::{TableSyncWorker, WorkerPhase};
use tablesync_telemetry::init_test_tracing;
use tokio::sync::mpsc;

const OUTCOME_TIMEOUT: Duration = Duration::from_secs(5);

/// Source whose catalog lookups panic on the first call and succeed afterwards.
#[derive(Debug, Default)]
struct PanickingSource {
    calls: AtomicUsize,
}

impl SourceDatabase for PanickingSource {
    async fn get_columns(&self, _table: &TableName) -> SyncResult<Vec<ColumnDescriptor>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("catalog lookup exploded");
        }

        Ok(vec![ColumnDescriptor::new("Id", "int").not_null()])
    }

    async fn fetch_rows(&self, _statement: &SelectStatement) -> SyncResult<Vec<TableRow>> {
        Ok(vec![TableRow::new(vec![7i32.into()])])
    }
}

async fn next(outcome_rx: &mut mpsc::UnboundedReceiver<SyncOutcome>) -> SyncOutcome {
    tokio::time::timeout(OUTCOME_TIMEOUT, outcome_rx.recv())
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_runs_are_reported_and_the_worker_keeps_serving() {
    init_test_tracing();
    let engine = Arc::new(SyncEngine::new(
        PanickingSource::default(),
        MemoryTargetDatabase::new(),
        EngineConfig {
            create_target_table: true,
            ..EngineConfig::default()
        },
    ));
    let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
    let worker = TableSyncWorker::new(
        Arc::new(users_spec("public.users")),
        manual_only_defaults(),
        engine.clone(),
        outcome_tx,
    );
    let handle = worker.start().await.unwrap();

    handle.trigger().unwrap();
    let outcome = next(&mut outcome_rx).await;
    let err = outcome.error.unwrap();
    assert_eq!(err.kind(), ErrorKind::WorkerPanic);
    assert_eq!(err.detail(), Some("catalog lookup exploded"));

    handle.trigger().unwrap();
    let outcome = next(&mut outcome_rx).await;
    assert!(outcome.is_success());
    assert_eq!(outcome.trigger, SyncTrigger::Manual);
    assert_eq!(outcome.rows_synced, 1);

    handle.stop();
    handle.wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn stopped_workers_reject_triggers() {
    init_test_tracing();
    let (outcome_tx, _outcome_rx) = mpsc::unbounded_channel();
    let worker = TableSyncWorker::new(
        Arc::new(users_spec("public.users")),
        manual_only_defaults(),
        memory_engine(users_source().await, MemoryTargetDatabase::new(), true),
        outcome_tx,
    );
    let handle = worker.start().await.unwrap();
    let state = handle.state();
    assert_eq!(state.phase().await, WorkerPhase::Idle);

    handle.stop();
    tokio::time::timeout(OUTCOME_TIMEOUT, state.wait_for_phase(WorkerPhase::Stopped))
        .await
        .unwrap();

    let err = handle.trigger().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    handle.wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn dropping_the_handle_stops_the_worker() {
    init_test_tracing();
    let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();
    let worker = TableSyncWorker::new(
        Arc::new(users_spec("public.users")),
        manual_only_defaults(),
        memory_engine(users_source().await, MemoryTargetDatabase::new(), true),
        outcome_tx,
    );
    let handle = worker.start().await.unwrap();
    let state = handle.state();

    drop(handle);

    tokio::time::timeout(OUTCOME_TIMEOUT, state.wait_for_phase(WorkerPhase::Stopped))
        .await
        .unwrap();
    // The worker owned the last outcome sender.
    assert!(outcome_rx.recv().await.is_none());
}
