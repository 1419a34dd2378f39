use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tablesync_config::shared::{DefaultPolicy, TableSyncSpec};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::database::base::{SourceDatabase, TargetDatabase};
use crate::engine::SyncEngine;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::schema::TableName;
use crate::types::{SyncOutcome, TableStatus};
use crate::workers::base::{Worker, WorkerHandle};
use crate::workers::table_sync::{
    DEFAULT_RUN_TIMEOUT, TableSyncWorker, TableSyncWorkerHandle, TableSyncWorkerState, WorkerPhase,
};

/// Number of outcomes buffered for slow subscribers before they start lagging.
const OUTCOME_CHANNEL_CAPACITY: usize = 1024;

/// Acknowledgement of a manual trigger request.
///
/// An acknowledgement only confirms the request was handled, never that a run completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAck {
    /// The request was accepted. Requests for unknown tables are acknowledged as well.
    Submitted,
    /// The table does not accept manual triggers, nothing was enqueued.
    ManualTriggerDisabled,
}

#[derive(Debug)]
struct RegisteredTable {
    spec: Arc<TableSyncSpec>,
    handle: TableSyncWorkerHandle,
}

/// Owns one [`TableSyncWorker`] per configured target table and routes requests to them.
///
/// Requests never wait for a run, they are handed to the worker of the table and acknowledged.
/// Outcomes of every run are logged and republished to [`Coordinator::subscribe_outcomes`].
#[derive(Debug)]
pub struct Coordinator<S, T> {
    engine: Arc<SyncEngine<S, T>>,
    defaults: DefaultPolicy,
    run_timeout: Duration,
    /// Workers keyed by the resolved target table name.
    tables: HashMap<String, RegisteredTable>,
    /// Keys of `tables` in configuration order.
    order: Vec<String>,
    outcome_tx: Option<mpsc::UnboundedSender<SyncOutcome>>,
    outcome_broadcast: broadcast::Sender<SyncOutcome>,
    collector: Option<JoinHandle<()>>,
}

impl<S, T> Coordinator<S, T>
where
    S: SourceDatabase + Send + Sync + 'static,
    T: TargetDatabase + Send + Sync + 'static,
{
    pub fn new(engine: Arc<SyncEngine<S, T>>, defaults: DefaultPolicy) -> Self {
        let (outcome_broadcast, _) = broadcast::channel(OUTCOME_CHANNEL_CAPACITY);

        Self {
            engine,
            defaults,
            run_timeout: DEFAULT_RUN_TIMEOUT,
            tables: HashMap::new(),
            order: Vec::new(),
            outcome_tx: None,
            outcome_broadcast,
            collector: None,
        }
    }

    /// Overrides the longest time a single run may take.
    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    /// Resolves a target table identifier to the key of its worker.
    ///
    /// `users` and `public.users` name the same table when `public` is the target default schema.
    fn table_key(&self, target_table: &str) -> SyncResult<String> {
        let table = TableName::parse(target_table, &self.engine.config().target_default_schema)?;

        Ok(table.to_string())
    }

    fn outcome_sender(&mut self) -> mpsc::UnboundedSender<SyncOutcome> {
        if let Some(outcome_tx) = &self.outcome_tx {
            return outcome_tx.clone();
        }

        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        self.collector = Some(tokio::spawn(collect_outcomes(
            outcome_rx,
            self.outcome_broadcast.clone(),
        )));
        self.outcome_tx = Some(outcome_tx.clone());

        outcome_tx
    }

    /// Starts a worker for every spec.
    ///
    /// A spec whose target table already has a worker is reported and skipped, the first spec for
    /// a target table wins.
    pub async fn start_all(&mut self, specs: Vec<TableSyncSpec>) -> SyncResult<()> {
        for spec in specs {
            let key = match self.table_key(&spec.target_table) {
                Ok(key) => key,
                Err(err) => {
                    error!(
                        target_table = %spec.target_table,
                        error_kind = ?err.kind(),
                        error = %err,
                        "invalid target table, skipping"
                    );
                    continue;
                }
            };

            if self.tables.contains_key(&key) {
                error!(
                    source_table = %spec.source_table,
                    target_table = %spec.target_table,
                    error_kind = ?ErrorKind::ConfigurationError,
                    "target table is configured more than once, skipping the duplicate entry"
                );
                continue;
            }

            let spec = Arc::new(spec);
            let worker = TableSyncWorker::new(
                spec.clone(),
                self.defaults.clone(),
                self.engine.clone(),
                self.outcome_sender(),
            )
            .with_run_timeout(self.run_timeout);
            let handle = match worker.start().await {
                Ok(handle) => handle,
                Err(err) => return Err(self.abort_start(err).await),
            };

            self.order.push(key.clone());
            self.tables.insert(key, RegisteredTable { spec, handle });
        }

        info!(tables = self.tables.len(), "table sync workers started");

        Ok(())
    }

    /// Stops the workers started before a worker failed to start and hands back its error.
    async fn abort_start(&mut self, err: SyncError) -> SyncError {
        error!(
            error_kind = ?err.kind(),
            error = %err,
            started = self.tables.len(),
            "could not start a table sync worker, stopping the started ones"
        );

        if let Err(stop_err) = self.stop_all().await {
            error!(error = %stop_err, "started table sync workers did not stop cleanly");
        }

        err
    }

    /// Requests a manual run of `target_table`.
    ///
    /// Unknown tables are logged and acknowledged without effect.
    pub fn trigger_one(&self, target_table: &str) -> TriggerAck {
        let registered = self
            .table_key(target_table)
            .ok()
            .and_then(|key| self.tables.get(&key));

        let Some(registered) = registered else {
            warn!(
                target_table,
                error_kind = ?ErrorKind::LookupError,
                "manual trigger for an unknown table, ignoring"
            );
            return TriggerAck::Submitted;
        };

        if !registered.spec.manual_trigger_enabled(&self.defaults) {
            warn!(target_table, "manual trigger is disabled for table, ignoring");
            return TriggerAck::ManualTriggerDisabled;
        }

        self.submit(registered);

        TriggerAck::Submitted
    }

    /// Requests a manual run of every table, regardless of its manual trigger setting.
    pub fn trigger_all(&self) -> TriggerAck {
        for key in &self.order {
            if let Some(registered) = self.tables.get(key) {
                self.submit(registered);
            }
        }

        TriggerAck::Submitted
    }

    fn submit(&self, registered: &RegisteredTable) {
        match registered.handle.trigger() {
            Ok(()) => debug!(
                target_table = %registered.spec.target_table,
                "manual sync request submitted"
            ),
            Err(err) => error!(
                target_table = %registered.spec.target_table,
                error_kind = ?err.kind(),
                error = %err,
                "could not submit manual sync request"
            ),
        }
    }

    /// Returns the effective settings of every running table in configuration order.
    pub fn status(&self) -> Vec<TableStatus> {
        self.order
            .iter()
            .filter_map(|key| self.tables.get(key))
            .map(|registered| {
                let spec = &registered.spec;
                TableStatus {
                    source_table: spec.source_table.clone(),
                    target_table: spec.target_table.clone(),
                    refresh_interval_secs: spec.refresh_interval(&self.defaults).as_secs(),
                    auto_trigger_enabled: spec.auto_trigger_enabled(&self.defaults),
                    manual_trigger_enabled: spec.manual_trigger_enabled(&self.defaults),
                }
            })
            .collect()
    }

    /// Subscribes to the outcomes of every run completed after this call.
    pub fn subscribe_outcomes(&self) -> broadcast::Receiver<SyncOutcome> {
        self.outcome_broadcast.subscribe()
    }

    pub fn worker_state(&self, target_table: &str) -> Option<TableSyncWorkerState> {
        let key = self.table_key(target_table).ok()?;

        self.tables.get(&key).map(|registered| registered.handle.state())
    }

    pub async fn worker_phase(&self, target_table: &str) -> Option<WorkerPhase> {
        let state = self.worker_state(target_table)?;

        Some(state.phase().await)
    }

    /// Stops every worker and waits for each of them to terminate.
    ///
    /// In-flight runs are cancelled. Errors of workers that did not terminate cleanly are
    /// aggregated into the returned error.
    pub async fn stop_all(&mut self) -> SyncResult<()> {
        info!(tables = self.tables.len(), "stopping table sync workers");

        for registered in self.tables.values() {
            registered.handle.stop();
        }

        let mut errors = Vec::new();
        for key in std::mem::take(&mut self.order) {
            let Some(registered) = self.tables.remove(&key) else {
                continue;
            };

            if let Err(err) = registered.handle.wait().await {
                errors.push(err);
            }
        }

        // Workers hold the remaining senders, the collector ends once they are all gone.
        self.outcome_tx = None;
        if let Some(collector) = self.collector.take() {
            if let Err(err) = collector.await {
                error!(error = %err, "outcome collector terminated abnormally");
            }
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        info!("table sync workers stopped");

        Ok(())
    }
}

async fn collect_outcomes(
    mut outcome_rx: mpsc::UnboundedReceiver<SyncOutcome>,
    outcome_broadcast: broadcast::Sender<SyncOutcome>,
) {
    while let Some(outcome) = outcome_rx.recv().await {
        log_outcome(&outcome);
        // Having no subscribers is fine.
        let _ = outcome_broadcast.send(outcome);
    }
}

fn log_outcome(outcome: &SyncOutcome) {
    let duration_ms = outcome.duration.as_millis() as u64;

    match &outcome.error {
        None => info!(
            source_table = %outcome.source_table,
            target_table = %outcome.target_table,
            trigger = %outcome.trigger,
            rows_synced = outcome.rows_synced,
            duration_ms,
            "table sync succeeded"
        ),
        Some(err) => error!(
            source_table = %outcome.source_table,
            target_table = %outcome.target_table,
            trigger = %outcome.trigger,
            duration_ms,
            error_kind = ?err.kind(),
            error = %err,
            "table sync failed"
        ),
    }
}
