use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use tablesync_config::shared::{DefaultPolicy, TableSyncSpec};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info};

use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::database::base::{SourceDatabase, TargetDatabase};
use crate::engine::SyncEngine;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::types::{SyncOutcome, SyncTrigger};
use crate::workers::base::{Worker, WorkerHandle};
use crate::{bail, sync_error};

/// Longest a single sync run may take before it is abandoned.
pub const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Capacity of a worker's request queue, requests beyond it are coalesced.
const MAILBOX_CAPACITY: usize = 64;

/// Maximum time to wait for a phase change before checking the phase again.
const PHASE_CHANGE_REFRESH_FREQUENCY: Duration = Duration::from_millis(100);

/// Lifecycle phase of a [`TableSyncWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    /// Waiting for manual requests, no scheduled run pending.
    Idle,
    /// A scheduled run is pending.
    Scheduled,
    Syncing,
    Stopping,
    Stopped,
}

impl fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerMessage {
    ScheduledSync,
    ManualSync,
}

#[derive(Debug)]
pub struct TableSyncWorkerStateInner {
    target_table: String,
    phase: WorkerPhase,
    phase_change: Arc<Notify>,
}

impl TableSyncWorkerStateInner {
    fn set_phase(&mut self, phase: WorkerPhase) {
        if self.phase == phase {
            return;
        }

        debug!(
            target_table = %self.target_table,
            "worker phase changing from '{}' to '{}'", self.phase, phase
        );

        self.phase = phase;
        // Only current waiters are woken, no permit is stored for future ones.
        self.phase_change.notify_waiters();
    }

    pub fn target_table(&self) -> &str {
        &self.target_table
    }

    pub fn phase(&self) -> WorkerPhase {
        self.phase
    }
}

/// Shared, observable state of a [`TableSyncWorker`].
#[derive(Debug, Clone)]
pub struct TableSyncWorkerState {
    inner: Arc<RwLock<TableSyncWorkerStateInner>>,
}

impl TableSyncWorkerState {
    fn new(target_table: String, phase: WorkerPhase) -> Self {
        let inner = TableSyncWorkerStateInner {
            target_table,
            phase,
            phase_change: Arc::new(Notify::new()),
        };

        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    pub fn get_inner(&self) -> &RwLock<TableSyncWorkerStateInner> {
        &self.inner
    }

    pub async fn phase(&self) -> WorkerPhase {
        self.inner.read().await.phase
    }

    async fn set_phase(&self, phase: WorkerPhase) {
        self.inner.write().await.set_phase(phase);
    }

    /// Waits until the worker reaches `phase`.
    ///
    /// Waiting never ends if the phase is not reached, callers are expected to bound the wait.
    pub async fn wait_for_phase(&self, phase: WorkerPhase) {
        loop {
            let phase_change = {
                let inner = self.inner.read().await;
                if inner.phase == phase {
                    return;
                }

                inner.phase_change.clone()
            };

            // A notification can be missed between releasing the lock and waiting, the refresh
            // frequency bounds how long that delays us.
            let _ =
                tokio::time::timeout(PHASE_CHANGE_REFRESH_FREQUENCY, phase_change.notified()).await;
        }
    }
}

#[derive(Debug)]
pub struct TableSyncWorkerHandle {
    state: TableSyncWorkerState,
    message_tx: mpsc::Sender<WorkerMessage>,
    shutdown_tx: ShutdownTx,
    handle: Option<JoinHandle<()>>,
}

impl TableSyncWorkerHandle {
    /// Enqueues a manual sync request without waiting for the run.
    ///
    /// When the queue is full the request is coalesced with the ones already pending.
    pub fn trigger(&self) -> SyncResult<()> {
        match self.message_tx.try_send(WorkerMessage::ManualSync) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                debug!("worker queue is full, coalescing manual sync request");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => bail!(
                ErrorKind::InvalidState,
                "Table sync worker is not running"
            ),
        }
    }

    /// Asks the worker to stop, an in-flight run is cancelled.
    pub fn stop(&self) {
        self.shutdown_tx.shutdown();
    }
}

impl WorkerHandle<TableSyncWorkerState> for TableSyncWorkerHandle {
    fn state(&self) -> TableSyncWorkerState {
        self.state.clone()
    }

    async fn wait(mut self) -> SyncResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle
            .await
            .map_err(|err| sync_error!(ErrorKind::WorkerPanic, "Table sync worker panicked", err))
    }
}

/// Worker serializing every sync run of a single target table.
///
/// Scheduled and manual requests land in one queue which the worker drains one request at a time,
/// so runs for the same table never overlap.
#[derive(Debug)]
pub struct TableSyncWorker<S, T> {
    spec: Arc<TableSyncSpec>,
    defaults: DefaultPolicy,
    engine: Arc<SyncEngine<S, T>>,
    outcome_tx: mpsc::UnboundedSender<SyncOutcome>,
    run_timeout: Duration,
}

impl<S, T> TableSyncWorker<S, T> {
    pub fn new(
        spec: Arc<TableSyncSpec>,
        defaults: DefaultPolicy,
        engine: Arc<SyncEngine<S, T>>,
        outcome_tx: mpsc::UnboundedSender<SyncOutcome>,
    ) -> Self {
        Self {
            spec,
            defaults,
            engine,
            outcome_tx,
            run_timeout: DEFAULT_RUN_TIMEOUT,
        }
    }

    pub fn with_run_timeout(mut self, run_timeout: Duration) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    pub fn target_table(&self) -> &str {
        &self.spec.target_table
    }
}

impl<S, T> Worker<TableSyncWorkerHandle, TableSyncWorkerState> for TableSyncWorker<S, T>
where
    S: SourceDatabase + Send + Sync + 'static,
    T: TargetDatabase + Send + Sync + 'static,
{
    type Error = SyncError;

    async fn start(self) -> SyncResult<TableSyncWorkerHandle> {
        let auto_trigger = self.spec.auto_trigger_enabled(&self.defaults);
        let interval = self.spec.refresh_interval(&self.defaults);

        info!(
            source_table = %self.spec.source_table,
            target_table = %self.spec.target_table,
            auto_trigger,
            refresh_interval_secs = interval.as_secs(),
            "starting table sync worker"
        );

        let (message_tx, message_rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();

        // The first scheduled run happens right away.
        let phase = if auto_trigger {
            message_tx
                .try_send(WorkerMessage::ScheduledSync)
                .map_err(|err| {
                    sync_error!(ErrorKind::InvalidState, "Could not schedule the first run", err)
                })?;
            WorkerPhase::Scheduled
        } else {
            WorkerPhase::Idle
        };

        let state = TableSyncWorkerState::new(self.spec.target_table.clone(), phase);

        let worker_span = tracing::info_span!(
            "table_sync_worker",
            source_table = %self.spec.source_table,
            target_table = %self.spec.target_table
        );
        let worker_loop = WorkerLoop {
            self_tx: message_tx.downgrade(),
            state: state.clone(),
            timer: None,
            scheduled_pending: auto_trigger,
            auto_trigger,
            interval,
            worker: self,
        };
        let handle = tokio::spawn(
            worker_loop
                .run(message_rx, shutdown_rx)
                .instrument(worker_span),
        );

        Ok(TableSyncWorkerHandle {
            state,
            message_tx,
            shutdown_tx,
            handle: Some(handle),
        })
    }
}

struct WorkerLoop<S, T> {
    worker: TableSyncWorker<S, T>,
    state: TableSyncWorkerState,
    // Weak, so the queue closes once every handle is gone.
    self_tx: mpsc::WeakSender<WorkerMessage>,
    timer: Option<JoinHandle<()>>,
    /// Whether a scheduled request is waiting, either on the timer or in the queue.
    scheduled_pending: bool,
    auto_trigger: bool,
    interval: Duration,
}

impl<S, T> WorkerLoop<S, T>
where
    S: SourceDatabase + Send + Sync + 'static,
    T: TargetDatabase + Send + Sync + 'static,
{
    async fn run(
        mut self,
        mut message_rx: mpsc::Receiver<WorkerMessage>,
        mut shutdown_rx: ShutdownRx,
    ) {
        loop {
            let message = tokio::select! {
                biased;

                _ = shutdown_rx.wait() => {
                    info!("shutdown signal received, stopping table sync worker");
                    break;
                }

                message = message_rx.recv() => match message {
                    Some(message) => message,
                    None => {
                        info!("every worker handle was dropped, stopping table sync worker");
                        break;
                    }
                }
            };

            let trigger = match message {
                WorkerMessage::ScheduledSync => {
                    self.scheduled_pending = false;
                    SyncTrigger::Scheduled
                }
                WorkerMessage::ManualSync => SyncTrigger::Manual,
            };

            self.state.set_phase(WorkerPhase::Syncing).await;

            let outcome = tokio::select! {
                biased;

                _ = shutdown_rx.wait() => {
                    info!(%trigger, "shutdown signal received, cancelling the in-flight sync run");
                    break;
                }

                outcome = self.run_once(trigger) => outcome,
            };

            if self.worker.outcome_tx.send(outcome).is_err() {
                debug!("no outcome receiver left, dropping the sync outcome");
            }

            // Only scheduled runs re-arm the timer, manual runs leave the schedule as it is.
            if trigger == SyncTrigger::Scheduled && self.auto_trigger {
                self.arm_timer();
            }

            let phase = if self.scheduled_pending {
                WorkerPhase::Scheduled
            } else {
                WorkerPhase::Idle
            };
            self.state.set_phase(phase).await;
        }

        self.state.set_phase(WorkerPhase::Stopping).await;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        message_rx.close();
        self.state.set_phase(WorkerPhase::Stopped).await;

        info!("table sync worker stopped");
    }

    fn arm_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }

        let self_tx = self.self_tx.clone();
        let interval = self.interval;
        self.scheduled_pending = true;
        self.timer = Some(tokio::spawn(
            async move {
                tokio::time::sleep(interval).await;
                if let Some(message_tx) = self_tx.upgrade() {
                    let _ = message_tx.send(WorkerMessage::ScheduledSync).await;
                }
            }
            .in_current_span(),
        ));

        debug!(
            refresh_interval_secs = interval.as_secs(),
            "armed the refresh timer"
        );
    }

    async fn run_once(&self, trigger: SyncTrigger) -> SyncOutcome {
        let spec = &self.worker.spec;
        info!(%trigger, "starting sync run");

        let started = Instant::now();
        let run = AssertUnwindSafe(self.worker.engine.run(spec)).catch_unwind();
        let result = match tokio::time::timeout(self.worker.run_timeout, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(sync_error!(
                ErrorKind::WorkerPanic,
                "Sync run panicked",
                panic_message(panic.as_ref())
            )),
            Err(_) => Err(sync_error!(
                ErrorKind::TimeoutError,
                "Sync run timed out",
                format!(
                    "sync of table {} -> {} did not complete within {}s",
                    spec.source_table,
                    spec.target_table,
                    self.worker.run_timeout.as_secs()
                )
            )),
        };

        let (rows_synced, error) = match result {
            Ok(report) => (report.rows_synced, None),
            Err(err) => (0, Some(err)),
        };

        SyncOutcome {
            source_table: spec.source_table.clone(),
            target_table: spec.target_table.clone(),
            trigger,
            rows_synced,
            error,
            duration: started.elapsed(),
            timestamp: Utc::now(),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
