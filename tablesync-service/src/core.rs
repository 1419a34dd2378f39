use std::sync::Arc;

use tablesync::coordinator::Coordinator;
use tablesync::database::base::{SourceDatabase, TargetDatabase};
use tablesync::database::mssql::MssqlSourceDatabase;
use tablesync::database::postgres::{PgSourceDatabase, PgTargetDatabase};
use tablesync::engine::{EngineConfig, SyncEngine};
use tablesync_config::shared::{DatabaseConfig, DatabaseKind, DefaultPolicy, ServiceConfig};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};

/// Starts the table sync service with the provided configuration.
///
/// Connects to both databases, starts one worker per configured table and keeps running until
/// SIGINT or SIGTERM is received, at which point every worker is stopped.
pub async fn start_service_with_config(service_config: ServiceConfig) -> anyhow::Result<()> {
    info!("starting table sync service");

    log_config(&service_config);

    let target = PgTargetDatabase::new(&service_config.target)?;
    target.ping().await?;
    info!(
        host = service_config.target.host,
        dbname = service_config.target.name,
        "connected to the target database"
    );

    // Each source kind gets its own engine type, the dispatch happens once here.
    match service_config.source.kind {
        DatabaseKind::Mssql => {
            let source = MssqlSourceDatabase::new(&service_config.source)?;
            source.ping().await?;
            log_source_connected(&service_config.source);

            start_engine(source, target, service_config).await?;
        }
        DatabaseKind::Postgresql => {
            let source = PgSourceDatabase::new(&service_config.source)?;
            source.ping().await?;
            log_source_connected(&service_config.source);

            start_engine(source, target, service_config).await?;
        }
    }

    info!("table sync service completed");

    Ok(())
}

async fn start_engine<S>(
    source: S,
    target: PgTargetDatabase,
    service_config: ServiceConfig,
) -> anyhow::Result<()>
where
    S: SourceDatabase + Send + Sync + 'static,
{
    let engine = Arc::new(SyncEngine::new(
        source,
        target,
        EngineConfig::from_service_config(&service_config),
    ));
    let coordinator = Coordinator::new(engine, service_config.defaults.clone());

    run_coordinator(coordinator, service_config).await
}

fn log_source_connected(config: &DatabaseConfig) {
    info!(
        kind = %config.kind,
        host = config.host,
        dbname = config.name,
        "connected to the source database"
    );
}

fn log_config(config: &ServiceConfig) {
    log_database_config("source", &config.source);
    log_database_config("target", &config.target);
    log_default_policy(&config.defaults);
    debug!(tables = config.tables.len(), "table list loaded");
}

fn log_database_config(role: &str, config: &DatabaseConfig) {
    debug!(
        role,
        kind = %config.kind,
        host = config.host,
        port = config.port,
        dbname = config.name,
        username = config.username,
        default_schema = ?config.default_schema,
        max_pool_size = config.max_pool_size,
        trust_server_certificate = config.trust_server_certificate,
        "database connection config"
    );
}

fn log_default_policy(config: &DefaultPolicy) {
    debug!(
        refresh_interval_secs = config.refresh_interval_secs,
        auto_trigger = config.auto_trigger,
        manual_trigger = config.manual_trigger,
        create_target_table = config.create_target_table,
        "default table policy"
    );
}

/// Starts every table worker and stops them once a shutdown signal arrives.
#[tracing::instrument(skip_all, fields(tables = service_config.tables.len()))]
async fn run_coordinator<S, T>(
    mut coordinator: Coordinator<S, T>,
    service_config: ServiceConfig,
) -> anyhow::Result<()>
where
    S: SourceDatabase + Send + Sync + 'static,
    T: TargetDatabase + Send + Sync + 'static,
{
    coordinator.start_all(service_config.tables).await?;

    for status in coordinator.status() {
        info!(
            source_table = status.source_table,
            target_table = status.target_table,
            refresh_interval_secs = status.refresh_interval_secs,
            auto_trigger = status.auto_trigger_enabled,
            manual_trigger = status.manual_trigger_enabled,
            "table configured"
        );
    }

    if let Err(err) = wait_for_shutdown_signal().await {
        warn!("failed to listen for shutdown signals, stopping right away: {err}");
    }

    coordinator.stop_all().await?;

    Ok(())
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM.
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    // SIGTERM is sent by orchestrators before SIGKILL, in-flight runs are cancelled and their
    // transactions rolled back.
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("SIGINT (Ctrl+C) received, shutting down table sync service");
        }
        _ = sigterm.recv() => {
            info!("SIGTERM received, shutting down table sync service");
        }
    }

    Ok(())
}
