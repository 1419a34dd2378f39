use std::fmt;

use tablesync_config::shared::{DEFAULT_SOURCE_SCHEMA, DEFAULT_TARGET_SCHEMA, ServiceConfig, TableSyncSpec};
use tracing::{debug, info, warn};

use crate::bail;
use crate::database::base::{SourceDatabase, TargetDatabase};
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::schema::{TableName, project_columns};
use crate::sql::{CreateTableStatement, LoadStatement, SelectStatement};
use crate::types::SyncReport;

/// Settings shared by every run of a [`SyncEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Whether a missing target table is created from the projected source columns.
    pub create_target_table: bool,
    pub source_default_schema: String,
    pub target_default_schema: String,
}

impl EngineConfig {
    pub fn from_service_config(config: &ServiceConfig) -> Self {
        Self {
            create_target_table: config.defaults.create_target_table,
            source_default_schema: config.source_default_schema().to_string(),
            target_default_schema: config.target_default_schema().to_string(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            create_target_table: false,
            source_default_schema: DEFAULT_SOURCE_SCHEMA.to_string(),
            target_default_schema: DEFAULT_TARGET_SCHEMA.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Introspect,
    CreateTable,
    Fetch,
    Load,
}

impl Step {
    fn kind(self) -> ErrorKind {
        match self {
            Step::Introspect => ErrorKind::IntrospectionError,
            Step::CreateTable => ErrorKind::DdlError,
            Step::Fetch => ErrorKind::FetchError,
            Step::Load => ErrorKind::LoadError,
        }
    }

    fn description(self) -> &'static str {
        match self {
            Step::Introspect => "Source schema introspection failed",
            Step::CreateTable => "Target table creation failed",
            Step::Fetch => "Source fetch failed",
            Step::Load => "Target load failed",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Introspect => "introspect",
            Step::CreateTable => "create table",
            Step::Fetch => "fetch",
            Step::Load => "load",
        };
        f.write_str(name)
    }
}

/// Wraps `err` into the error of `step`, naming both tables of the run.
fn step_error(step: Step, source: &TableName, target: &TableName, err: SyncError) -> SyncError {
    SyncError::from((
        step.kind(),
        step.description(),
        format!("{step} failed for table {source} -> {target}: {err}"),
    ))
}

/// Runs the full truncate-and-reload of a single table.
///
/// The engine keeps no state between runs, concurrent runs for different tables only share the
/// database handles.
#[derive(Debug)]
pub struct SyncEngine<S, T> {
    source: S,
    target: T,
    config: EngineConfig,
}

impl<S, T> SyncEngine<S, T>
where
    S: SourceDatabase + Send + Sync,
    T: TargetDatabase + Send + Sync,
{
    pub fn new(source: S, target: T, config: EngineConfig) -> Self {
        Self {
            source,
            target,
            config,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Synchronizes the table described by `spec`.
    ///
    /// The steps run strictly in order: introspect the source, create the target when missing and
    /// enabled, fetch the source rows, replace the target content. The first failing step aborts
    /// the run. When the fetch returns no rows the target is left untouched.
    pub async fn run(&self, spec: &TableSyncSpec) -> SyncResult<SyncReport> {
        let source_table = TableName::parse(&spec.source_table, &self.config.source_default_schema)?;
        let target_table = TableName::parse(&spec.target_table, &self.config.target_default_schema)?;

        let columns = self
            .source
            .get_columns(&source_table)
            .await
            .map_err(|err| step_error(Step::Introspect, &source_table, &target_table, err))?;
        if columns.is_empty() {
            let err = SyncError::from((
                ErrorKind::QueryFailed,
                "Source table not found",
                format!("no columns reported for {source_table}"),
            ));
            return Err(step_error(Step::Introspect, &source_table, &target_table, err));
        }

        let columns = project_columns(columns, spec.field_allow_list());
        if columns.is_empty() {
            warn!(
                source_table = %source_table,
                target_table = %target_table,
                "no source column matches the field allow-list, skipping the run"
            );
            return Ok(SyncReport::default());
        }
        debug!(
            source_table = %source_table,
            columns = columns.len(),
            "introspected source columns"
        );

        let mut target_created = false;
        if self.config.create_target_table {
            let exists = self
                .target
                .table_exists(&target_table)
                .await
                .map_err(|err| step_error(Step::CreateTable, &source_table, &target_table, err))?;

            if exists {
                info!(
                    target_table = %target_table,
                    "target table already exists, skipping creation"
                );
            } else {
                let statement = CreateTableStatement::new(target_table.clone(), &columns);
                self.target
                    .create_table(&statement)
                    .await
                    .map_err(|err| step_error(Step::CreateTable, &source_table, &target_table, err))?;
                target_created = true;
                info!(target_table = %target_table, "created target table");
            }
        }

        let select = SelectStatement::new(source_table.clone(), columns, spec.filter_predicate());
        let rows = self
            .source
            .fetch_rows(&select)
            .await
            .map_err(|err| step_error(Step::Fetch, &source_table, &target_table, err))?;

        if rows.is_empty() {
            info!(
                source_table = %source_table,
                target_table = %target_table,
                "source returned no rows, leaving the target untouched"
            );
            return Ok(SyncReport {
                rows_synced: 0,
                target_created,
            });
        }

        if let Some(row) = rows.iter().find(|row| row.len() != select.columns.len()) {
            bail!(
                ErrorKind::FetchError,
                "Source fetch failed",
                format!(
                    "fetch failed for table {source_table} -> {target_table}: row has {} values for {} columns",
                    row.len(),
                    select.columns.len()
                )
            );
        }

        let load = LoadStatement::new(target_table.clone(), &select.columns);
        let rows_synced = self
            .target
            .replace_rows(&load, rows)
            .await
            .map_err(|err| step_error(Step::Load, &source_table, &target_table, err))?;

        Ok(SyncReport {
            rows_synced,
            target_created,
        })
    }
}
