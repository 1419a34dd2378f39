//! In-memory source and target databases.
//!
//! Both keep their tables behind a shared [`Mutex`] and are cheap to clone, every clone observes
//! the same tables. The target applies loads transactionally and can be told to fail at a given
//! row, the source evaluates simple `column = literal` filters. Together they allow running the
//! full sync flow without a database server.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::info;

use crate::bail;
use crate::database::base::{SourceDatabase, TargetDatabase};
use crate::error::{ErrorKind, SyncResult};
use crate::schema::{ColumnDescriptor, TableName};
use crate::sql::{CreateTableStatement, LoadStatement, SelectStatement, TargetColumn};
use crate::sync_error;
use crate::types::{Cell, TableRow};

#[derive(Debug, Clone)]
struct SourceTable {
    columns: Vec<ColumnDescriptor>,
    rows: Vec<TableRow>,
}

#[derive(Debug, Default)]
struct SourceInner {
    tables: HashMap<TableName, SourceTable>,
    fetch_failures: HashMap<TableName, String>,
    fetch_delay: Option<Duration>,
    statements: Vec<SelectStatement>,
}

#[derive(Debug, Clone, Default)]
pub struct MemorySourceDatabase {
    inner: Arc<Mutex<SourceInner>>,
}

impl MemorySourceDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `table` with `columns` and `rows`, replacing any table of the same name.
    pub async fn add_table(
        &self,
        table: TableName,
        columns: Vec<ColumnDescriptor>,
        rows: Vec<TableRow>,
    ) {
        let mut inner = self.inner.lock().await;
        inner.tables.insert(table, SourceTable { columns, rows });
    }

    /// Replaces the rows of an existing table.
    pub async fn set_rows(&self, table: &TableName, rows: Vec<TableRow>) {
        let mut inner = self.inner.lock().await;
        if let Some(source_table) = inner.tables.get_mut(table) {
            source_table.rows = rows;
        }
    }

    /// Makes every fetch from `table` fail with `message`.
    pub async fn fail_fetch(&self, table: TableName, message: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.fetch_failures.insert(table, message.into());
    }

    pub async fn clear_fetch_failure(&self, table: &TableName) {
        let mut inner = self.inner.lock().await;
        inner.fetch_failures.remove(table);
    }

    /// Delays every fetch by `delay` before reading rows.
    pub async fn set_fetch_delay(&self, delay: Duration) {
        let mut inner = self.inner.lock().await;
        inner.fetch_delay = Some(delay);
    }

    /// Returns every statement fetched so far.
    pub async fn fetched_statements(&self) -> Vec<SelectStatement> {
        let inner = self.inner.lock().await;
        inner.statements.clone()
    }
}

impl SourceDatabase for MemorySourceDatabase {
    async fn get_columns(&self, table: &TableName) -> SyncResult<Vec<ColumnDescriptor>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .tables
            .get(table)
            .map(|source_table| source_table.columns.clone())
            .unwrap_or_default())
    }

    async fn fetch_rows(&self, statement: &SelectStatement) -> SyncResult<Vec<TableRow>> {
        let delay = {
            let mut inner = self.inner.lock().await;
            inner.statements.push(statement.clone());
            inner.fetch_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let inner = self.inner.lock().await;

        if let Some(message) = inner.fetch_failures.get(&statement.table) {
            bail!(ErrorKind::QueryFailed, "Source query failed", message);
        }

        let Some(source_table) = inner.tables.get(&statement.table) else {
            bail!(
                ErrorKind::QueryFailed,
                "Source query failed",
                format!("invalid object name '{}'", statement.table)
            );
        };

        let mut indexes = Vec::with_capacity(statement.columns.len());
        for column in &statement.columns {
            let Some(index) = source_table
                .columns
                .iter()
                .position(|source_column| source_column.name == column.name)
            else {
                bail!(
                    ErrorKind::QueryFailed,
                    "Source query failed",
                    format!("invalid column name '{}'", column.name)
                );
            };
            indexes.push(index);
        }

        let filter = match statement.filter.as_deref() {
            Some(filter) => Some(Filter::parse(filter)?),
            None => None,
        };

        let mut rows = Vec::new();
        for row in &source_table.rows {
            if let Some(filter) = &filter {
                if !filter.matches(&source_table.columns, row)? {
                    continue;
                }
            }

            rows.push(TableRow::new(
                indexes
                    .iter()
                    .map(|&index| row.values.get(index).cloned().unwrap_or(Cell::Null))
                    .collect(),
            ));
        }

        Ok(rows)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Integer(i64),
    String(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Comparison {
    column: String,
    negated: bool,
    literal: Literal,
}

/// A conjunction of `column = literal` and `column <> literal` comparisons.
#[derive(Debug, Clone, PartialEq)]
struct Filter {
    comparisons: Vec<Comparison>,
}

impl Filter {
    fn parse(filter: &str) -> SyncResult<Filter> {
        let mut comparisons = Vec::new();

        for term in split_conjunction(filter) {
            let (column, literal, negated) = if let Some((column, literal)) = term.split_once("<>")
            {
                (column, literal, true)
            } else if let Some((column, literal)) = term.split_once("!=") {
                (column, literal, true)
            } else if let Some((column, literal)) = term.split_once('=') {
                (column, literal, false)
            } else {
                bail!(
                    ErrorKind::QueryFailed,
                    "Unsupported filter predicate",
                    term
                );
            };

            let column = column
                .trim()
                .trim_matches(|c| c == '"' || c == '[' || c == ']')
                .to_string();
            let literal = literal.trim();
            let literal = if let Some(text) = literal
                .strip_prefix('\'')
                .and_then(|literal| literal.strip_suffix('\''))
            {
                Literal::String(text.replace("''", "'"))
            } else {
                Literal::Integer(literal.parse().map_err(|_| {
                    sync_error!(
                        ErrorKind::QueryFailed,
                        "Unsupported filter literal",
                        literal
                    )
                })?)
            };

            comparisons.push(Comparison {
                column,
                negated,
                literal,
            });
        }

        Ok(Filter { comparisons })
    }

    fn matches(&self, columns: &[ColumnDescriptor], row: &TableRow) -> SyncResult<bool> {
        for comparison in &self.comparisons {
            let Some(index) = columns
                .iter()
                .position(|column| column.name.eq_ignore_ascii_case(&comparison.column))
            else {
                bail!(
                    ErrorKind::QueryFailed,
                    "Source query failed",
                    format!("invalid column name '{}'", comparison.column)
                );
            };

            let value = row.values.get(index).unwrap_or(&Cell::Null);
            // Comparisons with NULL are never true.
            if value.is_null() {
                return Ok(false);
            }

            let equal = match (&comparison.literal, value) {
                (Literal::Integer(expected), value) => value.as_i64() == Some(*expected),
                (Literal::String(expected), Cell::String(actual)) => expected == actual,
                _ => false,
            };

            if equal == comparison.negated {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

fn split_conjunction(filter: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let lower = filter.to_ascii_lowercase();
    let mut start = 0;

    while let Some(offset) = lower[start..].find(" and ") {
        terms.push(filter[start..start + offset].trim());
        start += offset + " and ".len();
    }
    terms.push(filter[start..].trim());

    terms
}

#[derive(Debug, Clone)]
struct TargetTable {
    columns: Vec<TargetColumn>,
    rows: Vec<TableRow>,
}

#[derive(Debug, Default)]
struct TargetInner {
    tables: HashMap<TableName, TargetTable>,
    created: Vec<CreateTableStatement>,
    failing_rows: HashMap<TableName, usize>,
    load_delay: Option<Duration>,
    load_counts: HashMap<TableName, usize>,
}

#[derive(Debug, Default)]
struct LoadConcurrency {
    active: HashMap<TableName, usize>,
    max: HashMap<TableName, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTargetDatabase {
    inner: Arc<Mutex<TargetInner>>,
    // Guarded by a blocking mutex so that cancelled loads can release their slot on drop.
    concurrency: Arc<std::sync::Mutex<LoadConcurrency>>,
}

impl MemoryTargetDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an existing table with `columns` and `rows`.
    pub async fn add_table(&self, table: TableName, columns: Vec<TargetColumn>, rows: Vec<TableRow>) {
        let mut inner = self.inner.lock().await;
        inner.tables.insert(table, TargetTable { columns, rows });
    }

    pub async fn table_rows(&self, table: &TableName) -> Option<Vec<TableRow>> {
        let inner = self.inner.lock().await;
        inner.tables.get(table).map(|target| target.rows.clone())
    }

    pub async fn table_columns(&self, table: &TableName) -> Option<Vec<TargetColumn>> {
        let inner = self.inner.lock().await;
        inner.tables.get(table).map(|target| target.columns.clone())
    }

    /// Returns the create statements applied so far.
    pub async fn created_tables(&self) -> Vec<CreateTableStatement> {
        let inner = self.inner.lock().await;
        inner.created.clone()
    }

    /// Makes loads into `table` fail when inserting the row at `row_index`.
    pub async fn fail_insert_at(&self, table: TableName, row_index: usize) {
        let mut inner = self.inner.lock().await;
        inner.failing_rows.insert(table, row_index);
    }

    pub async fn clear_insert_failure(&self, table: &TableName) {
        let mut inner = self.inner.lock().await;
        inner.failing_rows.remove(table);
    }

    /// Holds every load for `delay` before it writes.
    pub async fn set_load_delay(&self, delay: Duration) {
        let mut inner = self.inner.lock().await;
        inner.load_delay = Some(delay);
    }

    /// Number of committed loads into `table`.
    pub async fn load_count(&self, table: &TableName) -> usize {
        let inner = self.inner.lock().await;
        inner.load_counts.get(table).copied().unwrap_or(0)
    }

    /// Highest number of loads that were in progress at once for `table`.
    pub fn max_concurrent_loads(&self, table: &TableName) -> usize {
        let concurrency = self
            .concurrency
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        concurrency.max.get(table).copied().unwrap_or(0)
    }

    fn enter_load(&self, table: &TableName) -> ActiveLoad {
        let mut concurrency = self
            .concurrency
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let active = concurrency.active.entry(table.clone()).or_insert(0);
        *active += 1;
        let active = *active;
        let max = concurrency.max.entry(table.clone()).or_insert(0);
        *max = (*max).max(active);

        ActiveLoad {
            concurrency: self.concurrency.clone(),
            table: table.clone(),
        }
    }
}

/// Marks a load as in progress until dropped.
struct ActiveLoad {
    concurrency: Arc<std::sync::Mutex<LoadConcurrency>>,
    table: TableName,
}

impl Drop for ActiveLoad {
    fn drop(&mut self) {
        let mut concurrency = self
            .concurrency
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(active) = concurrency.active.get_mut(&self.table) {
            *active = active.saturating_sub(1);
        }
    }
}

impl TargetDatabase for MemoryTargetDatabase {
    async fn table_exists(&self, table: &TableName) -> SyncResult<bool> {
        let inner = self.inner.lock().await;

        Ok(inner.tables.contains_key(table))
    }

    async fn create_table(&self, statement: &CreateTableStatement) -> SyncResult<()> {
        let mut inner = self.inner.lock().await;

        if inner.tables.contains_key(&statement.table) {
            bail!(
                ErrorKind::QueryFailed,
                "Target statement failed",
                format!("relation '{}' already exists", statement.table)
            );
        }

        info!(table = %statement.table, "creating in-memory target table");
        inner.tables.insert(
            statement.table.clone(),
            TargetTable {
                columns: statement.columns.clone(),
                rows: Vec::new(),
            },
        );
        inner.created.push(statement.clone());

        Ok(())
    }

    async fn replace_rows(&self, statement: &LoadStatement, rows: Vec<TableRow>) -> SyncResult<u64> {
        let _active_load = self.enter_load(&statement.table);

        let delay = self.inner.lock().await.load_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock().await;
        let failing_row = inner.failing_rows.get(&statement.table).copied();

        let Some(target_table) = inner.tables.get(&statement.table) else {
            bail!(
                ErrorKind::QueryFailed,
                "Target statement failed",
                format!("relation '{}' does not exist", statement.table)
            );
        };

        let mut positions = Vec::with_capacity(statement.columns.len());
        for name in &statement.columns {
            let Some(position) = target_table
                .columns
                .iter()
                .position(|column| &column.name == name)
            else {
                bail!(
                    ErrorKind::QueryFailed,
                    "Target statement failed",
                    format!("column '{name}' of relation '{}' does not exist", statement.table)
                );
            };
            positions.push(position);
        }

        // Rows are staged and only swapped in once every insert succeeded.
        let mut staged = Vec::with_capacity(rows.len());
        for (index, row) in rows.into_iter().enumerate() {
            if failing_row == Some(index) {
                bail!(
                    ErrorKind::QueryFailed,
                    "Target statement failed",
                    format!("injected failure at row {index}")
                );
            }

            if row.len() != positions.len() {
                bail!(
                    ErrorKind::QueryFailed,
                    "Target statement failed",
                    format!(
                        "row {index} has {} values for {} columns",
                        row.len(),
                        positions.len()
                    )
                );
            }

            let mut values = vec![Cell::Null; target_table.columns.len()];
            for (value, &position) in row.values.into_iter().zip(&positions) {
                values[position] = value;
            }

            if let Some(column) = target_table
                .columns
                .iter()
                .zip(&values)
                .find_map(|(column, value)| (!column.nullable && value.is_null()).then_some(column))
            {
                bail!(
                    ErrorKind::QueryFailed,
                    "Target statement failed",
                    format!("null value in column '{}' violates not-null constraint", column.name)
                );
            }

            staged.push(TableRow::new(values));
        }

        let written = staged.len() as u64;
        if let Some(target_table) = inner.tables.get_mut(&statement.table) {
            target_table.rows = staged;
        }
        *inner.load_counts.entry(statement.table.clone()).or_insert(0) += 1;

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableName {
        TableName::new("dbo", "Users")
    }

    fn target_users() -> TableName {
        TableName::new("public", "users")
    }

    fn columns() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new("UserID", "int").not_null(),
            ColumnDescriptor::new("Username", "nvarchar").with_length(50),
            ColumnDescriptor::new("IsActive", "bit"),
        ]
    }

    async fn source() -> MemorySourceDatabase {
        let source = MemorySourceDatabase::new();
        source
            .add_table(
                users(),
                columns(),
                vec![
                    TableRow::new(vec![1i32.into(), "ann".into(), true.into()]),
                    TableRow::new(vec![2i32.into(), "bob".into(), false.into()]),
                    TableRow::new(vec![3i32.into(), "o'neil".into(), true.into()]),
                    TableRow::new(vec![4i32.into(), Cell::Null, Cell::Null]),
                ],
            )
            .await;
        source
    }

    #[tokio::test]
    async fn unknown_tables_have_no_columns() {
        let source = MemorySourceDatabase::new();

        assert!(source.get_columns(&users()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_projects_and_filters_rows() {
        let source = source().await;
        let projected = vec![columns()[1].clone(), columns()[0].clone()];
        let statement = SelectStatement::new(users(), projected, Some("IsActive = 1"));

        let rows = source.fetch_rows(&statement).await.unwrap();

        assert_eq!(
            rows,
            vec![
                TableRow::new(vec!["ann".into(), 1i32.into()]),
                TableRow::new(vec!["o'neil".into(), 3i32.into()]),
            ]
        );
    }

    #[tokio::test]
    async fn filter_supports_strings_and_conjunctions() {
        let source = source().await;
        let statement = SelectStatement::new(
            users(),
            columns(),
            Some("Username <> 'ann' AND [IsActive] = 1"),
        );

        let rows = source.fetch_rows(&statement).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].values[1], Cell::from("o'neil"));

        let statement =
            SelectStatement::new(users(), columns(), Some("Username = 'o''neil'"));
        assert_eq!(source.fetch_rows(&statement).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unsupported_filters_fail_the_fetch() {
        let source = source().await;
        let statement = SelectStatement::new(users(), columns(), Some("UserID > 2"));

        let err = source.fetch_rows(&statement).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::QueryFailed);
    }

    #[tokio::test]
    async fn failed_load_keeps_previous_rows() {
        let target = MemoryTargetDatabase::new();
        let create = CreateTableStatement::new(target_users(), &columns());
        target.create_table(&create).await.unwrap();
        let load = LoadStatement::new(target_users(), &columns());

        let first = vec![TableRow::new(vec![1i32.into(), "ann".into(), true.into()])];
        assert_eq!(target.replace_rows(&load, first.clone()).await.unwrap(), 1);

        target.fail_insert_at(target_users(), 1).await;
        let second = vec![
            TableRow::new(vec![2i32.into(), "bob".into(), false.into()]),
            TableRow::new(vec![3i32.into(), "cid".into(), true.into()]),
        ];
        let err = target.replace_rows(&load, second).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::QueryFailed);
        assert_eq!(target.table_rows(&target_users()).await.unwrap(), first);
        assert_eq!(target.load_count(&target_users()).await, 1);
    }

    #[tokio::test]
    async fn load_rejects_nulls_in_not_null_columns() {
        let target = MemoryTargetDatabase::new();
        let create = CreateTableStatement::new(target_users(), &columns());
        target.create_table(&create).await.unwrap();
        let load = LoadStatement::new(target_users(), &columns());

        let rows = vec![TableRow::new(vec![Cell::Null, "ann".into(), true.into()])];
        let err = target.replace_rows(&load, rows).await.unwrap_err();

        assert!(err.detail().unwrap().contains("not-null"));
        assert_eq!(target.table_rows(&target_users()).await.unwrap(), vec![]);
    }

    #[tokio::test]
    async fn load_into_missing_table_fails() {
        let target = MemoryTargetDatabase::new();
        let load = LoadStatement::new(target_users(), &columns());

        let err = target.replace_rows(&load, vec![]).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::QueryFailed);
    }
}
