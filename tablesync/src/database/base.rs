use std::future::Future;

use crate::error::SyncResult;
use crate::schema::{ColumnDescriptor, TableName};
use crate::sql::{CreateTableStatement, LoadStatement, SelectStatement};
use crate::types::TableRow;

/// Database tables are read from.
pub trait SourceDatabase {
    /// Returns the columns of `table` in catalog order, empty when the table is unknown.
    fn get_columns(
        &self,
        table: &TableName,
    ) -> impl Future<Output = SyncResult<Vec<ColumnDescriptor>>> + Send;

    /// Runs `statement` and returns every row it produces.
    fn fetch_rows(
        &self,
        statement: &SelectStatement,
    ) -> impl Future<Output = SyncResult<Vec<TableRow>>> + Send;
}

/// Database tables are rewritten into.
pub trait TargetDatabase {
    fn table_exists(&self, table: &TableName) -> impl Future<Output = SyncResult<bool>> + Send;

    fn create_table(
        &self,
        statement: &CreateTableStatement,
    ) -> impl Future<Output = SyncResult<()>> + Send;

    /// Atomically replaces the content of the table with `rows`.
    ///
    /// Either every row is visible afterwards or the table keeps its previous content. Returns the
    /// number of rows written.
    fn replace_rows(
        &self,
        statement: &LoadStatement,
        rows: Vec<TableRow>,
    ) -> impl Future<Output = SyncResult<u64>> + Send;
}
