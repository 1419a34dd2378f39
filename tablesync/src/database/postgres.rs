use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, PoolError, RecyclingMethod};
use tablesync_config::shared::{DatabaseConfig, IntoConnectOptions};
use tokio_postgres::types::{FromSql, Kind, ToSql, Type};
use tokio_postgres::{NoTls, Row};
use tracing::debug;
use uuid::Uuid;

use crate::bail;
use crate::database::base::{SourceDatabase, TargetDatabase};
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::schema::{ColumnDescriptor, TableName, quote_identifier};
use crate::sql::{CreateTableStatement, LoadStatement, SelectStatement};
use crate::sync_error;
use crate::types::{Cell, PgNumeric, TableRow};

const GET_COLUMNS_QUERY: &str = r#"
    select column_name::text,
        data_type::text,
        character_maximum_length::int4,
        numeric_precision::int4,
        numeric_scale::int4,
        is_nullable::text
    from information_schema.columns
    where table_schema = $1 and table_name = $2
    order by ordinal_position
"#;

const TABLE_EXISTS_QUERY: &str = r#"
    select exists (
        select 1 from information_schema.tables
        where table_schema = $1 and table_name = $2
    )
"#;

/// Catalog type names whose values are decoded from their binary representation.
///
/// Any other column is cast to `text` by the select query, so types like `interval`, `inet`,
/// arrays or extension types arrive as strings. `money` is read as `numeric`.
const DECODED_TYPES: &[&str] = &[
    "boolean",
    "smallint",
    "integer",
    "bigint",
    "oid",
    "real",
    "double precision",
    "numeric",
    "text",
    "character varying",
    "character",
    "name",
    "date",
    "time without time zone",
    "timestamp without time zone",
    "timestamp with time zone",
    "uuid",
    "json",
    "jsonb",
    "bytea",
    "xml",
];

fn has_decoder(data_type: &str) -> bool {
    DECODED_TYPES
        .iter()
        .any(|decoded| decoded.eq_ignore_ascii_case(data_type.trim()))
}

/// Quotes the column and casts it to `text` when its values have no decoder.
fn project_column(column: &ColumnDescriptor) -> String {
    let quoted = quote_identifier(&column.name);
    if column.data_type.trim().eq_ignore_ascii_case("money") {
        // The text form of money is locale formatted, the numeric one is not.
        format!("{quoted}::numeric AS {quoted}")
    } else if has_decoder(&column.data_type) {
        quoted
    } else {
        format!("{quoted}::text AS {quoted}")
    }
}

/// Renders the query reading the rows selected by `statement`.
fn select_sql(statement: &SelectStatement) -> String {
    statement.render(&statement.table.as_quoted_identifier(), project_column)
}

/// Builds a connection pool for the database described by `config`.
///
/// No connection is opened until the pool is first used.
pub fn connect_pool(config: &DatabaseConfig, kind: ErrorKind) -> SyncResult<Pool> {
    let pg_config: tokio_postgres::Config = config.with_db();
    let manager = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );

    Pool::builder(manager)
        .max_size(config.max_pool_size)
        .build()
        .map_err(|err| sync_error!(kind, "Connection pool creation failed", err))
}

fn pool_error(kind: ErrorKind, err: PoolError) -> SyncError {
    sync_error!(kind, "Could not acquire a pooled connection", err)
}

async fn ping(pool: &Pool, kind: ErrorKind) -> SyncResult<()> {
    let client = pool.get().await.map_err(|err| pool_error(kind, err))?;
    client
        .simple_query("SELECT 1")
        .await
        .map_err(|err| sync_error!(kind, "Database ping failed", err))?;

    Ok(())
}

/// Decodes any value whose binary wire format is its UTF-8 text.
struct RawText(String);

impl<'a> FromSql<'a> for RawText {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(RawText(std::str::from_utf8(raw)?.to_string()))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::XML || matches!(ty.kind(), Kind::Enum(_))
    }
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, index: usize) -> Result<Option<T>, tokio_postgres::Error> {
    row.try_get::<_, Option<T>>(index)
}

/// Converts the value at `index` of `row` into a [`Cell`] according to the column type.
fn cell_from_row(row: &Row, index: usize) -> SyncResult<Cell> {
    let ty = row.columns()[index].type_();

    let cell = match *ty {
        Type::BOOL => get::<bool>(row, index)?.into(),
        Type::INT2 => get::<i16>(row, index)?.into(),
        Type::INT4 => get::<i32>(row, index)?.into(),
        Type::OID => get::<u32>(row, index)?.into(),
        Type::INT8 => get::<i64>(row, index)?.into(),
        Type::FLOAT4 => get::<f32>(row, index)?.into(),
        Type::FLOAT8 => get::<f64>(row, index)?.into(),
        Type::NUMERIC => get::<PgNumeric>(row, index)?.into(),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME => {
            get::<String>(row, index)?.into()
        }
        Type::DATE => get::<NaiveDate>(row, index)?.into(),
        Type::TIME => get::<NaiveTime>(row, index)?.into(),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, index)?.into(),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, index)?.into(),
        Type::UUID => get::<Uuid>(row, index)?.into(),
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, index)?.into(),
        Type::BYTEA => get::<Vec<u8>>(row, index)?.into(),
        _ if RawText::accepts(ty) => get::<RawText>(row, index)?.map(|text| text.0).into(),
        _ => bail!(
            ErrorKind::ConversionError,
            "Unsupported source column type",
            format!("column '{}' has type {ty}", row.columns()[index].name())
        ),
    };

    Ok(cell)
}

fn table_row_from_row(row: &Row) -> SyncResult<TableRow> {
    let values = (0..row.len())
        .map(|index| cell_from_row(row, index))
        .collect::<SyncResult<Vec<_>>>()?;

    Ok(TableRow::new(values))
}

/// Source database reached over the PostgreSQL protocol.
#[derive(Debug, Clone)]
pub struct PgSourceDatabase {
    pool: Pool,
}

impl PgSourceDatabase {
    pub fn new(config: &DatabaseConfig) -> SyncResult<Self> {
        let pool = connect_pool(config, ErrorKind::SourceConnectionFailed)?;

        Ok(Self { pool })
    }

    /// Checks that a connection to the source can be established.
    pub async fn ping(&self) -> SyncResult<()> {
        ping(&self.pool, ErrorKind::SourceConnectionFailed).await
    }
}

impl SourceDatabase for PgSourceDatabase {
    async fn get_columns(&self, table: &TableName) -> SyncResult<Vec<ColumnDescriptor>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|err| pool_error(ErrorKind::SourceConnectionFailed, err))?;

        let rows = client
            .query(GET_COLUMNS_QUERY, &[&table.schema, &table.name])
            .await?;

        rows.iter()
            .map(|row| -> SyncResult<ColumnDescriptor> {
                let is_nullable: String = row.try_get(5)?;

                Ok(ColumnDescriptor {
                    name: row.try_get(0)?,
                    data_type: row.try_get(1)?,
                    character_length: row.try_get(2)?,
                    numeric_precision: row.try_get(3)?,
                    numeric_scale: row.try_get(4)?,
                    nullable: is_nullable.eq_ignore_ascii_case("YES"),
                })
            })
            .collect()
    }

    async fn fetch_rows(&self, statement: &SelectStatement) -> SyncResult<Vec<TableRow>> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|err| pool_error(ErrorKind::SourceConnectionFailed, err))?;

        let sql = select_sql(statement);
        debug!(%sql, "fetching source rows");
        let rows = client.query(&sql, &[]).await?;

        rows.iter().map(table_row_from_row).collect()
    }
}

/// Target database reached over the PostgreSQL protocol.
#[derive(Debug, Clone)]
pub struct PgTargetDatabase {
    pool: Pool,
}

impl PgTargetDatabase {
    pub fn new(config: &DatabaseConfig) -> SyncResult<Self> {
        let pool = connect_pool(config, ErrorKind::TargetConnectionFailed)?;

        Ok(Self { pool })
    }

    /// Checks that a connection to the target can be established.
    pub async fn ping(&self) -> SyncResult<()> {
        ping(&self.pool, ErrorKind::TargetConnectionFailed).await
    }
}

impl TargetDatabase for PgTargetDatabase {
    async fn table_exists(&self, table: &TableName) -> SyncResult<bool> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|err| pool_error(ErrorKind::TargetConnectionFailed, err))?;

        let row = client
            .query_one(TABLE_EXISTS_QUERY, &[&table.schema, &table.name])
            .await?;

        let exists: bool = row.try_get(0)?;

        Ok(exists)
    }

    async fn create_table(&self, statement: &CreateTableStatement) -> SyncResult<()> {
        let client = self
            .pool
            .get()
            .await
            .map_err(|err| pool_error(ErrorKind::TargetConnectionFailed, err))?;

        debug!(sql = %statement.sql, "creating target table");
        client.batch_execute(&statement.sql).await?;

        Ok(())
    }

    async fn replace_rows(&self, statement: &LoadStatement, rows: Vec<TableRow>) -> SyncResult<u64> {
        let mut client = self
            .pool
            .get()
            .await
            .map_err(|err| pool_error(ErrorKind::TargetConnectionFailed, err))?;

        // Dropping the transaction without committing rolls it back, which also covers cancellation.
        let transaction = client.transaction().await?;
        transaction.batch_execute(&statement.truncate_sql).await?;

        let insert = transaction.prepare(&statement.insert_sql).await?;
        let mut written = 0;
        for row in &rows {
            let params: Vec<&(dyn ToSql + Sync)> = row
                .values
                .iter()
                .map(|cell| cell as &(dyn ToSql + Sync))
                .collect();
            written += transaction.execute(&insert, &params).await?;
        }

        transaction.commit().await?;

        Ok(written)
    }
}
