//! Source database reached over TDS, the wire protocol of Microsoft SQL Server.

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use deadpool::managed::{self, Metrics, PoolError, RecycleResult};
use rust_decimal::Decimal;
use tablesync_config::shared::{DatabaseConfig, IntoConnectOptions};
use tiberius::{Client, ColumnData, Config, FromSql, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use crate::database::base::SourceDatabase;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::schema::{ColumnDescriptor, TableName};
use crate::sql::SelectStatement;
use crate::sync_error;
use crate::types::{Cell, TableRow};

const GET_COLUMNS_QUERY: &str = r#"
    SELECT COLUMN_NAME,
        DATA_TYPE,
        CAST(CHARACTER_MAXIMUM_LENGTH AS INT),
        CAST(NUMERIC_PRECISION AS INT),
        CAST(NUMERIC_SCALE AS INT),
        IS_NULLABLE
    FROM INFORMATION_SCHEMA.COLUMNS
    WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2
    ORDER BY ORDINAL_POSITION
"#;

/// Catalog type names the driver decodes natively, any other column is read as `NVARCHAR(MAX)`.
const DECODED_TYPES: &[&str] = &[
    "bit",
    "tinyint",
    "smallint",
    "int",
    "bigint",
    "real",
    "float",
    "decimal",
    "numeric",
    "money",
    "smallmoney",
    "char",
    "varchar",
    "text",
    "nchar",
    "nvarchar",
    "ntext",
    "uniqueidentifier",
    "binary",
    "varbinary",
    "image",
    "timestamp",
    "rowversion",
    "xml",
    "date",
    "time",
    "datetime",
    "datetime2",
    "smalldatetime",
    "datetimeoffset",
];

pub type MssqlClient = Client<Compat<TcpStream>>;

pub type MssqlPool = managed::Pool<MssqlManager>;

/// Opens the connections of a [`MssqlPool`].
#[derive(Debug)]
pub struct MssqlManager {
    config: Config,
}

async fn connect(config: Config) -> Result<MssqlClient, tiberius::error::Error> {
    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true)?;

    match Client::connect(config.clone(), tcp.compat_write()).await {
        // Azure SQL hands the login over to the node serving the database.
        Err(tiberius::error::Error::Routing { host, port }) => {
            let mut config = config;
            config.host(&host);
            config.port(port);

            let tcp = TcpStream::connect(config.get_addr()).await?;
            tcp.set_nodelay(true)?;
            Client::connect(config, tcp.compat_write()).await
        }
        result => result,
    }
}

impl managed::Manager for MssqlManager {
    type Type = MssqlClient;
    type Error = tiberius::error::Error;

    async fn create(&self) -> Result<MssqlClient, tiberius::error::Error> {
        connect(self.config.clone()).await
    }

    async fn recycle(
        &self,
        client: &mut MssqlClient,
        _metrics: &Metrics,
    ) -> RecycleResult<tiberius::error::Error> {
        client.simple_query("SELECT 1").await?.into_row().await?;

        Ok(())
    }
}

/// Builds a connection pool for the SQL Server described by `config`.
///
/// No connection is opened until the pool is first used.
pub fn connect_pool(config: &DatabaseConfig) -> SyncResult<MssqlPool> {
    let options: Config = config.with_db();

    managed::Pool::builder(MssqlManager { config: options })
        .max_size(config.max_pool_size)
        .build()
        .map_err(|err| {
            sync_error!(
                ErrorKind::SourceConnectionFailed,
                "Connection pool creation failed",
                err
            )
        })
}

fn pool_error(err: PoolError<tiberius::error::Error>) -> SyncError {
    sync_error!(
        ErrorKind::SourceConnectionFailed,
        "Could not acquire a pooled connection",
        err
    )
}

/// Wraps `identifier` in brackets, doubling any embedded closing bracket.
fn quote_identifier(identifier: &str) -> String {
    format!("[{}]", identifier.replace(']', "]]"))
}

fn has_decoder(data_type: &str) -> bool {
    DECODED_TYPES
        .iter()
        .any(|decoded| decoded.eq_ignore_ascii_case(data_type.trim()))
}

fn project_column(column: &ColumnDescriptor) -> String {
    let quoted = quote_identifier(&column.name);
    if has_decoder(&column.data_type) {
        quoted
    } else {
        format!("CAST({quoted} AS NVARCHAR(MAX)) AS {quoted}")
    }
}

fn select_sql(statement: &SelectStatement) -> String {
    let table = format!(
        "{}.{}",
        quote_identifier(&statement.table.schema),
        quote_identifier(&statement.table.name)
    );

    statement.render(&table, project_column)
}

/// Renders an unscaled `value` with `scale` decimal digits.
fn numeric_text(value: i128, scale: u8) -> String {
    let sign = if value < 0 { "-" } else { "" };
    let digits = value.unsigned_abs().to_string();
    let scale = usize::from(scale);
    if scale == 0 {
        return format!("{sign}{digits}");
    }

    let padded = format!("{digits:0>width$}", width = scale + 1);
    let (integral, fractional) = padded.split_at(padded.len() - scale);

    format!("{sign}{integral}.{fractional}")
}

/// Decimals keep up to 28 digits, wider `decimal(38, s)` values are carried as text.
fn numeric_cell(value: i128, scale: u8) -> Cell {
    match Decimal::try_from_i128_with_scale(value, u32::from(scale)) {
        Ok(decimal) => Cell::Numeric(decimal),
        Err(_) => Cell::String(numeric_text(value, scale)),
    }
}

fn cell_from_column_data(data: ColumnData<'static>) -> SyncResult<Cell> {
    let cell = match data {
        ColumnData::U8(value) => value.map(i16::from).into(),
        ColumnData::I16(value) => value.into(),
        ColumnData::I32(value) => value.into(),
        ColumnData::I64(value) => value.into(),
        ColumnData::F32(value) => value.into(),
        ColumnData::F64(value) => value.into(),
        ColumnData::Bit(value) => value.into(),
        ColumnData::String(value) => value.map(Cow::into_owned).into(),
        ColumnData::Guid(value) => value.into(),
        ColumnData::Binary(value) => value.map(Cow::into_owned).into(),
        ColumnData::Numeric(value) => value
            .map(|numeric| numeric_cell(numeric.value(), numeric.scale()))
            .into(),
        ColumnData::Xml(value) => value.map(|xml| xml.into_owned().into_string()).into(),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(&data)?.into()
        }
        ColumnData::Date(_) => NaiveDate::from_sql(&data)?.into(),
        ColumnData::Time(_) => NaiveTime::from_sql(&data)?.into(),
        ColumnData::DateTimeOffset(_) => DateTime::<FixedOffset>::from_sql(&data)?
            .map(|value| value.with_timezone(&Utc))
            .into(),
    };

    Ok(cell)
}

fn table_row_from_row(row: Row) -> SyncResult<TableRow> {
    let values = row
        .into_iter()
        .map(cell_from_column_data)
        .collect::<SyncResult<Vec<_>>>()?;

    Ok(TableRow::new(values))
}

fn column_from_row(row: &Row) -> SyncResult<ColumnDescriptor> {
    let text = |index: usize, column: &'static str| -> SyncResult<String> {
        row.try_get::<&str, _>(index)?
            .map(str::to_string)
            .ok_or_else(|| {
                sync_error!(
                    ErrorKind::ConversionError,
                    "Missing catalog value",
                    column
                )
            })
    };

    Ok(ColumnDescriptor {
        name: text(0, "COLUMN_NAME")?,
        data_type: text(1, "DATA_TYPE")?,
        character_length: row.try_get::<i32, _>(2)?,
        numeric_precision: row.try_get::<i32, _>(3)?,
        numeric_scale: row.try_get::<i32, _>(4)?,
        nullable: text(5, "IS_NULLABLE")?.eq_ignore_ascii_case("YES"),
    })
}

/// Source database reached over TDS.
#[derive(Clone)]
pub struct MssqlSourceDatabase {
    pool: MssqlPool,
}

impl MssqlSourceDatabase {
    pub fn new(config: &DatabaseConfig) -> SyncResult<Self> {
        let pool = connect_pool(config)?;

        Ok(Self { pool })
    }

    /// Checks that a connection to the source can be established.
    pub async fn ping(&self) -> SyncResult<()> {
        let mut client = self.pool.get().await.map_err(pool_error)?;
        client
            .simple_query("SELECT 1")
            .await?
            .into_row()
            .await
            .map_err(|err| {
                sync_error!(ErrorKind::SourceConnectionFailed, "Database ping failed", err)
            })?;

        Ok(())
    }
}

impl fmt::Debug for MssqlSourceDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MssqlSourceDatabase")
            .field("pool", &self.pool.status())
            .finish()
    }
}

impl SourceDatabase for MssqlSourceDatabase {
    async fn get_columns(&self, table: &TableName) -> SyncResult<Vec<ColumnDescriptor>> {
        let mut client = self.pool.get().await.map_err(pool_error)?;

        let rows = client
            .query(
                GET_COLUMNS_QUERY,
                &[&table.schema.as_str(), &table.name.as_str()],
            )
            .await?
            .into_first_result()
            .await?;

        rows.iter().map(column_from_row).collect()
    }

    async fn fetch_rows(&self, statement: &SelectStatement) -> SyncResult<Vec<TableRow>> {
        let mut client = self.pool.get().await.map_err(pool_error)?;

        let sql = select_sql(statement);
        debug!(%sql, "fetching source rows");
        let rows = client.simple_query(sql).await?.into_first_result().await?;

        rows.into_iter().map(table_row_from_row).collect()
    }
}
