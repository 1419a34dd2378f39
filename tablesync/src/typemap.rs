//! Translation of source column types into target column types.
//!
//! The lookup is keyed by the lower-cased source type name and covers both SQL Server type names
//! (`nvarchar`, `datetime2`, `uniqueidentifier`, ...) and the names PostgreSQL reports through
//! `information_schema` (`character varying`, `timestamp without time zone`, ...). Unknown types
//! fall back to [`FALLBACK_TYPE`], so every source column maps to some target type.

use crate::schema::ColumnDescriptor;

/// Target type used for source types without a dedicated mapping.
pub const FALLBACK_TYPE: &str = "TEXT";

/// Longest length PostgreSQL accepts for `VARCHAR(n)`.
const MAX_VARCHAR_LENGTH: i32 = 10_485_760;

enum TargetType {
    Fixed(&'static str),
    Numeric,
    Char,
    VarChar,
}

fn lookup(source_type: &str) -> Option<TargetType> {
    use TargetType::*;

    let target = match source_type {
        "int" | "integer" | "int4" => Fixed("INTEGER"),
        "bigint" | "int8" => Fixed("BIGINT"),
        "smallint" | "tinyint" | "int2" => Fixed("SMALLINT"),
        "bit" | "boolean" | "bool" => Fixed("BOOLEAN"),
        "decimal" | "numeric" => Numeric,
        "money" | "smallmoney" => Fixed("NUMERIC(19,4)"),
        "float" | "double precision" | "float8" => Fixed("DOUBLE PRECISION"),
        "real" | "float4" => Fixed("REAL"),
        "date" => Fixed("DATE"),
        "datetime" | "datetime2" | "smalldatetime" | "timestamp without time zone"
        | "timestamp" => Fixed("TIMESTAMP"),
        "datetimeoffset" | "timestamp with time zone" | "timestamptz" => Fixed("TIMESTAMPTZ"),
        "time" | "time without time zone" => Fixed("TIME"),
        "char" | "nchar" | "character" | "bpchar" => Char,
        "varchar" | "nvarchar" | "character varying" => VarChar,
        "text" | "ntext" => Fixed("TEXT"),
        "uniqueidentifier" | "uuid" => Fixed("UUID"),
        "binary" | "varbinary" | "image" | "bytea" => Fixed("BYTEA"),
        "xml" => Fixed("XML"),
        "json" => Fixed("JSON"),
        "jsonb" => Fixed("JSONB"),
        _ => return None,
    };

    Some(target)
}

/// Returns the target column type for `column`.
///
/// Parametrized types carry the source length, precision and scale forward when the catalog
/// reports them and fall back to their unconstrained variant otherwise.
pub fn map_column_type(column: &ColumnDescriptor) -> String {
    let source_type = column.data_type.trim().to_lowercase();

    let Some(target) = lookup(&source_type) else {
        return FALLBACK_TYPE.to_string();
    };

    match target {
        TargetType::Fixed(name) => name.to_string(),
        TargetType::Numeric => match column.numeric_precision {
            Some(precision) if precision > 0 => {
                let scale = column.numeric_scale.unwrap_or(0).max(0);
                format!("NUMERIC({precision},{scale})")
            }
            _ => "NUMERIC".to_string(),
        },
        TargetType::Char => match column.character_length {
            Some(length) if length > 0 => format!("CHAR({length})"),
            _ => "BPCHAR".to_string(),
        },
        TargetType::VarChar => match column.character_length {
            Some(length) if length > 0 && length <= MAX_VARCHAR_LENGTH => {
                format!("VARCHAR({length})")
            }
            _ => "TEXT".to_string(),
        },
    }
}
