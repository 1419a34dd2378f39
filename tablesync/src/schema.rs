use std::fmt;

use crate::bail;
use crate::error::{ErrorKind, SyncResult};

/// A fully qualified table name.
#[derive(Debug, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TableName {
    /// The schema name containing the table
    pub schema: String,
    /// The name of the table within the schema
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> TableName {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Parses a configured table identifier.
    ///
    /// `schema.table` is split on the dot, a bare `table` is placed into `default_schema`.
    /// Surrounding whitespace of each segment is ignored.
    pub fn parse(identifier: &str, default_schema: &str) -> SyncResult<TableName> {
        let segments: Vec<&str> = identifier.split('.').map(str::trim).collect();

        match segments.as_slice() {
            [name] if !name.is_empty() => Ok(TableName::new(default_schema, *name)),
            [schema, name] if !schema.is_empty() && !name.is_empty() => {
                Ok(TableName::new(*schema, *name))
            }
            _ => bail!(
                ErrorKind::ConfigurationError,
                "Invalid table identifier",
                format!("'{identifier}' is not of the form [schema.]table")
            ),
        }
    }

    /// Returns the table name as a quoted `"schema"."table"` identifier.
    pub fn as_quoted_identifier(&self) -> String {
        let quoted_schema = quote_identifier(&self.schema);
        let quoted_name = quote_identifier(&self.name);

        format!("{quoted_schema}.{quoted_name}")
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{0}.{1}", self.schema, self.name))
    }
}

/// Wraps `identifier` in double quotes, doubling any embedded double quote.
///
/// Identifiers are always quoted, so reserved words and mixed-case names keep their meaning.
pub fn quote_identifier(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('"');
    for c in identifier.chars() {
        if c == '"' {
            quoted.push('"');
        }
        quoted.push(c);
    }
    quoted.push('"');

    quoted
}

/// A column as reported by the source catalog.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ColumnDescriptor {
    /// The name of the column
    pub name: String,
    /// The source-native type name, e.g. `nvarchar` or `character varying`
    pub data_type: String,
    /// Maximum character length, `None` or non-positive when unbounded
    pub character_length: Option<i32>,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,
    /// Whether the column can contain NULL values
    pub nullable: bool,
}

impl ColumnDescriptor {
    /// Creates a nullable column of `data_type` without length, precision or scale.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> ColumnDescriptor {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            character_length: None,
            numeric_precision: None,
            numeric_scale: None,
            nullable: true,
        }
    }

    pub fn with_length(mut self, length: i32) -> Self {
        self.character_length = Some(length);
        self
    }

    pub fn with_precision(mut self, precision: i32, scale: i32) -> Self {
        self.numeric_precision = Some(precision);
        self.numeric_scale = Some(scale);
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Narrows `columns` to the ones named in `allow_list`, compared case-insensitively.
///
/// The catalog order of `columns` is preserved and names in the allow-list that match no column
/// are ignored. Without an allow-list every column is kept.
pub fn project_columns(
    columns: Vec<ColumnDescriptor>,
    allow_list: Option<&[String]>,
) -> Vec<ColumnDescriptor> {
    let Some(allow_list) = allow_list else {
        return columns;
    };

    columns
        .into_iter()
        .filter(|column| {
            allow_list
                .iter()
                .any(|allowed| allowed.trim().eq_ignore_ascii_case(&column.name))
        })
        .collect()
}
