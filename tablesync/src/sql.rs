//! Statements issued by the sync engine.
//!
//! Each statement carries its rendered SQL next to the structured parts it was rendered from, so
//! database implementations can either execute the text or work with the parts directly.

use crate::schema::{ColumnDescriptor, TableName, quote_identifier};
use crate::typemap::map_column_type;

fn quoted_column_list(columns: &[ColumnDescriptor]) -> String {
    columns
        .iter()
        .map(|column| quote_identifier(&column.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Reads the projected columns of a source table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectStatement {
    pub table: TableName,
    pub columns: Vec<ColumnDescriptor>,
    /// Predicate inserted verbatim after `WHERE`.
    pub filter: Option<String>,
    pub sql: String,
}

impl SelectStatement {
    pub fn new(table: TableName, columns: Vec<ColumnDescriptor>, filter: Option<&str>) -> Self {
        let mut statement = Self {
            table,
            columns,
            filter: filter.map(str::to_string),
            sql: String::new(),
        };
        statement.sql = statement.render(&statement.table.as_quoted_identifier(), |column| {
            quote_identifier(&column.name)
        });

        statement
    }

    /// Renders the statement with a dialect specific table reference and column projection.
    ///
    /// Sources use this when they need to quote differently than [`SelectStatement::sql`] or
    /// have to convert some columns while reading them.
    pub fn render<F>(&self, quoted_table: &str, project: F) -> String
    where
        F: FnMut(&ColumnDescriptor) -> String,
    {
        let projection = self.columns.iter().map(project).collect::<Vec<_>>().join(", ");

        let mut sql = format!("SELECT {projection} FROM {quoted_table}");
        if let Some(filter) = &self.filter {
            sql.push_str(" WHERE ");
            sql.push_str(filter);
        }

        sql
    }
}

/// A column of a table created in the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// Creates a target table shaped after the projected source columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTableStatement {
    pub table: TableName,
    pub columns: Vec<TargetColumn>,
    pub sql: String,
}

impl CreateTableStatement {
    pub fn new(table: TableName, source_columns: &[ColumnDescriptor]) -> Self {
        let columns: Vec<TargetColumn> = source_columns
            .iter()
            .map(|column| TargetColumn {
                name: column.name.clone(),
                data_type: map_column_type(column),
                nullable: column.nullable,
            })
            .collect();

        let definitions = columns
            .iter()
            .map(|column| {
                let mut definition =
                    format!("{} {}", quote_identifier(&column.name), column.data_type);
                if !column.nullable {
                    definition.push_str(" NOT NULL");
                }
                definition
            })
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "CREATE TABLE {} ({definitions})",
            table.as_quoted_identifier()
        );

        Self {
            table,
            columns,
            sql,
        }
    }
}

/// Replaces the full content of a target table.
///
/// `truncate_sql` empties the table and `insert_sql` is executed once per row with the row values
/// bound to `$1..$n` in column order. Both run in one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadStatement {
    pub table: TableName,
    pub columns: Vec<String>,
    pub truncate_sql: String,
    pub insert_sql: String,
}

impl LoadStatement {
    pub fn new(table: TableName, columns: &[ColumnDescriptor]) -> Self {
        let quoted_table = table.as_quoted_identifier();
        let placeholders = (1..=columns.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");

        Self {
            truncate_sql: format!("TRUNCATE TABLE {quoted_table}"),
            insert_sql: format!(
                "INSERT INTO {quoted_table} ({}) VALUES ({placeholders})",
                quoted_column_list(columns)
            ),
            columns: columns.iter().map(|column| column.name.clone()).collect(),
            table,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_columns() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new("UserID", "int").not_null(),
            ColumnDescriptor::new("Username", "nvarchar").with_length(50),
            ColumnDescriptor::new("Order", "decimal").with_precision(10, 2),
        ]
    }

    #[test]
    fn select_quotes_identifiers_and_appends_filter_verbatim() {
        let statement = SelectStatement::new(
            TableName::new("dbo", "Users"),
            users_columns(),
            Some("IsActive = 1"),
        );

        assert_eq!(
            statement.sql,
            r#"SELECT "UserID", "Username", "Order" FROM "dbo"."Users" WHERE IsActive = 1"#
        );
    }

    #[test]
    fn select_without_filter_has_no_where_clause() {
        let statement =
            SelectStatement::new(TableName::new("dbo", "Users"), users_columns(), None);

        assert!(!statement.sql.contains("WHERE"));
    }

    #[test]
    fn render_applies_the_projection_to_every_column() {
        let statement = SelectStatement::new(
            TableName::new("dbo", "Users"),
            users_columns(),
            Some("IsActive = 1"),
        );

        let sql = statement.render("[dbo].[Users]", |column| format!("[{}]", column.name));

        assert_eq!(
            sql,
            "SELECT [UserID], [Username], [Order] FROM [dbo].[Users] WHERE IsActive = 1"
        );
    }

    #[test]
    fn create_table_maps_types_and_nullability() {
        let statement =
            CreateTableStatement::new(TableName::new("public", "users"), &users_columns());

        assert_eq!(
            statement.sql,
            r#"CREATE TABLE "public"."users" ("UserID" INTEGER NOT NULL, "Username" VARCHAR(50), "Order" NUMERIC(10,2))"#
        );
        assert_eq!(statement.columns[1].data_type, "VARCHAR(50)");
    }

    #[test]
    fn load_statements_bind_values_in_column_order() {
        let statement = LoadStatement::new(TableName::new("public", "users"), &users_columns());

        assert_eq!(statement.truncate_sql, r#"TRUNCATE TABLE "public"."users""#);
        assert_eq!(
            statement.insert_sql,
            r#"INSERT INTO "public"."users" ("UserID", "Username", "Order") VALUES ($1, $2, $3)"#
        );
        assert_eq!(statement.columns, vec!["UserID", "Username", "Order"]);
    }
}
