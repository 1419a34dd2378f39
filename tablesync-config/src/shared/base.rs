use thiserror::Error;

/// Errors that can occur during configuration validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A table entry has an empty source or target identifier.
    #[error("Table entry {index} has an empty `{field}` identifier")]
    EmptyTableIdentifier { index: usize, field: &'static str },

    /// A table identifier is neither `table` nor `schema.table`.
    #[error("Invalid table identifier `{0}`: expected `table` or `schema.table`")]
    InvalidTableIdentifier(String),

    /// A connection pool was configured without any connection.
    #[error("Invalid `max_pool_size` for the {0} database: must be greater than zero")]
    EmptyPool(&'static str),

    /// General configuration validation error.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
