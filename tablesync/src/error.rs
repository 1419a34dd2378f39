use std::error;
use std::fmt;

use tablesync_config::shared::ValidationError;

/// Convenient result type for sync operations using [`SyncError`] as the error type.
pub type SyncResult<T> = Result<T, SyncError>;

/// Main error type of the sync service.
///
/// A [`SyncError`] is either a single error with a static description and an optional dynamic
/// detail, or an aggregate of several errors.
#[derive(Debug, Clone)]
pub struct SyncError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Error with kind and static description
    WithDescription(ErrorKind, &'static str),
    /// Error with kind, static description, and dynamic detail
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    /// Multiple aggregated errors
    Many(Vec<SyncError>),
}

/// Categories of errors raised while synchronizing tables.
///
/// The step kinds ([`ErrorKind::IntrospectionError`], [`ErrorKind::DdlError`],
/// [`ErrorKind::FetchError`], [`ErrorKind::LoadError`]) are attached by the sync engine to whatever
/// failed inside the corresponding step, the remaining kinds describe the underlying cause.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Configuration Errors
    ConfigurationError,

    // Sync Step Errors
    IntrospectionError,
    DdlError,
    FetchError,
    LoadError,
    TimeoutError,

    // Coordination Errors
    LookupError,

    // Database Errors
    SourceConnectionFailed,
    TargetConnectionFailed,
    QueryFailed,
    ConversionError,

    // State & Workflow Errors
    InvalidState,
    WorkerPanic,

    // Unknown / Uncategorized
    Unknown,
}

impl SyncError {
    /// Creates a [`SyncError`] containing multiple aggregated errors.
    pub fn many(errors: Vec<SyncError>) -> SyncError {
        SyncError {
            repr: ErrorRepr::Many(errors),
        }
    }

    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
            ErrorRepr::Many(ref errors) => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => vec![kind],
            ErrorRepr::Many(ref errors) => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns the detailed error information if available.
    ///
    /// For multiple errors, returns the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::Many(ref errors) => errors.iter().find_map(|e| e.detail()),
            _ => None,
        }
    }
}

impl PartialEq for SyncError {
    fn eq(&self, other: &SyncError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::WithDescription(kind_a, _), ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            (ErrorRepr::Many(errors_a), ErrorRepr::Many(errors_b)) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)
            }
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)?;
                f.write_str(" -> ")?;
                detail.fmt(f)
            }
            ErrorRepr::Many(ref errors) => {
                if errors.is_empty() {
                    write!(f, "Multiple errors occurred (empty)")?;
                } else if errors.len() == 1 {
                    errors[0].fmt(f)?;
                } else {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl error::Error for SyncError {}

/// Creates a [`SyncError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for SyncError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> SyncError {
        SyncError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

/// Creates a [`SyncError`] from an error kind, static description, and dynamic detail.
impl From<(ErrorKind, &'static str, String)> for SyncError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> SyncError {
        SyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

/// Creates a [`SyncError`] from a vector of errors for aggregation.
impl<E> From<Vec<E>> for SyncError
where
    E: Into<SyncError>,
{
    fn from(errors: Vec<E>) -> SyncError {
        SyncError {
            repr: ErrorRepr::Many(errors.into_iter().map(Into::into).collect()),
        }
    }
}

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> SyncError {
        SyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::ConfigurationError,
                "Invalid configuration",
                err.to_string(),
            ),
        }
    }
}

impl From<std::num::TryFromIntError> for SyncError {
    fn from(err: std::num::TryFromIntError) -> SyncError {
        SyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(
                ErrorKind::ConversionError,
                "Integer conversion failed",
                err.to_string(),
            ),
        }
    }
}

/// Converts [`tokio_postgres::Error`] to [`SyncError`] based on the SQLSTATE of the error.
///
/// Errors without a SQLSTATE are raised by the client itself, mostly because the connection broke.
impl From<tokio_postgres::Error> for SyncError {
    fn from(err: tokio_postgres::Error) -> SyncError {
        let (kind, description) = match err.code() {
            Some(sqlstate) => {
                use tokio_postgres::error::SqlState;

                match *sqlstate {
                    // Connection errors (08xxx)
                    SqlState::CONNECTION_EXCEPTION
                    | SqlState::CONNECTION_DOES_NOT_EXIST
                    | SqlState::CONNECTION_FAILURE
                    | SqlState::SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION
                    | SqlState::SQLSERVER_REJECTED_ESTABLISHMENT_OF_SQLCONNECTION
                    | SqlState::TOO_MANY_CONNECTIONS
                    | SqlState::ADMIN_SHUTDOWN
                    | SqlState::CANNOT_CONNECT_NOW => {
                        (ErrorKind::QueryFailed, "PostgreSQL connection error")
                    }

                    // Data conversion errors (22xxx)
                    SqlState::DATA_EXCEPTION
                    | SqlState::INVALID_TEXT_REPRESENTATION
                    | SqlState::INVALID_DATETIME_FORMAT
                    | SqlState::NUMERIC_VALUE_OUT_OF_RANGE
                    | SqlState::STRING_DATA_RIGHT_TRUNCATION
                    | SqlState::DATETIME_FIELD_OVERFLOW => (
                        ErrorKind::ConversionError,
                        "PostgreSQL data conversion error",
                    ),

                    // Data integrity violations (23xxx)
                    SqlState::INTEGRITY_CONSTRAINT_VIOLATION
                    | SqlState::NOT_NULL_VIOLATION
                    | SqlState::FOREIGN_KEY_VIOLATION
                    | SqlState::UNIQUE_VIOLATION
                    | SqlState::CHECK_VIOLATION => {
                        (ErrorKind::QueryFailed, "PostgreSQL constraint violation")
                    }

                    // Schema/object errors (42xxx)
                    SqlState::UNDEFINED_TABLE
                    | SqlState::UNDEFINED_COLUMN
                    | SqlState::UNDEFINED_SCHEMA
                    | SqlState::DUPLICATE_TABLE => {
                        (ErrorKind::QueryFailed, "PostgreSQL schema object error")
                    }
                    SqlState::SYNTAX_ERROR
                    | SqlState::SYNTAX_ERROR_OR_ACCESS_RULE_VIOLATION
                    | SqlState::INSUFFICIENT_PRIVILEGE => {
                        (ErrorKind::QueryFailed, "PostgreSQL syntax or access error")
                    }

                    // Transaction errors (40xxx, 25xxx)
                    SqlState::TRANSACTION_ROLLBACK
                    | SqlState::T_R_SERIALIZATION_FAILURE
                    | SqlState::T_R_DEADLOCK_DETECTED
                    | SqlState::IN_FAILED_SQL_TRANSACTION => {
                        (ErrorKind::InvalidState, "PostgreSQL transaction error")
                    }

                    SqlState::QUERY_CANCELED => {
                        (ErrorKind::TimeoutError, "PostgreSQL query canceled")
                    }

                    _ => (ErrorKind::QueryFailed, "PostgreSQL error"),
                }
            }
            None => (ErrorKind::QueryFailed, "PostgreSQL client error"),
        };

        SyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

/// Converts [`tiberius::error::Error`] to [`SyncError`] based on the failure class.
impl From<tiberius::error::Error> for SyncError {
    fn from(err: tiberius::error::Error) -> SyncError {
        use tiberius::error::Error;

        let (kind, description) = match &err {
            Error::Io { .. } | Error::Tls(_) | Error::Routing { .. } => {
                (ErrorKind::QueryFailed, "SQL Server connection error")
            }
            Error::Conversion(_)
            | Error::Encoding(_)
            | Error::Utf8
            | Error::Utf16
            | Error::ParseInt(_) => (
                ErrorKind::ConversionError,
                "SQL Server data conversion error",
            ),
            Error::Server(_) => (ErrorKind::QueryFailed, "SQL Server error"),
            _ => (ErrorKind::QueryFailed, "SQL Server client error"),
        };

        SyncError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, description, err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bail, sync_error};

    #[test]
    fn test_simple_error_creation() {
        let err = SyncError::from((ErrorKind::LookupError, "Unknown target table"));
        assert_eq!(err.kind(), ErrorKind::LookupError);
        assert_eq!(err.detail(), None);
        assert_eq!(err.kinds(), vec![ErrorKind::LookupError]);
    }

    #[test]
    fn test_error_with_detail() {
        let err = SyncError::from((
            ErrorKind::FetchError,
            "Source fetch failed",
            "dbo.Users -> public.users: invalid column name".to_string(),
        ));
        assert_eq!(err.kind(), ErrorKind::FetchError);
        assert_eq!(
            err.detail(),
            Some("dbo.Users -> public.users: invalid column name")
        );
        assert_eq!(
            err.to_string(),
            "FetchError: Source fetch failed -> dbo.Users -> public.users: invalid column name"
        );
    }

    #[test]
    fn test_multiple_errors() {
        let multi_err = SyncError::many(vec![
            SyncError::from((ErrorKind::WorkerPanic, "Worker panicked")),
            SyncError::from((ErrorKind::LoadError, "Target load failed")),
        ]);

        assert_eq!(multi_err.kind(), ErrorKind::WorkerPanic);
        assert_eq!(
            multi_err.kinds(),
            vec![ErrorKind::WorkerPanic, ErrorKind::LoadError]
        );
        assert!(
            multi_err
                .to_string()
                .starts_with("Multiple errors occurred (2 total):")
        );
    }

    #[test]
    fn test_empty_many_is_unknown() {
        let err = SyncError::many(vec![]);
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(err.kinds().is_empty());
    }

    #[test]
    fn test_validation_error_conversion() {
        let err = SyncError::from(ValidationError::InvalidTableIdentifier("a.b.c".to_string()));
        assert_eq!(err.kind(), ErrorKind::ConfigurationError);
        assert!(err.detail().unwrap().contains("a.b.c"));
    }

    #[test]
    fn test_macros() {
        fn fails() -> SyncResult<()> {
            bail!(
                ErrorKind::InvalidState,
                "Worker is not running",
                format!("worker {}", "public.users")
            );
        }

        let err = sync_error!(ErrorKind::DdlError, "Target table creation failed");
        assert_eq!(err.kind(), ErrorKind::DdlError);

        let err = fails().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(err.detail(), Some("worker public.users"));
    }
}
