use std::fmt;

use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tiberius::{AuthMethod, Config as TiberiusConnectOptions};
use tokio_postgres::Config as TokioPgConnectOptions;

use crate::SerializableSecretString;
use crate::shared::ValidationError;

/// Default number of pooled connections per database.
pub const DEFAULT_MAX_POOL_SIZE: usize = 10;

fn default_max_pool_size() -> usize {
    DEFAULT_MAX_POOL_SIZE
}

/// Engine of a configured database, selected by its `type` key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    /// Microsoft SQL Server, reached over TDS.
    Mssql,
    #[default]
    Postgresql,
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseKind::Mssql => write!(f, "mssql"),
            DatabaseKind::Postgresql => write!(f, "postgresql"),
        }
    }
}

/// Connection settings for the source or the target database.
///
/// Both databases are reached through a connection pool which is shared by every table worker,
/// the pool size is therefore the only bound on concurrent database usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Engine of the database, `postgresql` when omitted.
    #[serde(rename = "type", default)]
    pub kind: DatabaseKind,
    /// Hostname or IP address of the database server.
    pub host: String,
    /// Port the database server listens on.
    pub port: u16,
    /// Name of the database to connect to.
    pub name: String,
    /// Username used to authenticate.
    pub username: String,
    /// Password for the user, redacted in debug output.
    #[serde(default)]
    pub password: Option<SerializableSecretString>,
    /// Schema applied to bare table identifiers.
    ///
    /// When unset, the service picks `dbo` for the source and `public` for the target.
    #[serde(default)]
    pub default_schema: Option<String>,
    /// Maximum number of pooled connections.
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,
    /// Accepts any server certificate on encrypted SQL Server connections.
    #[serde(default)]
    pub trust_server_certificate: bool,
}

impl DatabaseConfig {
    /// Validates the [`DatabaseConfig`], `role` names the database in error messages.
    pub fn validate(&self, role: &'static str) -> Result<(), ValidationError> {
        if self.max_pool_size == 0 {
            return Err(ValidationError::EmptyPool(role));
        }

        if self.host.is_empty() {
            return Err(ValidationError::InvalidConfig(format!(
                "the {role} database host cannot be empty"
            )));
        }

        Ok(())
    }

    /// Returns the configured default schema or `fallback` when none was set.
    pub fn default_schema_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        match self.default_schema.as_deref() {
            Some(schema) if !schema.is_empty() => schema,
            _ => fallback,
        }
    }
}

/// Conversion of a [`DatabaseConfig`] into driver specific connect options.
pub trait IntoConnectOptions<Output> {
    /// Creates connection options without selecting a database.
    fn without_db(&self) -> Output;

    /// Creates connection options for the configured database.
    fn with_db(&self) -> Output;
}

impl IntoConnectOptions<TokioPgConnectOptions> for DatabaseConfig {
    fn without_db(&self) -> TokioPgConnectOptions {
        let mut config = TokioPgConnectOptions::new();
        config
            .host(self.host.clone())
            .port(self.port)
            .user(self.username.clone());

        if let Some(password) = &self.password {
            config.password(password.expose_secret());
        }

        config
    }

    fn with_db(&self) -> TokioPgConnectOptions {
        let mut options: TokioPgConnectOptions = self.without_db();
        options.dbname(self.name.clone());
        options
    }
}

impl IntoConnectOptions<TiberiusConnectOptions> for DatabaseConfig {
    fn without_db(&self) -> TiberiusConnectOptions {
        let mut config = TiberiusConnectOptions::new();
        config.host(&self.host);
        config.port(self.port);

        let password = self
            .password
            .as_ref()
            .map(|password| password.expose_secret().as_str())
            .unwrap_or_default();
        config.authentication(AuthMethod::sql_server(&self.username, password));

        if self.trust_server_certificate {
            config.trust_cert();
        }

        config
    }

    fn with_db(&self) -> TiberiusConnectOptions {
        let mut options: TiberiusConnectOptions = self.without_db();
        options.database(&self.name);
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database_config() -> DatabaseConfig {
        DatabaseConfig {
            kind: DatabaseKind::Postgresql,
            host: "localhost".to_string(),
            port: 5432,
            name: "warehouse".to_string(),
            username: "sync".to_string(),
            password: Some("secret".into()),
            default_schema: None,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            trust_server_certificate: false,
        }
    }

    #[test]
    fn connect_options_carry_database_name() {
        let options: TokioPgConnectOptions = database_config().with_db();

        assert_eq!(options.get_dbname(), Some("warehouse"));
        assert_eq!(options.get_user(), Some("sync"));
        assert_eq!(options.get_ports(), &[5432]);
    }

    #[test]
    fn sql_server_options_address_the_configured_host() {
        let mut config = database_config();
        config.kind = DatabaseKind::Mssql;
        config.host = "mssql.internal".to_string();
        config.port = 1433;

        let options: TiberiusConnectOptions = config.with_db();

        assert_eq!(options.get_addr(), "mssql.internal:1433");
    }

    #[test]
    fn empty_default_schema_falls_back() {
        let mut config = database_config();
        assert_eq!(config.default_schema_or("dbo"), "dbo");

        config.default_schema = Some(String::new());
        assert_eq!(config.default_schema_or("dbo"), "dbo");

        config.default_schema = Some("sales".to_string());
        assert_eq!(config.default_schema_or("dbo"), "sales");
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let mut config = database_config();
        config.max_pool_size = 0;

        assert_eq!(
            config.validate("source"),
            Err(ValidationError::EmptyPool("source"))
        );
    }
}
