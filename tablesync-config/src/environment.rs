use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Environment variable naming the deployment the service runs in.
const APP_ENVIRONMENT_ENV_NAME: &str = "APP_ENVIRONMENT";

/// Deployment the service runs in.
///
/// Picks the `configuration/{environment}.yaml` overlay and decides whether logs are written as
/// JSON into rotated files or printed to the terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Environment {
    #[default]
    Prod,
    Staging,
    Dev,
}

/// Returned for an `APP_ENVIRONMENT` value that names no [`Environment`].
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown environment `{0}`, expected one of prod, staging or dev")]
pub struct UnknownEnvironment(pub String);

impl Environment {
    /// Reads `APP_ENVIRONMENT`, an unset variable selects [`Environment::Prod`].
    pub fn load() -> Result<Environment, UnknownEnvironment> {
        match std::env::var(APP_ENVIRONMENT_ENV_NAME) {
            Ok(name) => name.parse(),
            Err(_) => Ok(Environment::default()),
        }
    }

    /// Overrides `APP_ENVIRONMENT` for the current process.
    ///
    /// Must run before other threads read the environment, i.e. at the start of `main` or a test.
    pub fn set(&self) {
        unsafe { std::env::set_var(APP_ENVIRONMENT_ENV_NAME, self.as_str()) }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Prod => "prod",
            Environment::Staging => "staging",
            Environment::Dev => "dev",
        }
    }

    /// Staging is operated like production.
    pub fn is_prod(&self) -> bool {
        !matches!(self, Environment::Dev)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = UnknownEnvironment;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        [Environment::Prod, Environment::Staging, Environment::Dev]
            .into_iter()
            .find(|environment| environment.as_str().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| UnknownEnvironment(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_matched_case_insensitively() {
        assert_eq!("PROD".parse::<Environment>(), Ok(Environment::Prod));
        assert_eq!(" Staging".parse::<Environment>(), Ok(Environment::Staging));
        assert_eq!("dev".parse::<Environment>(), Ok(Environment::Dev));
        assert_eq!(
            "qa".parse::<Environment>(),
            Err(UnknownEnvironment("qa".to_string()))
        );
    }

    #[test]
    fn only_dev_logs_to_the_terminal() {
        assert!(Environment::Prod.is_prod());
        assert!(Environment::Staging.is_prod());
        assert!(!Environment::Dev.is_prod());
        assert_eq!(Environment::Dev.to_string(), "dev");
    }
}
