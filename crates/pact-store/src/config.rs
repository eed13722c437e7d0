//! Store configuration from the process environment.

use pact_core::{Error, Result};

/// Connection settings for the backing document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Connection string.
    pub connection: String,
    /// Database name.
    pub database: String,
}

impl StoreConfig {
    /// Environment variable holding the connection string.
    pub const CONNECTION_VAR: &'static str = "CoreDatabase";
    /// Environment variable holding the database name.
    pub const DATABASE_VAR: &'static str = "CoreDatabaseName";

    /// Explicit settings, for tests and tooling.
    pub fn new(connection: impl Into<String>, database: impl Into<String>) -> Self {
        Self { connection: connection.into(), database: database.into() }
    }

    /// Read settings from the environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            connection: require(Self::CONNECTION_VAR)?,
            database: require(Self::DATABASE_VAR)?,
        })
    }
}

fn require(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::invalid_state(format!("environment variable {var} is not set"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_settings() {
        let config = StoreConfig::new("AccountEndpoint=https://local;AccountKey=key", "core");
        assert_eq!(config.database, "core");
    }

    #[test]
    fn missing_variables_are_rejected() {
        // The test environment does not define the variables.
        std::env::remove_var(StoreConfig::CONNECTION_VAR);
        std::env::remove_var(StoreConfig::DATABASE_VAR);
        assert!(StoreConfig::from_env().is_err());
    }
}
