//! Configuration loaded from environment variables.

use std::env;

/// Runtime configuration for the portal CLI.
#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string.
    pub database_url: String,
    /// Institutional email domain, without the leading `@`.
    pub email_domain: String,
    pub max_connections: u32,
    /// Administrator recorded in the activity log for mutating commands.
    pub actor_email: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Description | Default |
    /// |----------|-------------|---------|
    /// | `DATABASE_URL` | Postgres connection string | (required) |
    /// | `PORTAL_EMAIL_DOMAIN` | Institutional email domain | `escola.pr.gov.br` |
    /// | `PORTAL_DB_MAX_CONNECTIONS` | Pool size | `5` |
    /// | `PORTAL_ACTOR_EMAIL` | Admin identity for the activity log | (unset) |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|value| !value.trim().is_empty())
            .ok_or(ConfigError::MissingDatabaseUrl)?;

        let email_domain = lookup("PORTAL_EMAIL_DOMAIN")
            .map(|value| value.trim().trim_start_matches('@').to_lowercase())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "escola.pr.gov.br".to_string());

        let max_connections = match lookup("PORTAL_DB_MAX_CONNECTIONS") {
            Some(value) => value
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidMaxConnections(value))?,
            None => 5,
        };

        let actor_email = lookup("PORTAL_ACTOR_EMAIL")
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty());

        Ok(Self {
            database_url,
            email_domain,
            max_connections,
            actor_email,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL must be set to a Postgres instance")]
    MissingDatabaseUrl,

    #[error("PORTAL_DB_MAX_CONNECTIONS must be a positive integer, got {0:?}")]
    InvalidMaxConnections(String),
}
