//! Connection parameters for the Postgres backend.

use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use super::{bool_var, parse_var};
use crate::error::{Error, Result};

/// Either a full `url`, or discrete host/port/credential fields.
/// `url` wins when both are present.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PostgresConfig {
    #[serde(deserialize_with = "secret_opt")]
    pub url: Option<SecretString>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    #[serde(deserialize_with = "secret_opt")]
    pub password: Option<SecretString>,
    pub database: Option<String>,
    /// Require TLS.
    pub ssl: bool,
    pub max_connections: u32,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: None,
            port: None,
            user: None,
            password: None,
            database: None,
            ssl: false,
            max_connections: 10,
        }
    }
}

impl PostgresConfig {
    pub(crate) fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            url: std::env::var("DATABASE_URL").ok().map(SecretString::from),
            host: std::env::var("DATABASE_HOST").ok(),
            port: parse_var("DATABASE_PORT")?,
            user: std::env::var("DATABASE_USER").ok(),
            password: std::env::var("DATABASE_PASSWORD").ok().map(SecretString::from),
            database: std::env::var("DATABASE_NAME").ok(),
            ssl: bool_var("DATABASE_SSL")?.unwrap_or(defaults.ssl),
            max_connections: parse_var("DATABASE_MAX_CONNECTIONS")?
                .unwrap_or(defaults.max_connections),
        })
    }

    /// Build sqlx connect options. Fields left unset fall back to the
    /// standard `PG*` environment variables.
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        let mut options = match self.url {
            Some(ref url) => PgConnectOptions::from_str(url.expose_secret())
                .map_err(|e| Error::Config(format!("invalid database url: {e}")))?,
            None => {
                let mut options = PgConnectOptions::new();
                if let Some(ref host) = self.host {
                    options = options.host(host);
                }
                if let Some(port) = self.port {
                    options = options.port(port);
                }
                if let Some(ref user) = self.user {
                    options = options.username(user);
                }
                if let Some(ref password) = self.password {
                    options = options.password(password.expose_secret());
                }
                if let Some(ref database) = self.database {
                    options = options.database(database);
                }
                options
            }
        };
        if self.ssl {
            options = options.ssl_mode(PgSslMode::Require);
        }
        Ok(options)
    }
}

fn secret_opt<'de, D>(deserializer: D) -> std::result::Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}
