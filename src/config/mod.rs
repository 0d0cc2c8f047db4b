//! Typed configuration from environment variables or a TOML file.
//!
//! Loads once at startup and fails fast on malformed values. The queue core
//! only ever sees the resulting [`Config`]; it does not care where the values
//! came from. Sensitive values are wrapped in `secrecy::SecretString`.

pub mod postgres;

use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::fingerprint::Fingerprinter;

pub use postgres::PostgresConfig;

/// Which queue adapter to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum BackendKind {
    /// In-process queue, lost when the process exits.
    #[default]
    Memory,
    /// Shared queue in Postgres.
    Postgres,
}

impl BackendKind {
    pub const SUPPORTED: &'static [&'static str] = &["memory", "postgres"];
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "memory" => Ok(BackendKind::Memory),
            "postgres" => Ok(BackendKind::Postgres),
            other => Err(Error::UnsupportedBackend {
                name: other.to_string(),
                supported: Self::SUPPORTED.join(", "),
            }),
        }
    }
}

impl TryFrom<String> for BackendKind {
    type Error = Error;

    fn try_from(name: String) -> Result<Self> {
        name.parse()
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Memory => write!(f, "memory"),
            BackendKind::Postgres => write!(f, "postgres"),
        }
    }
}

/// Behavior knobs shared by every backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueSettings {
    /// Maximum outstanding (pending + claimed) items. 0 = unlimited.
    pub maxsize: u64,
    /// Suppress submissions whose fingerprint has a live dedup record.
    pub dedupe: bool,
    /// On a duplicate, rewrite the pending item's priority instead of ignoring it.
    pub update_priority: bool,
    /// Fingerprint width in bytes.
    pub fingerprint_size: usize,
    /// Seconds an item may stay pending. 0 = never expires.
    pub item_ttl: u64,
    /// Seconds a dedup record is retained. 0 = never expires.
    pub dedupe_ttl: u64,
    pub max_orphan_retries: u32,
    /// Key prefix isolating one crawl run from others on the same backend.
    pub namespace: String,
    /// Default lease for workers that do not choose their own.
    pub lease_secs: u64,
    pub reaper_interval_secs: u64,
    /// Only these query parameters take part in fingerprints.
    pub include_params: Option<Vec<String>>,
    /// Query parameters ignored by fingerprints.
    pub exclude_params: Vec<String>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            maxsize: 0,
            dedupe: false,
            update_priority: false,
            fingerprint_size: Fingerprinter::DEFAULT_SIZE,
            item_ttl: 0,
            dedupe_ttl: 0,
            max_orphan_retries: 10,
            namespace: "frontier".to_string(),
            lease_secs: 300,
            reaper_interval_secs: 30,
            include_params: None,
            exclude_params: Vec::new(),
        }
    }
}

impl QueueSettings {
    pub fn validate(&self) -> Result<()> {
        if self.fingerprint_size == 0 || self.fingerprint_size > Fingerprinter::MAX_SIZE {
            return Err(Error::InvalidFingerprintSize(self.fingerprint_size));
        }
        if self.namespace.trim().is_empty() {
            return Err(Error::Config("namespace must not be empty".to_string()));
        }
        if self.lease_secs == 0 {
            return Err(Error::Config("lease_secs must be positive".to_string()));
        }
        if self.reaper_interval_secs == 0 {
            return Err(Error::Config(
                "reaper_interval_secs must be positive".to_string(),
            ));
        }
        for (name, value) in [
            ("item_ttl", self.item_ttl),
            ("dedupe_ttl", self.dedupe_ttl),
            ("lease_secs", self.lease_secs),
            ("reaper_interval_secs", self.reaper_interval_secs),
        ] {
            if value > MAX_DURATION_SECS {
                return Err(Error::Config(format!(
                    "{name} must be at most {MAX_DURATION_SECS} seconds"
                )));
            }
        }
        if i64::try_from(self.maxsize).is_err() {
            return Err(Error::Config("maxsize is out of range".to_string()));
        }
        Ok(())
    }

    pub fn item_ttl(&self) -> Option<chrono::Duration> {
        seconds(self.item_ttl)
    }

    pub fn dedupe_ttl(&self) -> Option<chrono::Duration> {
        seconds(self.dedupe_ttl)
    }

    pub fn lease(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lease_secs)
    }

    pub fn reaper_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reaper_interval_secs)
    }

    pub fn fingerprinter(&self) -> Result<Fingerprinter> {
        let mut fingerprinter = Fingerprinter::new(self.fingerprint_size)?
            .exclude_params(self.exclude_params.iter().cloned());
        if let Some(ref include) = self.include_params {
            fingerprinter = fingerprinter.include_params(include.iter().cloned());
        }
        Ok(fingerprinter)
    }
}

/// Upper bound for any duration setting: ten years.
pub(crate) const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn seconds(secs: u64) -> Option<chrono::Duration> {
    match secs {
        0 => None,
        n => chrono::Duration::try_seconds(i64::try_from(n).ok()?),
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Complete process configuration.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub otel_endpoint: Option<String>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            queue: QueueSettings::default(),
            postgres: PostgresConfig::default(),
            otel_endpoint: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    /// Unset variables keep their defaults; malformed ones are errors.
    pub fn from_env() -> Result<Self> {
        let defaults = QueueSettings::default();
        let queue = QueueSettings {
            maxsize: parse_var("QUEUE_MAXSIZE")?.unwrap_or(defaults.maxsize),
            dedupe: bool_var("QUEUE_DEDUPE")?.unwrap_or(defaults.dedupe),
            update_priority: bool_var("QUEUE_UPDATE_PRIORITY")?
                .unwrap_or(defaults.update_priority),
            fingerprint_size: parse_var("QUEUE_FINGERPRINT_SIZE")?
                .unwrap_or(defaults.fingerprint_size),
            item_ttl: parse_var("QUEUE_ITEM_TTL")?.unwrap_or(defaults.item_ttl),
            dedupe_ttl: parse_var("QUEUE_DEDUPE_TTL")?.unwrap_or(defaults.dedupe_ttl),
            max_orphan_retries: parse_var("QUEUE_MAX_ORPHAN_RETRIES")?
                .unwrap_or(defaults.max_orphan_retries),
            namespace: std::env::var("QUEUE_NAMESPACE").unwrap_or(defaults.namespace),
            lease_secs: parse_var("QUEUE_LEASE_SECS")?.unwrap_or(defaults.lease_secs),
            reaper_interval_secs: parse_var("QUEUE_REAPER_INTERVAL_SECS")?
                .unwrap_or(defaults.reaper_interval_secs),
            include_params: list_var("QUEUE_INCLUDE_PARAMS"),
            exclude_params: list_var("QUEUE_EXCLUDE_PARAMS").unwrap_or_default(),
        };

        let backend = match std::env::var("QUEUE_BACKEND") {
            Ok(name) => name.parse()?,
            Err(_) => BackendKind::default(),
        };

        let config = Self {
            backend,
            queue,
            postgres: PostgresConfig::from_env()?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| default_log_level()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text. Unknown keys are rejected.
    ///
    /// The backend name goes through [`BackendKind::from_str`] first, so an
    /// unknown backend is reported the same way as from the environment.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let invalid = |e: toml::de::Error| Error::Config(format!("invalid config: {e}"));
        let mut table: toml::Table = toml::from_str(text).map_err(invalid)?;
        let backend = match table.remove("backend") {
            Some(toml::Value::String(name)) => name.parse()?,
            Some(other) => {
                return Err(Error::Config(format!(
                    "backend must be a string, got {other}"
                )));
            }
            None => BackendKind::default(),
        };

        let rest: Self = toml::Value::Table(table).try_into().map_err(invalid)?;
        let config = Self { backend, ..rest };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        self.queue.validate()
    }
}

pub(crate) fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{name} has an invalid value: {raw:?}"))),
        Err(_) => Ok(None),
    }
}

pub(crate) fn bool_var(name: &str) -> Result<Option<bool>> {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(Error::Config(format!("{name} must be a boolean, got {raw:?}"))),
        },
        Err(_) => Ok(None),
    }
}

fn list_var(name: &str) -> Option<Vec<String>> {
    std::env::var(name).ok().map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
}
