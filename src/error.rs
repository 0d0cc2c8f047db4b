//! Error types for frontierq.
//!
//! Only genuine failures live here. Normal queue outcomes such as a
//! duplicate submission, a full queue or a stale acknowledgement are
//! reported through the outcome enums in [`crate::model`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The networked store could not be reached or rejected a request.
    /// Callers decide whether to retry; nothing is dropped on their behalf.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unsupported queue backend {name:?} (supported: {supported})")]
    UnsupportedBackend { name: String, supported: String },

    #[error("invalid fingerprint size {0}: must be between 1 and 32 bytes")]
    InvalidFingerprintSize(usize),

    #[error("invalid lease duration: {0}")]
    InvalidLease(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
