//! Error types for the sidecar pipeline.
//!
//! Only [`PipelineError`] ever terminates a run. Everything else is caught at
//! the per-track boundary, written to the checkpoint's error log and counted.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure talking to the catalog, the lookup service or the remote host.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection, TLS, decode or other client-side HTTP failure.
    #[error("{service} request failed: {source}")]
    Http {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with a non-success status.
    #[error("{service} returned HTTP {status}")]
    Status { service: &'static str, status: u16 },

    /// The request or command exceeded its deadline.
    #[error("{service} timed out after {}s", .timeout.as_secs_f64())]
    Timeout {
        service: &'static str,
        timeout: Duration,
    },

    /// The remote channel could not be started (missing ssh binary, pipe error).
    #[error("failed to spawn remote command: {0}")]
    Spawn(#[from] std::io::Error),

    /// The remote command ran and exited unsuccessfully.
    #[error("remote command exited with {code:?}: {stderr}")]
    RemoteExit { code: Option<i32>, stderr: String },
}

impl TransportError {
    /// Classifies a reqwest error, keeping timeouts distinct.
    pub fn from_reqwest(service: &'static str, timeout: Duration, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { service, timeout }
        } else {
            Self::Http { service, source }
        }
    }
}

/// Failure loading or persisting the checkpoint document.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The persisted checkpoint exists but cannot be trusted.
    #[error("corrupt checkpoint at {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("checkpoint io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize checkpoint: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Invalid or unreadable configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Why a single track did not complete. Recorded, never propagated.
#[derive(Debug, Error)]
pub enum ItemFailure {
    #[error("track {id} is missing required field {field}")]
    MissingRequiredField { id: String, field: &'static str },

    #[error("refusing to touch unsafe remote path {path}: {reason}")]
    UnsafePath { path: String, reason: &'static str },

    #[error("deleting sidecars for {path} failed: {source}")]
    Delete {
        path: String,
        #[source]
        source: TransportError,
    },

    #[error("writing {path} failed: {source}")]
    Write {
        path: String,
        #[source]
        source: TransportError,
    },

    #[error("could not stage lyrics for {path}: {source}")]
    Stage {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("verification of {path} failed: {source}")]
    Verify {
        path: String,
        #[source]
        source: TransportError,
    },
}

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// Resuming would continue another library's offsets.
    #[error("checkpoint was written for library {stored:?}, not {requested:?}; rerun with --no-resume")]
    ScopeMismatch {
        stored: Option<String>,
        requested: Option<String>,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
