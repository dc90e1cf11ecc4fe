//! Run configuration.
//!
//! Loaded from an optional TOML file, then overridden from the command line
//! and environment in `main.rs`. The resulting value is handed to the
//! pipeline explicitly; nothing reads configuration from global state.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::catalog::MAX_PAGE_SIZE;
use crate::error::ConfigError;
use crate::policy::Policies;
use crate::remote::Transport;

pub const DEFAULT_CHECKPOINT_PATH: &str = "lrclib-sidecar-progress.json";
pub const DEFAULT_LOOKUP_URL: &str = "https://lrclib.net/api";

/// One catalog-to-remote path prefix substitution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathMapping {
    pub from: String,
    pub to: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Media-server base URL, e.g. `https://jellyfin.example.net`.
    pub server_url: String,
    #[serde(skip_serializing)]
    pub api_token: String,
    /// Catalog scope (library id). `None` enumerates every audio item.
    pub library_id: Option<String>,
    pub lookup_url: String,
    pub transport: Transport,
    /// ssh destination, e.g. `media@nas.local`.
    pub remote_host: String,
    pub ssh_program: String,
    pub ssh_options: Vec<String>,
    /// Ordered; the first matching prefix wins.
    pub path_mappings: Vec<PathMapping>,
    pub checkpoint_path: PathBuf,
    pub page_size: usize,
    /// Persist the checkpoint every this many processed tracks.
    pub checkpoint_every: u64,
    pub error_log_capacity: usize,
    pub user_agent: String,
    pub policies: Policies,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8096".to_string(),
            api_token: String::new(),
            library_id: None,
            lookup_url: DEFAULT_LOOKUP_URL.to_string(),
            transport: Transport::Ssh,
            remote_host: String::new(),
            ssh_program: "ssh".to_string(),
            ssh_options: vec!["-o".to_string(), "BatchMode=yes".to_string()],
            path_mappings: Vec::new(),
            checkpoint_path: PathBuf::from(DEFAULT_CHECKPOINT_PATH),
            page_size: 50,
            checkpoint_every: 10,
            error_log_capacity: 10,
            user_agent: concat!("lrclib-sidecar/", env!("CARGO_PKG_VERSION")).to_string(),
            policies: Policies::default(),
        }
    }
}

impl Config {
    /// Reads `path` if given, otherwise returns the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Checks ranges. Remote settings are only required when mutating.
    pub fn validate(&self, dry_run: bool) -> Result<(), ConfigError> {
        let invalid = |field, reason: String| Err(ConfigError::Invalid { field, reason });

        if self.server_url.trim().is_empty() {
            return invalid("server_url", "must not be empty".into());
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return invalid(
                "page_size",
                format!("{} is outside 1..={}", self.page_size, MAX_PAGE_SIZE),
            );
        }
        if self.checkpoint_every == 0 {
            return invalid("checkpoint_every", "must be at least 1".into());
        }
        if self.error_log_capacity == 0 {
            return invalid("error_log_capacity", "must be at least 1".into());
        }
        for (field, policy) in [
            ("policies.catalog", &self.policies.catalog),
            ("policies.lookup", &self.policies.lookup),
            ("policies.remote", &self.policies.remote),
        ] {
            if policy.max_attempts == 0 {
                return invalid(field, "max_attempts must be at least 1".into());
            }
            if policy.timeout().is_zero() {
                return invalid(field, "timeout_secs must be positive".into());
            }
        }
        for mapping in &self.path_mappings {
            if mapping.from.is_empty() {
                return invalid("path_mappings", "mapping prefix must not be empty".into());
            }
        }
        if !dry_run {
            if self.transport == Transport::Ssh && self.remote_host.trim().is_empty() {
                return invalid("remote_host", "required for ssh transport unless --dry-run".into());
            }
            if self.lookup_url.trim().is_empty() {
                return invalid("lookup_url", "must not be empty".into());
            }
        }
        Ok(())
    }
}
