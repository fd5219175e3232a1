//! Configuration system for chainstore.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CHAINSTORE_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/chainstore/config.toml
//!   3. ~/.config/chainstore/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::endpoint::{EndpointDescriptor, EndpointRole, SigningIdentity};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainstoreConfig {
    /// Static endpoint pool. Discovery reads this once per run.
    pub endpoints: Vec<EndpointConfig>,
    pub upload: UploadConfig,
    pub confirmation: ConfirmationConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocatorKind {
    Sequential,
    RoundRobin,
    BurstDistribute,
    #[default]
    AutoDistribute,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationKind {
    #[default]
    Polling,
    TxEvent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub chunk_size_bytes: usize,
    pub allocator: AllocatorKind,
    /// Target of the Sequential allocator. Empty = first data endpoint.
    pub sequential_endpoint: String,
    /// Worker tasks. 0 = one per data endpoint.
    pub workers: usize,
    /// Attempts per chunk after the first before it is abandoned.
    pub max_retries: u32,
    /// Whole-run deadline in seconds. 0 = none.
    pub run_timeout_secs: u64,
    /// Burst-Distribute decisions between re-rankings. 0 = pool size.
    pub burst_size: usize,
    /// Fall back to RoundRobin when every load query fails.
    pub fallback_round_robin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    pub kind: ConfirmationKind,
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Retry a chunk with polling when its event subscription drops.
    pub fallback_to_polling: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    #[serde(default)]
    pub role: EndpointRole,
    pub rpc_address: String,
    pub rest_address: String,
    /// Name of the signing key held by the signer, never the key itself.
    pub key_name: String,
    #[serde(default)]
    pub account: String,
}

impl EndpointConfig {
    pub fn descriptor(&self) -> EndpointDescriptor {
        EndpointDescriptor {
            name: self.name.clone(),
            role: self.role,
            rpc_address: self.rpc_address.clone(),
            rest_address: self.rest_address.clone(),
        }
    }

    pub fn signing_identity(&self) -> SigningIdentity {
        SigningIdentity {
            key_name: self.key_name.clone(),
            account: self.account.clone(),
        }
    }
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: 256 * 1024,
            allocator: AllocatorKind::default(),
            sequential_endpoint: String::new(),
            workers: 0,
            max_retries: 5,
            run_timeout_secs: 0,
            burst_size: 0,
            fallback_round_robin: true,
        }
    }
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            kind: ConfirmationKind::default(),
            timeout_ms: 60_000,
            poll_interval_ms: 1_000,
            fallback_to_polling: true,
        }
    }
}

impl UploadConfig {
    pub fn run_timeout(&self) -> Option<Duration> {
        (self.run_timeout_secs > 0).then(|| Duration::from_secs(self.run_timeout_secs))
    }
}

impl ConfirmationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("chainstore")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ChainstoreConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            ChainstoreConfig::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CHAINSTORE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&ChainstoreConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply CHAINSTORE_* overrides using `lookup` to read variables.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("CHAINSTORE_UPLOAD__CHUNK_SIZE_BYTES") {
            if let Ok(n) = v.parse() {
                self.upload.chunk_size_bytes = n;
            }
        }
        if let Some(v) = lookup("CHAINSTORE_UPLOAD__ALLOCATOR") {
            match v.as_str() {
                "sequential" => self.upload.allocator = AllocatorKind::Sequential,
                "round_robin" => self.upload.allocator = AllocatorKind::RoundRobin,
                "burst_distribute" => self.upload.allocator = AllocatorKind::BurstDistribute,
                "auto_distribute" => self.upload.allocator = AllocatorKind::AutoDistribute,
                _ => {}
            }
        }
        if let Some(v) = lookup("CHAINSTORE_UPLOAD__MAX_RETRIES") {
            if let Ok(n) = v.parse() {
                self.upload.max_retries = n;
            }
        }
        if let Some(v) = lookup("CHAINSTORE_CONFIRMATION__KIND") {
            match v.as_str() {
                "polling" => self.confirmation.kind = ConfirmationKind::Polling,
                "tx_event" => self.confirmation.kind = ConfirmationKind::TxEvent,
                _ => {}
            }
        }
        if let Some(v) = lookup("CHAINSTORE_CONFIRMATION__TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.confirmation.timeout_ms = n;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upload.chunk_size_bytes == 0 {
            return Err(ConfigError::Invalid("chunk_size_bytes must be > 0".into()));
        }
        if self.confirmation.timeout_ms == 0 {
            return Err(ConfigError::Invalid("confirmation timeout is mandatory".into()));
        }
        if self.confirmation.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be > 0".into()));
        }
        let mut names = std::collections::HashSet::new();
        for endpoint in &self.endpoints {
            if !names.insert(endpoint.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate endpoint name: {}",
                    endpoint.name
                )));
            }
        }
        Ok(())
    }
}
