//! Layered configuration: built-in defaults, an optional TOML file, then
//! `PERFLOG__*` environment overrides (e.g. `PERFLOG__STORE__BACKEND=sqlite`).

use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{LogError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Identity of the agent owning the log; one store per identity.
    pub agent_id: String,
    pub store: StoreConfig,
    pub signing: SigningConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    File,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: BackendKind,
    pub data_dir: PathBuf,
    /// Explicit medium path; derived from `data_dir` and the agent id when unset.
    pub path: Option<PathBuf>,
    pub io_timeout_ms: u64,
    /// Maximum number of trailing entries recovery may discard at open.
    pub max_recovery_truncation: usize,
    pub clock_skew_tolerance_ms: u64,
    pub allow_unsigned: bool,
    pub sync_writes: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// File holding the hex-encoded secp256k1 secret key.
    pub key_path: Option<PathBuf>,
    /// Hex public keys accepted by the verifier; empty accepts any declared signer.
    pub trusted_signers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub tail_limit: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            agent_id: "agent-of-sats".to_string(),
            store: StoreConfig::default(),
            signing: SigningConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::File,
            data_dir: PathBuf::from("data"),
            path: None,
            io_timeout_ms: 5_000,
            max_recovery_truncation: 1,
            clock_skew_tolerance_ms: 5_000,
            allow_unsigned: false,
            sync_writes: true,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { tail_limit: 100 }
    }
}

impl StoreConfig {
    /// Resolve the durable medium location for an agent identity.
    pub fn resolve_path(&self, agent_id: &str) -> PathBuf {
        if let Some(path) = &self.path {
            return path.clone();
        }
        let extension = match self.backend {
            BackendKind::File => "jsonl",
            BackendKind::Sqlite => "db",
        };
        self.data_dir.join(format!("{}.{}", agent_id, extension))
    }
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(LogError::ConfigError(format!(
                    "Configuration file not found: {:?}",
                    path
                )));
            }
            builder = builder.add_source(File::from(path));
        }

        let config: AppConfig = builder
            .add_source(
                Environment::with_prefix("PERFLOG")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("signing.trusted_signers"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        info!("Configuration loaded for agent {}", config.agent_id);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.agent_id.trim().is_empty() {
            return Err(LogError::ConfigError("agent_id must not be empty".to_string()));
        }
        if self.agent_id.contains(['/', '\\']) {
            return Err(LogError::ConfigError(format!(
                "agent_id must not contain path separators: {}",
                self.agent_id
            )));
        }
        if self.store.io_timeout_ms == 0 {
            return Err(LogError::ConfigError("store.io_timeout_ms must be positive".to_string()));
        }
        if self.export.tail_limit == 0 {
            return Err(LogError::ConfigError("export.tail_limit must be positive".to_string()));
        }
        Ok(())
    }

    pub fn store_path(&self) -> PathBuf {
        self.store.resolve_path(&self.agent_id)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| LogError::ConfigError(e.to_string()))
    }
}
