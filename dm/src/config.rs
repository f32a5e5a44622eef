//! Datamover configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::coordinator::CoordinatorConfig;
use crate::transport::memory::DEFAULT_CHUNK_SIZE;

/// Config file name, dot-prefixed in the working directory
const CONFIG_FILE: &str = "datamover.yml";

/// Main Datamover configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Transfer limits
    pub transfer: TransferConfig,

    /// Where values live on this node
    pub storage: StorageConfig,

    /// In-process network settings
    pub network: NetworkConfig,

    /// Log level used when none is given on the command line
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration
    ///
    /// An explicit path must load. Without one, `./.datamover.yml` and then
    /// `<config dir>/datamover/datamover.yml` are tried; a file that fails to
    /// parse is skipped with a warning. Defaults apply when nothing loads.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).with_context(|| format!("Cannot use config {}", path.display()));
        }

        for candidate in Self::candidates() {
            if !candidate.is_file() {
                continue;
            }
            match Self::load_from_file(&candidate) {
                Ok(config) => return Ok(config),
                Err(e) => tracing::warn!(path = %candidate.display(), error = %e, "Skipping unusable config"),
            }
        }

        tracing::info!("No datamover config found, running with defaults");
        Ok(Self::default())
    }

    /// Implicit config locations, most specific first
    fn candidates() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(format!(".{}", CONFIG_FILE))];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("datamover").join(CONFIG_FILE));
        }
        paths
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).with_context(|| format!("Cannot read {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&content).with_context(|| format!("Invalid YAML in {}", path.display()))?;
        tracing::info!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    /// Runtime limits for a coordinator
    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            max_send_slots: self.transfer.max_send_slots,
            max_receive_slots: self.transfer.max_receive_slots,
            persistent_bindings: self.transfer.persistent_bindings,
        }
    }
}

/// Transfer limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Maximum concurrent outbound transfers
    #[serde(rename = "max-send-slots")]
    pub max_send_slots: usize,

    /// Maximum concurrent inbound transfers
    #[serde(rename = "max-receive-slots")]
    pub max_receive_slots: usize,

    /// Peers keep binding objects in a persistent native runtime
    #[serde(rename = "persistent-bindings")]
    pub persistent_bindings: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_send_slots: 5,
            max_receive_slots: 5,
            persistent_bindings: false,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding file values
    #[serde(rename = "work-dir")]
    pub work_dir: String,

    /// Directories searched for a file that moved away from its registered path
    #[serde(rename = "fallback-dirs")]
    pub fallback_dirs: Vec<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/datamover/work on Linux)
        let work_dir = dirs::data_dir()
            .map(|d| d.join("datamover").join("work"))
            .unwrap_or_else(|| PathBuf::from(".datamover-work"))
            .to_string_lossy()
            .into_owned();

        Self {
            work_dir,
            fallback_dirs: Vec::new(),
        }
    }
}

impl StorageConfig {
    pub fn fallback_paths(&self) -> Vec<PathBuf> {
        self.fallback_dirs.iter().map(PathBuf::from).collect()
    }
}

/// In-process network settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Bytes per byte-buffer frame
    #[serde(rename = "chunk-size")]
    pub chunk_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}
