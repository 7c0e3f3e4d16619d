//! Global configuration for the core process.
//!
//! Loaded from `<user-data>/config.toml` (overridable via the
//! `SHELFMARK_CONFIG` environment variable). Every field is optional; the
//! accessors provide the built-in defaults so callers never deal with
//! missing values.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default starting port for the worker service port scan.
pub const DEFAULT_WORKER_PORT: u16 = 49352;

/// Default content URL for new windows.
pub const DEFAULT_ENTRY_URL: &str = "app://index.html";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    pub plugin_root: Option<PathBuf>,
    pub entry_url: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub window: WindowConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerConfig {
    /// Worker service program. When absent the default binary name is used
    /// and resolution is left to PATH lookup at spawn time.
    pub executable: Option<PathBuf>,
    /// Base arguments placed before the generated `-p <port> -k <key>` pair.
    #[serde(default)]
    pub args: Vec<String>,
    pub preferred_port: Option<u16>,
    /// Access credential passed to the worker; generated when absent.
    pub service_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WindowConfig {
    pub default_width: Option<u32>,
    pub default_height: Option<u32>,
}

impl GlobalConfig {
    /// Load the configuration, falling back to defaults when the file is
    /// missing or malformed. A malformed file is logged, never fatal.
    pub fn load(user_data: &Path) -> Self {
        let path = std::env::var("SHELFMARK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| user_data.join("config.toml"));
        let content = std::fs::read_to_string(&path).unwrap_or_default();
        match toml::from_str(&content) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!("failed to parse {}: {}, using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn worker_executable(&self) -> PathBuf {
        self.worker
            .executable
            .clone()
            .unwrap_or_else(|| PathBuf::from("shelfmark-worker"))
    }

    pub fn preferred_port(&self) -> u16 {
        self.worker.preferred_port.unwrap_or(DEFAULT_WORKER_PORT)
    }

    /// Access credential for the worker service; a fresh random key when
    /// none is configured.
    pub fn service_key(&self) -> String {
        self.worker
            .service_key
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    pub fn plugin_root(&self, user_data: &Path) -> PathBuf {
        self.plugin_root
            .clone()
            .unwrap_or_else(|| user_data.join("plugins"))
    }

    pub fn entry_url(&self) -> String {
        self.entry_url
            .clone()
            .unwrap_or_else(|| DEFAULT_ENTRY_URL.to_string())
    }

    pub fn language(&self) -> String {
        self.language.clone().unwrap_or_else(|| "en".to_string())
    }

    pub fn default_width(&self) -> u32 {
        self.window.default_width.unwrap_or(1280)
    }

    pub fn default_height(&self) -> u32 {
        self.window.default_height.unwrap_or(800)
    }
}
