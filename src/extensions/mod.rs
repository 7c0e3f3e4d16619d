//! Extension discovery and removal.
//!
//! Extensions live as immediate subdirectories of the plugin root, each
//! carrying a `manifest.json`. A scan tolerates partial failure: a directory
//! without a readable manifest is logged and skipped, never fatal. Scans run
//! on the blocking pool and are serialized by an async gate so an overlapping
//! reload request waits for the settling scan instead of interleaving with it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use tokio::sync::Mutex;

/// Parsed `manifest.json` of a single extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "fileTypes", default)]
    pub file_types: Vec<String>,
}

/// Result of a full plugin-root scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtensionScan {
    pub extensions: Vec<ExtensionManifest>,
    /// Deduplicated union of every extension's declared file types.
    #[serde(rename = "supportedFileTypes")]
    pub supported_file_types: Vec<String>,
}

pub struct ExtensionLoader {
    plugin_root: PathBuf,
    scan_gate: Mutex<()>,
}

impl ExtensionLoader {
    pub fn new(plugin_root: PathBuf) -> Self {
        Self {
            plugin_root,
            scan_gate: Mutex::new(()),
        }
    }

    pub fn plugin_root(&self) -> &Path {
        &self.plugin_root
    }

    /// Scan the plugin root and parse every manifest found. A missing plugin
    /// root yields an empty scan.
    pub async fn load_all(&self) -> ExtensionScan {
        let _gate = self.scan_gate.lock().await;
        let root = self.plugin_root.clone();
        match tokio::task::spawn_blocking(move || scan_directory(&root)).await {
            Ok(scan) => scan,
            Err(e) => {
                tracing::warn!("extension scan task failed: {}", e);
                ExtensionScan::default()
            }
        }
    }

    /// Remove an installed extension by id. Ids carrying a `/build` suffix
    /// refer to a build artifact inside the extension directory; the whole
    /// extension is removed as a unit. Missing or malformed ids are logged
    /// no-ops, so removal is idempotent.
    pub async fn remove(&self, extension_id: &str) {
        let _gate = self.scan_gate.lock().await;
        let id = match extension_id.find("/build") {
            Some(idx) => &extension_id[..idx],
            None => extension_id,
        };
        let relative = Path::new(id);
        if id.is_empty() || !is_safe_relative(relative) {
            tracing::warn!("refusing to remove extension with id '{}'", extension_id);
            return;
        }
        let target = self.plugin_root.join(relative);
        if !target.exists() {
            tracing::debug!("extension '{}' is not installed", id);
            return;
        }
        let id = id.to_string();
        let result =
            tokio::task::spawn_blocking(move || std::fs::remove_dir_all(&target)).await;
        match result {
            Ok(Ok(())) => tracing::info!("removed extension '{}'", id),
            Ok(Err(e)) => tracing::warn!("failed to remove extension '{}': {}", id, e),
            Err(e) => tracing::warn!("extension removal task failed: {}", e),
        }
    }
}

fn is_safe_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

fn scan_directory(root: &Path) -> ExtensionScan {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("plugin root {} not readable: {}", root.display(), e);
            return ExtensionScan::default();
        }
    };

    let mut extensions: Vec<ExtensionManifest> = Vec::new();
    let mut file_types = BTreeSet::new();
    for entry in entries.flatten() {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let manifest = match read_manifest(&dir) {
            Ok(manifest) => manifest,
            Err(e) => {
                tracing::warn!("skipping {}: {}", dir.display(), e);
                continue;
            }
        };
        if extensions.iter().any(|m| m.id == manifest.id) {
            tracing::warn!(
                "duplicate extension id '{}' in {}, keeping the first",
                manifest.id,
                dir.display()
            );
            continue;
        }
        file_types.extend(manifest.file_types.iter().cloned());
        extensions.push(manifest);
    }

    tracing::info!("loaded {} extensions from {}", extensions.len(), root.display());
    ExtensionScan {
        extensions,
        supported_file_types: file_types.into_iter().collect(),
    }
}

fn read_manifest(dir: &Path) -> anyhow::Result<ExtensionManifest> {
    let content = std::fs::read_to_string(dir.join("manifest.json"))?;
    Ok(serde_json::from_str(&content)?)
}
