//! Host-integration seam.
//!
//! Everything the core needs from the desktop environment (known folders,
//! dialogs, trash, external open) goes through `HostPlatform` so the command
//! surface stays testable without a desktop session.

pub mod hotkeys;
pub mod native;

use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;

/// Known folders reported to the UI. Keys follow the wire contract of the
/// `get-device-paths` query.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevicePaths {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desktop_folder: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents_folder: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloads_folder: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub music_folder: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pictures_folder: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub videos_folder: Option<PathBuf>,
    /// Only populated on macOS.
    #[serde(rename = "iCloudFolder", skip_serializing_if = "Option::is_none")]
    pub icloud_folder: Option<PathBuf>,
}

/// Per-file result of a move-to-trash request.
#[derive(Debug, Clone, Serialize)]
pub struct TrashOutcome {
    pub path: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[async_trait]
pub trait HostPlatform: Send + Sync {
    /// Root for config, window state, and the default plugin location.
    fn user_data_dir(&self) -> PathBuf;

    /// Application data directory reported to the UI.
    fn app_data_dir(&self) -> PathBuf;

    fn user_home(&self) -> PathBuf;

    fn app_version(&self) -> String;

    /// Platform convention: false on macOS, true elsewhere.
    fn quit_on_all_windows_closed(&self) -> bool;

    fn device_paths(&self) -> DevicePaths;

    /// Modal directory picker. `None` means the user cancelled.
    async fn pick_directories(&self) -> Option<Vec<PathBuf>>;

    /// Move each file to the trash, reporting per-file outcomes; one failure
    /// never aborts the rest.
    async fn move_to_trash(&self, files: Vec<PathBuf>) -> Vec<TrashOutcome>;

    /// Open a URL or path with the system default handler.
    fn open_external(&self, target: &str) -> anyhow::Result<()>;
}
