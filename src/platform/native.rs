//! Desktop-backed `HostPlatform` implementation.

use super::{DevicePaths, HostPlatform, TrashOutcome};
use async_trait::async_trait;
use std::path::PathBuf;

pub struct NativePlatform {
    user_data: PathBuf,
}

impl NativePlatform {
    /// Portable mode keeps all user data next to the executable's working
    /// directory instead of the OS config location.
    pub fn new(portable: bool) -> Self {
        let user_data = if portable {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("profile")
        } else {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("shelfmark")
        };
        if let Err(e) = std::fs::create_dir_all(&user_data) {
            tracing::warn!("failed to create {}: {}", user_data.display(), e);
        }
        Self { user_data }
    }
}

#[async_trait]
impl HostPlatform for NativePlatform {
    fn user_data_dir(&self) -> PathBuf {
        self.user_data.clone()
    }

    fn app_data_dir(&self) -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| self.user_data.clone())
            .join("shelfmark")
    }

    fn user_home(&self) -> PathBuf {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("/"))
    }

    fn app_version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    fn quit_on_all_windows_closed(&self) -> bool {
        !cfg!(target_os = "macos")
    }

    fn device_paths(&self) -> DevicePaths {
        DevicePaths {
            desktop_folder: dirs::desktop_dir(),
            documents_folder: dirs::document_dir(),
            downloads_folder: dirs::download_dir(),
            music_folder: dirs::audio_dir(),
            pictures_folder: dirs::picture_dir(),
            videos_folder: dirs::video_dir(),
            icloud_folder: icloud_folder(),
        }
    }

    async fn pick_directories(&self) -> Option<Vec<PathBuf>> {
        let picked = rfd::AsyncFileDialog::new().pick_folders().await?;
        Some(
            picked
                .into_iter()
                .map(|handle| handle.path().to_path_buf())
                .collect(),
        )
    }

    async fn move_to_trash(&self, files: Vec<PathBuf>) -> Vec<TrashOutcome> {
        let task = tokio::task::spawn_blocking(move || {
            files
                .into_iter()
                .map(|file| {
                    let path = file.to_string_lossy().into_owned();
                    match trash::delete(&file) {
                        Ok(()) => TrashOutcome {
                            path,
                            success: true,
                            error: None,
                        },
                        Err(e) => TrashOutcome {
                            path,
                            success: false,
                            error: Some(e.to_string()),
                        },
                    }
                })
                .collect()
        });
        match task.await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                tracing::warn!("trash task failed: {}", e);
                Vec::new()
            }
        }
    }

    fn open_external(&self, target: &str) -> anyhow::Result<()> {
        open::that_detached(target)?;
        Ok(())
    }
}

#[cfg(target_os = "macos")]
fn icloud_folder() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join("Library/Mobile Documents/com~apple~CloudDocs"))
}

#[cfg(not(target_os = "macos"))]
fn icloud_folder() -> Option<PathBuf> {
    None
}
