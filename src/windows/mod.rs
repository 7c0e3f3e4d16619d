//! Window bookkeeping and the shell seam.
//!
//! The actual UI surface is out of scope for this crate; everything a window
//! can do is expressed through the `WindowShell` trait so the orchestration
//! layer can be driven headless in tests. The manager owns the authoritative
//! window set, persists bounds per role, and enforces the visibility rules:
//! the primary window opens hidden and is shown once its content reports
//! ready, secondaries open shown immediately.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex as StdMutex;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(Uuid);

impl WindowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WindowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowRole {
    Primary,
    Secondary,
}

impl WindowRole {
    fn store_key(self) -> &'static str {
        match self {
            WindowRole::Primary => "primary",
            WindowRole::Secondary => "secondary",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowBounds {
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct WindowRecord {
    pub id: WindowId,
    pub role: WindowRole,
    pub bounds: WindowBounds,
    pub visible: bool,
}

/// Everything the shell needs to materialize a window.
#[derive(Debug, Clone)]
pub struct WindowSpec {
    pub id: WindowId,
    pub role: WindowRole,
    pub url: String,
    pub bounds: WindowBounds,
    pub visible: bool,
}

#[derive(Debug, Error)]
#[error("shell refused to open window: {0}")]
pub struct ShellError(pub String);

#[derive(Debug, Error)]
#[error("delivery to window {window} failed: {detail}")]
pub struct DeliveryError {
    pub window: WindowId,
    pub detail: String,
}

/// The out-of-scope UI surface. Implementations must tolerate being called
/// for ids the shell no longer knows.
#[async_trait]
pub trait WindowShell: Send + Sync {
    async fn open(&self, spec: WindowSpec) -> Result<(), ShellError>;
    async fn navigate(&self, id: WindowId, url: &str) -> Result<(), ShellError>;
    async fn show(&self, id: WindowId);
    async fn focus(&self, id: WindowId);
    async fn set_zoom(&self, id: WindowId, level: f64);
    async fn close(&self, id: WindowId);
    async fn deliver(
        &self,
        id: WindowId,
        event: &str,
        payload: serde_json::Value,
    ) -> Result<(), DeliveryError>;
}

/// Shell used when no UI is attached. Opens succeed, deliveries vanish.
pub struct DetachedShell;

#[async_trait]
impl WindowShell for DetachedShell {
    async fn open(&self, spec: WindowSpec) -> Result<(), ShellError> {
        tracing::debug!("detached shell: open {} ({:?})", spec.id, spec.role);
        Ok(())
    }

    async fn navigate(&self, id: WindowId, url: &str) -> Result<(), ShellError> {
        tracing::debug!("detached shell: navigate {} to {}", id, url);
        Ok(())
    }

    async fn show(&self, _id: WindowId) {}
    async fn focus(&self, _id: WindowId) {}
    async fn set_zoom(&self, _id: WindowId, _level: f64) {}
    async fn close(&self, _id: WindowId) {}

    async fn deliver(
        &self,
        _id: WindowId,
        _event: &str,
        _payload: serde_json::Value,
    ) -> Result<(), DeliveryError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// persisted bounds
// ---------------------------------------------------------------------------

/// JSON-backed store of the last known bounds per window role.
pub struct WindowStateStore {
    path: PathBuf,
    cache: StdMutex<HashMap<String, WindowBounds>>,
}

impl WindowStateStore {
    pub fn new(path: PathBuf) -> Self {
        let cache = std::fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default();
        Self {
            path,
            cache: StdMutex::new(cache),
        }
    }

    pub fn bounds_for(&self, role: WindowRole) -> Option<WindowBounds> {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(role.store_key())
            .copied()
    }

    /// Persist the bounds for a role. Write failures are logged; stale bounds
    /// on the next launch are acceptable.
    pub fn persist(&self, role: WindowRole, bounds: WindowBounds) {
        let snapshot = {
            let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
            cache.insert(role.store_key().to_string(), bounds);
            cache.clone()
        };
        match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    tracing::warn!("failed to persist window state: {}", e);
                }
            }
            Err(e) => tracing::warn!("failed to serialize window state: {}", e),
        }
    }
}

// ---------------------------------------------------------------------------
// manager
// ---------------------------------------------------------------------------

/// Percent-encode a string for use as a URL query value.
pub fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

pub struct WindowManager {
    shell: std::sync::Arc<dyn WindowShell>,
    store: WindowStateStore,
    entry_url: String,
    default_width: u32,
    default_height: u32,
    /// Whether closing the last window should end the process (false on
    /// macOS, following the platform convention).
    quit_on_all_closed: bool,
    quit_tx: mpsc::UnboundedSender<()>,
    records: Mutex<HashMap<WindowId, WindowRecord>>,
}

impl WindowManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        shell: std::sync::Arc<dyn WindowShell>,
        store: WindowStateStore,
        entry_url: String,
        default_width: u32,
        default_height: u32,
        quit_on_all_closed: bool,
        quit_tx: mpsc::UnboundedSender<()>,
    ) -> Self {
        Self {
            shell,
            store,
            entry_url,
            default_width,
            default_height,
            quit_on_all_closed,
            quit_tx,
            records: Mutex::new(HashMap::new()),
        }
    }

    fn initial_bounds(&self, role: WindowRole) -> WindowBounds {
        self.store.bounds_for(role).unwrap_or(WindowBounds {
            x: None,
            y: None,
            width: self.default_width,
            height: self.default_height,
        })
    }

    /// Open the primary window, hidden until its content calls
    /// `notify_ready`. An optional startup payload is appended to the entry
    /// URL as `?cmdopen=<encoded>`.
    pub async fn create_primary(
        &self,
        startup_payload: Option<&str>,
    ) -> anyhow::Result<WindowId> {
        let url = match startup_payload {
            Some(payload) => format!("{}?cmdopen={}", self.entry_url, encode_component(payload)),
            None => self.entry_url.clone(),
        };
        self.open_window(WindowRole::Primary, url, false).await
    }

    /// Open a secondary window, shown immediately. When no windows exist the
    /// request degrades to opening the primary, so there is always a window
    /// to anchor the session.
    pub async fn create_secondary(&self, target_url: Option<&str>) -> anyhow::Result<WindowId> {
        if self.records.lock().await.is_empty() {
            tracing::debug!("no windows open, creating primary instead of secondary");
            return self.create_primary(None).await;
        }
        let url = target_url.unwrap_or(&self.entry_url).to_string();
        self.open_window(WindowRole::Secondary, url, true).await
    }

    async fn open_window(
        &self,
        role: WindowRole,
        url: String,
        visible: bool,
    ) -> anyhow::Result<WindowId> {
        let id = WindowId::new();
        let bounds = self.initial_bounds(role);
        self.shell
            .open(WindowSpec {
                id,
                role,
                url,
                bounds,
                visible,
            })
            .await?;
        self.records.lock().await.insert(
            id,
            WindowRecord {
                id,
                role,
                bounds,
                visible,
            },
        );
        tracing::info!("opened {:?} window {}", role, id);
        Ok(id)
    }

    /// Content finished loading; reveal the window.
    pub async fn notify_ready(&self, id: WindowId) {
        let known = {
            let mut records = self.records.lock().await;
            match records.get_mut(&id) {
                Some(record) => {
                    record.visible = true;
                    true
                }
                None => false,
            }
        };
        if known {
            self.shell.show(id).await;
        } else {
            tracing::debug!("ready notice from unknown window {}", id);
        }
    }

    /// Resize/move callback from the shell.
    pub async fn update_bounds(&self, id: WindowId, bounds: WindowBounds) {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(&id) {
            record.bounds = bounds;
            self.store.persist(record.role, bounds);
        }
    }

    /// Close a window, persisting its final bounds. Closing the last window
    /// requests process shutdown on platforms with that convention.
    pub async fn close_window(&self, id: WindowId) {
        let remaining = {
            let mut records = self.records.lock().await;
            match records.remove(&id) {
                Some(record) => self.store.persist(record.role, record.bounds),
                None => {
                    tracing::debug!("close for unknown window {}", id);
                    return;
                }
            }
            records.len()
        };
        self.shell.close(id).await;
        if remaining == 0 && self.quit_on_all_closed {
            tracing::info!("all windows closed, requesting shutdown");
            let _ = self.quit_tx.send(());
        }
    }

    pub async fn focus(&self, id: WindowId) {
        self.shell.focus(id).await;
    }

    pub async fn set_zoom(&self, id: WindowId, level: f64) {
        self.shell.set_zoom(id, level).await;
    }

    pub async fn primary_id(&self) -> Option<WindowId> {
        self.records
            .lock()
            .await
            .values()
            .find(|r| r.role == WindowRole::Primary)
            .map(|r| r.id)
    }

    pub async fn window_ids(&self) -> Vec<WindowId> {
        self.records.lock().await.keys().copied().collect()
    }

    pub async fn window_count(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Restore, show, and focus the primary window; opens it when missing.
    pub async fn show_primary(&self) -> anyhow::Result<()> {
        let id = match self.primary_id().await {
            Some(id) => id,
            None => self.create_primary(None).await?,
        };
        self.notify_ready(id).await;
        self.shell.focus(id).await;
        Ok(())
    }

    /// Navigate the primary window back to the entry URL. Failures propagate;
    /// this is the last-resort recovery path.
    pub async fn reload_primary(&self) -> anyhow::Result<()> {
        let id = self
            .primary_id()
            .await
            .ok_or_else(|| anyhow::anyhow!("no primary window to reload"))?;
        self.shell.navigate(id, &self.entry_url).await?;
        tracing::info!("reloaded primary window {}", id);
        Ok(())
    }

    /// Send an event to one window. A vanished target is a logged no-op.
    pub async fn send_to(&self, id: WindowId, event: &str, payload: serde_json::Value) {
        if !self.records.lock().await.contains_key(&id) {
            tracing::debug!("dropping '{}' for vanished window {}", event, id);
            return;
        }
        if let Err(e) = self.shell.deliver(id, event, payload).await {
            tracing::warn!("{}", e);
        }
    }

    /// Send an event to every open window.
    pub async fn broadcast(&self, event: &str, payload: serde_json::Value) {
        for id in self.window_ids().await {
            self.send_to(id, event, payload.clone()).await;
        }
    }

    /// Drop every record without shell callbacks; shutdown path.
    pub async fn release_all(&self) {
        let mut records = self.records.lock().await;
        for record in records.values() {
            self.store.persist(record.role, record.bounds);
        }
        records.clear();
    }
}
