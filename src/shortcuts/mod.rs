//! System-wide keyboard shortcuts.
//!
//! Registration goes through the `HotkeyBackend` seam so tests (and headless
//! runs) never touch the OS hotkey tables. The registrar maps fired backend
//! tokens back to action names and forwards them to the orchestration loop;
//! actions are routed like any other command, they carry no behavior here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use thiserror::Error;
use tokio::sync::mpsc;

/// Opaque id handed out by the backend for a registered key sequence.
pub type HotkeyToken = u32;

#[derive(Debug, Error)]
#[error("failed to register shortcut '{keys}': {detail}")]
pub struct HotkeyError {
    pub keys: String,
    pub detail: String,
}

/// OS-level hotkey surface.
pub trait HotkeyBackend: Send + Sync {
    fn register(&self, keys: &str) -> Result<HotkeyToken, HotkeyError>;
    fn unregister(&self, token: HotkeyToken);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortcutBinding {
    /// Accelerator string, e.g. `CommandOrControl+Shift+F`.
    pub keys: String,
    /// Action name routed to the primary window as a `cmd` push.
    pub action: String,
}

impl ShortcutBinding {
    pub fn new(keys: &str, action: &str) -> Self {
        Self {
            keys: keys.to_string(),
            action: action.to_string(),
        }
    }
}

/// The stock shortcut set applied when global shortcuts are enabled.
pub fn default_bindings() -> Vec<ShortcutBinding> {
    vec![
        ShortcutBinding::new("CommandOrControl+Shift+F", "open-search"),
        ShortcutBinding::new("CommandOrControl+Shift+P", "play-pause"),
        ShortcutBinding::new("MediaPlayPause", "play-pause"),
        ShortcutBinding::new("CommandOrControl+Shift+N", "new-text-file"),
        ShortcutBinding::new("CommandOrControl+Shift+D", "next-file"),
        ShortcutBinding::new("MediaNextTrack", "next-file"),
        ShortcutBinding::new("CommandOrControl+Shift+A", "previous-file"),
        ShortcutBinding::new("MediaPreviousTrack", "previous-file"),
        ShortcutBinding::new("CommandOrControl+Shift+W", "show-main-window"),
    ]
}

pub struct ShortcutRegistrar {
    backend: Arc<dyn HotkeyBackend>,
    bindings: Arc<StdMutex<HashMap<HotkeyToken, String>>>,
}

impl ShortcutRegistrar {
    /// Create the registrar and start forwarding fired tokens from
    /// `fired_rx` as action names on `action_tx`.
    pub fn new(
        backend: Arc<dyn HotkeyBackend>,
        mut fired_rx: mpsc::UnboundedReceiver<HotkeyToken>,
        action_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        let bindings: Arc<StdMutex<HashMap<HotkeyToken, String>>> =
            Arc::new(StdMutex::new(HashMap::new()));
        let forward = bindings.clone();
        tokio::spawn(async move {
            while let Some(token) = fired_rx.recv().await {
                let action = forward
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .get(&token)
                    .cloned();
                match action {
                    Some(action) => {
                        tracing::debug!("shortcut fired: {}", action);
                        if action_tx.send(action).is_err() {
                            break;
                        }
                    }
                    None => tracing::debug!("fired token {} has no binding", token),
                }
            }
        });
        Self { backend, bindings }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<HotkeyToken, String>> {
        self.bindings.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace the active set. A binding the backend rejects is logged and
    /// skipped; the rest of the set still registers.
    pub fn enable(&self, set: &[ShortcutBinding]) {
        self.disable();
        let mut bindings = self.lock();
        for binding in set {
            match self.backend.register(&binding.keys) {
                Ok(token) => {
                    bindings.insert(token, binding.action.clone());
                }
                Err(e) => tracing::warn!("{}", e),
            }
        }
        tracing::info!("registered {} global shortcuts", bindings.len());
    }

    /// Unregister everything. Safe to call when nothing is registered.
    pub fn disable(&self) {
        let tokens: Vec<HotkeyToken> = {
            let mut bindings = self.lock();
            bindings.drain().map(|(token, _)| token).collect()
        };
        for token in &tokens {
            self.backend.unregister(*token);
        }
        if !tokens.is_empty() {
            tracing::info!("unregistered {} global shortcuts", tokens.len());
        }
    }

    pub fn binding_count(&self) -> usize {
        self.lock().len()
    }
}
