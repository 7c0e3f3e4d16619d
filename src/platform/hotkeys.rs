//! `global-hotkey` backed shortcut backend.
//!
//! `GlobalHotKeyManager` is tied to the thread that created it, so the
//! backend runs a dedicated OS thread that owns the manager, services
//! register/unregister requests from a channel, and pumps fired events back
//! into the async world. Accelerator strings use the familiar
//! `CommandOrControl+Shift+F` style and are translated to the crate's key
//! naming before parsing.

use crate::shortcuts::{HotkeyBackend, HotkeyError, HotkeyToken};
use global_hotkey::hotkey::HotKey;
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use std::collections::HashMap;
use std::sync::mpsc as std_mpsc;
use std::time::Duration;
use tokio::sync::mpsc;

enum Op {
    Register(String, std_mpsc::Sender<Result<HotkeyToken, HotkeyError>>),
    Unregister(HotkeyToken),
}

pub struct NativeHotkeys {
    ops_tx: std_mpsc::Sender<Op>,
}

impl NativeHotkeys {
    /// Start the backend thread. Fails when no hotkey manager can be created
    /// (headless session); callers fall back to `DisabledHotkeys`.
    pub fn start(fired_tx: mpsc::UnboundedSender<HotkeyToken>) -> anyhow::Result<Self> {
        let (ops_tx, ops_rx) = std_mpsc::channel::<Op>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), String>>();

        std::thread::Builder::new()
            .name("hotkeys".into())
            .spawn(move || run_backend(ops_rx, ready_tx, fired_tx))?;

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => Ok(Self { ops_tx }),
            Ok(Err(detail)) => Err(anyhow::anyhow!("hotkey manager unavailable: {}", detail)),
            Err(e) => Err(anyhow::anyhow!("hotkey backend did not start: {}", e)),
        }
    }
}

impl HotkeyBackend for NativeHotkeys {
    fn register(&self, keys: &str) -> Result<HotkeyToken, HotkeyError> {
        let (reply_tx, reply_rx) = std_mpsc::channel();
        let op = Op::Register(keys.to_string(), reply_tx);
        if self.ops_tx.send(op).is_err() {
            return Err(HotkeyError {
                keys: keys.to_string(),
                detail: "hotkey backend is gone".into(),
            });
        }
        reply_rx
            .recv_timeout(Duration::from_secs(5))
            .unwrap_or_else(|e| {
                Err(HotkeyError {
                    keys: keys.to_string(),
                    detail: e.to_string(),
                })
            })
    }

    fn unregister(&self, token: HotkeyToken) {
        if self.ops_tx.send(Op::Unregister(token)).is_err() {
            tracing::debug!("unregister after hotkey backend shutdown");
        }
    }
}

fn run_backend(
    ops_rx: std_mpsc::Receiver<Op>,
    ready_tx: std_mpsc::Sender<Result<(), String>>,
    fired_tx: mpsc::UnboundedSender<HotkeyToken>,
) {
    let manager = match GlobalHotKeyManager::new() {
        Ok(manager) => {
            let _ = ready_tx.send(Ok(()));
            manager
        }
        Err(e) => {
            let _ = ready_tx.send(Err(e.to_string()));
            return;
        }
    };

    let events = GlobalHotKeyEvent::receiver();
    let mut registered: HashMap<HotkeyToken, HotKey> = HashMap::new();

    loop {
        match ops_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(Op::Register(keys, reply)) => {
                let _ = reply.send(register_one(&manager, &mut registered, &keys));
            }
            Ok(Op::Unregister(token)) => {
                if let Some(hotkey) = registered.remove(&token) {
                    if let Err(e) = manager.unregister(hotkey) {
                        tracing::warn!("failed to unregister hotkey: {}", e);
                    }
                }
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }

        while let Ok(event) = events.try_recv() {
            if event.state == HotKeyState::Pressed && fired_tx.send(event.id).is_err() {
                return;
            }
        }
    }

    for hotkey in registered.into_values() {
        let _ = manager.unregister(hotkey);
    }
}

fn register_one(
    manager: &GlobalHotKeyManager,
    registered: &mut HashMap<HotkeyToken, HotKey>,
    keys: &str,
) -> Result<HotkeyToken, HotkeyError> {
    let translated = translate_accelerator(keys);
    let hotkey: HotKey = translated.parse().map_err(|e| HotkeyError {
        keys: keys.to_string(),
        detail: format!("{}", e),
    })?;
    manager.register(hotkey).map_err(|e| HotkeyError {
        keys: keys.to_string(),
        detail: e.to_string(),
    })?;
    let token = hotkey.id();
    registered.insert(token, hotkey);
    Ok(token)
}

/// Translate accelerator spelling to the hotkey crate's key naming.
fn translate_accelerator(keys: &str) -> String {
    keys.split('+')
        .map(|part| match part {
            "CommandOrControl" => "CmdOrCtrl".to_string(),
            "MediaNextTrack" => "MediaTrackNext".to_string(),
            "MediaPreviousTrack" => "MediaTrackPrevious".to_string(),
            other => {
                let mut chars = other.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii_alphabetic() => {
                        format!("Key{}", c.to_ascii_uppercase())
                    }
                    (Some(c), None) if c.is_ascii_digit() => format!("Digit{}", c),
                    _ => other.to_string(),
                }
            }
        })
        .collect::<Vec<_>>()
        .join("+")
}

/// Backend used when no hotkey manager is available; every registration
/// fails and is skipped by the registrar.
pub struct DisabledHotkeys;

impl HotkeyBackend for DisabledHotkeys {
    fn register(&self, keys: &str) -> Result<HotkeyToken, HotkeyError> {
        Err(HotkeyError {
            keys: keys.to_string(),
            detail: "global shortcuts are disabled in this session".into(),
        })
    }

    fn unregister(&self, _token: HotkeyToken) {}
}
