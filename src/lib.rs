//! Process-orchestration and command-bus core for the Shelfmark desktop
//! file organizer.
//!
//! The UI surfaces (window rendering, dialogs, menus) live outside this
//! crate and plug in through the `WindowShell`, `HostPlatform` and
//! `HotkeyBackend` seams.

pub mod bus;
pub mod config;
pub mod extensions;
pub mod orchestrator;
pub mod platform;
pub mod ports;
pub mod shortcuts;
pub mod utils;
pub mod windows;
pub mod worker;
