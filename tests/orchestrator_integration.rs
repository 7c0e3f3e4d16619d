//! End-to-end scenarios driving the orchestrator through its seams.

#![cfg(unix)]

use async_trait::async_trait;
use serde_json::{json, Value};
use shelfmark_core::bus::Command;
use shelfmark_core::config::GlobalConfig;
use shelfmark_core::orchestrator::state::{AppState, ShutdownReason};
use shelfmark_core::orchestrator::{LaunchOptions, Orchestrator, OrchestratorChannels, RestartPolicy};
use shelfmark_core::platform::{DevicePaths, HostPlatform, TrashOutcome};
use shelfmark_core::shortcuts::{HotkeyBackend, HotkeyError, HotkeyToken};
use shelfmark_core::windows::{DeliveryError, ShellError, WindowId, WindowShell, WindowSpec};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;

// ---------------------------------------------------------------------------
// seams
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingShell {
    opened: Mutex<Vec<WindowSpec>>,
    shown: Mutex<Vec<WindowId>>,
    navigated: Mutex<Vec<(WindowId, String)>>,
    delivered: Mutex<Vec<(WindowId, String, Value)>>,
}

impl RecordingShell {
    fn delivered_named(&self, event: &str) -> Vec<Value> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, name, _)| name == event)
            .map(|(_, _, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl WindowShell for RecordingShell {
    async fn open(&self, spec: WindowSpec) -> Result<(), ShellError> {
        self.opened.lock().unwrap().push(spec);
        Ok(())
    }

    async fn navigate(&self, id: WindowId, url: &str) -> Result<(), ShellError> {
        self.navigated.lock().unwrap().push((id, url.to_string()));
        Ok(())
    }

    async fn show(&self, id: WindowId) {
        self.shown.lock().unwrap().push(id);
    }
    async fn focus(&self, _id: WindowId) {}
    async fn set_zoom(&self, _id: WindowId, _level: f64) {}
    async fn close(&self, _id: WindowId) {}

    async fn deliver(
        &self,
        id: WindowId,
        event: &str,
        payload: Value,
    ) -> Result<(), DeliveryError> {
        self.delivered
            .lock()
            .unwrap()
            .push((id, event.to_string(), payload));
        Ok(())
    }
}

struct TestPlatform {
    user_data: PathBuf,
}

#[async_trait]
impl HostPlatform for TestPlatform {
    fn user_data_dir(&self) -> PathBuf {
        self.user_data.clone()
    }

    fn app_data_dir(&self) -> PathBuf {
        self.user_data.join("appdata")
    }

    fn user_home(&self) -> PathBuf {
        PathBuf::from("/home/test")
    }

    fn app_version(&self) -> String {
        "0.0.0-test".into()
    }

    fn quit_on_all_windows_closed(&self) -> bool {
        true
    }

    fn device_paths(&self) -> DevicePaths {
        DevicePaths {
            desktop_folder: Some(PathBuf::from("/home/test/Desktop")),
            documents_folder: Some(PathBuf::from("/home/test/Documents")),
            ..Default::default()
        }
    }

    async fn pick_directories(&self) -> Option<Vec<PathBuf>> {
        None
    }

    async fn move_to_trash(&self, files: Vec<PathBuf>) -> Vec<TrashOutcome> {
        files
            .into_iter()
            .map(|file| TrashOutcome {
                path: file.to_string_lossy().into_owned(),
                success: true,
                error: None,
            })
            .collect()
    }

    fn open_external(&self, _target: &str) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct FakeHotkeys {
    next: AtomicU32,
    registered: Mutex<HashSet<HotkeyToken>>,
}

impl HotkeyBackend for FakeHotkeys {
    fn register(&self, _keys: &str) -> Result<HotkeyToken, HotkeyError> {
        let token = self.next.fetch_add(1, Ordering::SeqCst);
        self.registered.lock().unwrap().insert(token);
        Ok(token)
    }

    fn unregister(&self, token: HotkeyToken) {
        self.registered.lock().unwrap().remove(&token);
    }
}

// ---------------------------------------------------------------------------
// harness
// ---------------------------------------------------------------------------

struct Harness {
    orchestrator: Arc<Orchestrator>,
    channels: Option<OrchestratorChannels>,
    shell: Arc<RecordingShell>,
    hotkeys: Arc<FakeHotkeys>,
    fired_tx: mpsc::UnboundedSender<HotkeyToken>,
    _tmp: TempDir,
}

fn worker_config(user_data: &Path, script: &str, port: u16) -> GlobalConfig {
    let mut cfg = GlobalConfig::default();
    // `sh -c <script> worker` ignores the appended -p/-k arguments
    cfg.worker.executable = Some(PathBuf::from("/bin/sh"));
    cfg.worker.args = vec!["-c".into(), script.into(), "worker".into()];
    cfg.worker.preferred_port = Some(port);
    cfg.worker.service_key = Some("test-key".into());
    cfg.plugin_root = Some(user_data.join("plugins"));
    cfg
}

fn harness(script: &str, port: u16, policy: RestartPolicy) -> Harness {
    let tmp = TempDir::new().unwrap();
    let config = worker_config(tmp.path(), script, port);
    std::fs::create_dir_all(tmp.path().join("plugins")).unwrap();

    let shell = Arc::new(RecordingShell::default());
    let hotkeys = Arc::new(FakeHotkeys::default());
    let (fired_tx, fired_rx) = mpsc::unbounded_channel();

    let (orchestrator, channels) = Orchestrator::new(
        Arc::new(TestPlatform {
            user_data: tmp.path().to_path_buf(),
        }),
        config,
        shell.clone(),
        hotkeys.clone(),
        fired_rx,
        LaunchOptions::default(),
        policy,
    );

    Harness {
        orchestrator,
        channels: Some(channels),
        shell,
        hotkeys,
        fired_tx,
        _tmp: tmp,
    }
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn device_paths_answer_without_any_window() {
    let h = harness("sleep 30", 48300, RestartPolicy::default());
    // no run(), no windows: queries still work
    let value = h
        .orchestrator
        .bus()
        .query(WindowId::new(), "get-device-paths", Value::Null)
        .await
        .unwrap();
    assert_eq!(value["desktopFolder"], "/home/test/Desktop");
    assert_eq!(value["documentsFolder"], "/home/test/Documents");
    assert!(value.get("iCloudFolder").is_none() || cfg!(target_os = "macos"));
}

#[tokio::test]
async fn remove_extension_strips_build_suffix() {
    let h = harness("sleep 30", 48310, RestartPolicy::default());
    let plugins = h._tmp.path().join("plugins");
    let ext = plugins.join("abc");
    std::fs::create_dir_all(ext.join("build")).unwrap();
    std::fs::write(ext.join("manifest.json"), "{}").unwrap();

    h.orchestrator
        .bus()
        .submit(WindowId::new(), Command::new("remove-extension", json!("abc/build")))
        .await;

    wait_until("extension removal", || !ext.exists()).await;
    assert!(plugins.exists());
}

#[tokio::test]
async fn startup_pushes_worker_port_and_quit_ends_the_run() {
    let mut h = harness("sleep 30", 48320, RestartPolicy::default());
    let channels = h.channels.take().unwrap();
    let run = tokio::spawn(h.orchestrator.clone().run(channels));

    let shell = h.shell.clone();
    wait_until("primary window", || !shell.opened.lock().unwrap().is_empty()).await;
    wait_until("start_ws push", || {
        !shell.delivered_named("start_ws").is_empty()
    })
    .await;
    let pushes = shell.delivered_named("start_ws");
    let port = pushes[0]["port"].as_u64().unwrap() as u16;
    assert!((48320..48320 + 50).contains(&port));

    // primary opens hidden, startup payload free
    assert!(!h.shell.opened.lock().unwrap()[0].visible);

    h.orchestrator
        .bus()
        .submit(WindowId::new(), Command::new("quit-application", Value::Null))
        .await;

    let reason = timeout(Duration::from_secs(10), run)
        .await
        .expect("run did not finish")
        .unwrap()
        .unwrap();
    assert_eq!(reason, ShutdownReason::Quit);
    assert_eq!(h.orchestrator.app_state(), AppState::Terminated);
    assert!(h.orchestrator.workers().port().await.is_none());
}

#[tokio::test]
async fn crashing_worker_restarts_once_then_escalates() {
    let policy = RestartPolicy {
        backoff: Duration::from_millis(20),
        escalation_window: Duration::from_secs(60),
    };
    let mut h = harness("exit 7", 48330, policy);
    let channels = h.channels.take().unwrap();
    let run = tokio::spawn(h.orchestrator.clone().run(channels));

    // crash -> one retry -> second crash inside the window -> notification
    let shell = h.shell.clone();
    wait_until("worker_unavailable push", || {
        !shell.delivered_named("worker_unavailable").is_empty()
    })
    .await;

    // the app stays up: the UI decides what to do next
    assert_eq!(h.orchestrator.app_state(), AppState::Ready);

    h.orchestrator
        .control_handle()
        .send(ShutdownReason::Quit)
        .unwrap();
    let reason = timeout(Duration::from_secs(10), run)
        .await
        .expect("run did not finish")
        .unwrap()
        .unwrap();
    assert_eq!(reason, ShutdownReason::Quit);
}

#[tokio::test]
async fn quit_is_handled_promptly_during_restart_backoff() {
    let policy = RestartPolicy {
        backoff: Duration::from_secs(5),
        escalation_window: Duration::from_secs(60),
    };
    let mut h = harness("exit 7", 48390, policy);
    let channels = h.channels.take().unwrap();
    let run = tokio::spawn(h.orchestrator.clone().run(channels));

    let shell = h.shell.clone();
    wait_until("primary window", || !shell.opened.lock().unwrap().is_empty()).await;
    // let the crash land and the retry get scheduled
    tokio::time::sleep(Duration::from_millis(300)).await;

    let asked = std::time::Instant::now();
    h.orchestrator
        .control_handle()
        .send(ShutdownReason::Quit)
        .unwrap();
    let reason = timeout(Duration::from_secs(2), run)
        .await
        .expect("loop blocked through the backoff")
        .unwrap()
        .unwrap();
    assert_eq!(reason, ShutdownReason::Quit);
    // well inside the 5s backoff
    assert!(asked.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn relaunch_app_reloads_primary_in_place() {
    let mut h = harness("sleep 30", 48400, RestartPolicy::default());
    let channels = h.channels.take().unwrap();
    let run = tokio::spawn(h.orchestrator.clone().run(channels));

    let shell = h.shell.clone();
    wait_until("primary window", || !shell.opened.lock().unwrap().is_empty()).await;
    let primary = h.shell.opened.lock().unwrap()[0].id;

    h.orchestrator
        .bus()
        .submit(WindowId::new(), Command::new("relaunch-app", Value::Null))
        .await;
    wait_until("primary navigation", || {
        !shell.navigated.lock().unwrap().is_empty()
    })
    .await;

    let navigated = h.shell.navigated.lock().unwrap().clone();
    assert_eq!(navigated[0], (primary, "app://index.html".to_string()));
    // the window is brought to front, the process keeps running
    assert!(h.shell.shown.lock().unwrap().contains(&primary));
    assert_eq!(h.orchestrator.app_state(), AppState::Ready);
    assert_eq!(h.orchestrator.windows().window_count().await, 1);

    h.orchestrator
        .control_handle()
        .send(ShutdownReason::Quit)
        .unwrap();
    let _ = timeout(Duration::from_secs(10), run).await;
}

#[tokio::test]
async fn shortcut_actions_reveal_the_primary_window() {
    let mut h = harness("sleep 30", 48410, RestartPolicy::default());
    let channels = h.channels.take().unwrap();
    let run = tokio::spawn(h.orchestrator.clone().run(channels));

    let shell = h.shell.clone();
    wait_until("primary window", || !shell.opened.lock().unwrap().is_empty()).await;
    let primary = h.shell.opened.lock().unwrap()[0].id;

    h.orchestrator
        .bus()
        .submit(WindowId::new(), Command::new("global-shortcuts-enabled", json!(true)))
        .await;
    let orchestrator = h.orchestrator.clone();
    wait_until("shortcuts registered", || {
        orchestrator.shortcuts().binding_count() > 0
    })
    .await;

    // tokens are handed out in binding order: 0 open-search, 4 next-file
    h.fired_tx.send(4).unwrap();
    wait_until("next-file cmd", || {
        shell.delivered_named("cmd").contains(&json!("next-file"))
    })
    .await;
    // media-style navigation stays in the background
    assert!(h.shell.shown.lock().unwrap().is_empty());

    h.fired_tx.send(0).unwrap();
    wait_until("open-search cmd", || {
        shell.delivered_named("cmd").contains(&json!("open-search"))
    })
    .await;
    assert!(h.shell.shown.lock().unwrap().contains(&primary));

    h.orchestrator
        .control_handle()
        .send(ShutdownReason::Quit)
        .unwrap();
    let _ = timeout(Duration::from_secs(10), run).await;
}

#[tokio::test]
async fn shortcut_toggle_round_trip_leaves_no_bindings() {
    let h = harness("sleep 30", 48340, RestartPolicy::default());
    let sender = WindowId::new();

    h.orchestrator
        .bus()
        .submit(sender, Command::new("global-shortcuts-enabled", json!(true)))
        .await;
    let orchestrator = h.orchestrator.clone();
    wait_until("shortcuts registered", || {
        orchestrator.shortcuts().binding_count() > 0
    })
    .await;

    h.orchestrator
        .bus()
        .submit(sender, Command::new("global-shortcuts-enabled", json!(false)))
        .await;
    wait_until("shortcuts unregistered", || {
        orchestrator.shortcuts().binding_count() == 0
    })
    .await;
    assert!(h.hotkeys.registered.lock().unwrap().is_empty());
}

#[tokio::test]
async fn load_extensions_broadcasts_the_scan() {
    let mut h = harness("sleep 30", 48350, RestartPolicy::default());
    let plugins = h._tmp.path().join("plugins");
    let ext = plugins.join("md");
    std::fs::create_dir_all(&ext).unwrap();
    std::fs::write(
        ext.join("manifest.json"),
        json!({
            "id": "md",
            "name": "Markdown viewer",
            "version": "1.0.0",
            "fileTypes": ["md"],
        })
        .to_string(),
    )
    .unwrap();

    let channels = h.channels.take().unwrap();
    let run = tokio::spawn(h.orchestrator.clone().run(channels));
    let shell = h.shell.clone();
    wait_until("primary window", || !shell.opened.lock().unwrap().is_empty()).await;

    h.orchestrator
        .bus()
        .submit(WindowId::new(), Command::new("load-extensions", Value::Null))
        .await;
    wait_until("set_extensions push", || {
        !shell.delivered_named("set_extensions").is_empty()
    })
    .await;
    let pushes = shell.delivered_named("set_extensions");
    assert_eq!(pushes[0]["extensions"][0]["id"], "md");
    assert_eq!(pushes[0]["supportedFileTypes"], json!(["md"]));

    h.orchestrator
        .control_handle()
        .send(ShutdownReason::Quit)
        .unwrap();
    let _ = timeout(Duration::from_secs(10), run).await;
}

#[tokio::test]
async fn cancelled_directory_dialog_reports_false() {
    let h = harness("sleep 30", 48360, RestartPolicy::default());
    let value = h
        .orchestrator
        .bus()
        .query(WindowId::new(), "select-directory-dialog", Value::Null)
        .await
        .unwrap();
    assert_eq!(value, json!(false));
}

#[tokio::test]
async fn path_and_version_queries_answer_directly() {
    let h = harness("sleep 30", 48380, RestartPolicy::default());
    let bus = h.orchestrator.bus();
    let sender = WindowId::new();

    let user_data = bus.query(sender, "get-user-data", Value::Null).await.unwrap();
    assert_eq!(user_data.as_str().unwrap(), h._tmp.path().to_string_lossy());

    let home = bus.query(sender, "get-user-home-path", Value::Null).await.unwrap();
    assert_eq!(home, json!("/home/test"));

    let version = bus.query(sender, "app-version-request", Value::Null).await.unwrap();
    assert_eq!(version, json!("0.0.0-test"));

    let app_data = bus.query(sender, "app-data-path-request", Value::Null).await.unwrap();
    assert!(app_data.as_str().unwrap().ends_with("appdata"));
}

#[tokio::test]
async fn move_to_trash_reports_per_file_outcomes() {
    let h = harness("sleep 30", 48370, RestartPolicy::default());
    let value = h
        .orchestrator
        .bus()
        .query(
            WindowId::new(),
            "move-to-trash",
            json!(["/tmp/a.txt", "/tmp/b.txt"]),
        )
        .await
        .unwrap();
    let outcomes = value.as_array().unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0]["success"], true);
    assert_eq!(outcomes[1]["path"], "/tmp/b.txt");
}
