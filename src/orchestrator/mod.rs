//! Top-level wiring and the orchestration loop.
//!
//! The orchestrator owns every component, registers the command surface on
//! the bus, and runs the single coordination loop: worker exit notices,
//! shortcut actions, and shutdown requests all funnel through one `select!`.

pub mod state;

use crate::bus::CommandBus;
use crate::config::GlobalConfig;
use crate::extensions::ExtensionLoader;
use crate::platform::HostPlatform;
use crate::ports::PortAllocator;
use crate::shortcuts::{default_bindings, HotkeyBackend, HotkeyToken, ShortcutRegistrar};
use crate::windows::{WindowManager, WindowShell, WindowStateStore};
use crate::worker::{WorkerCommand, WorkerExit, WorkerSupervisor};
use serde_json::{json, Value};
use state::{AppState, AppStateMachine, ShutdownReason};
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Command-line launch switches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchOptions {
    /// Keep user data under `<cwd>/profile` instead of the OS location.
    pub portable: bool,
    /// File path to open in the primary window at startup.
    pub startup_path: Option<String>,
}

impl LaunchOptions {
    /// Scan argv (without the program name). `-p`/`--portable` switches
    /// portable mode on and suppresses any startup path; the last bare token
    /// is the startup file path.
    pub fn parse<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut options = LaunchOptions::default();
        for arg in args {
            match arg.as_str() {
                "-p" | "--portable" => options.portable = true,
                flag if flag.starts_with('-') => {
                    tracing::debug!("ignoring unknown flag '{}'", flag)
                }
                path => options.startup_path = Some(path.to_string()),
            }
        }
        if options.portable {
            options.startup_path = None;
        }
        options
    }
}

/// Automatic worker restart behavior after an unexpected exit.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    /// Delay before the retry spawn.
    pub backoff: Duration,
    /// A second unexpected exit within this window stops further retries.
    pub escalation_window: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(2),
            escalation_window: Duration::from_secs(60),
        }
    }
}

/// Receivers consumed by `run()`; kept apart so handlers only ever hold
/// senders.
pub struct OrchestratorChannels {
    exit_rx: mpsc::UnboundedReceiver<WorkerExit>,
    action_rx: mpsc::UnboundedReceiver<String>,
    control_rx: mpsc::UnboundedReceiver<ShutdownReason>,
}

pub struct Orchestrator {
    platform: Arc<dyn HostPlatform>,
    windows: Arc<WindowManager>,
    workers: Arc<WorkerSupervisor>,
    extensions: Arc<ExtensionLoader>,
    shortcuts: Arc<ShortcutRegistrar>,
    bus: Arc<CommandBus>,
    restart_policy: RestartPolicy,
    state: StdMutex<AppStateMachine>,
    language: Arc<StdMutex<String>>,
    control_tx: mpsc::UnboundedSender<ShutdownReason>,
    startup_path: Option<String>,
    configured_language: String,
}

impl Orchestrator {
    pub fn new(
        platform: Arc<dyn HostPlatform>,
        config: GlobalConfig,
        shell: Arc<dyn WindowShell>,
        hotkeys: Arc<dyn HotkeyBackend>,
        fired_rx: mpsc::UnboundedReceiver<HotkeyToken>,
        launch: LaunchOptions,
        restart_policy: RestartPolicy,
    ) -> (Arc<Self>, OrchestratorChannels) {
        let user_data = platform.user_data_dir();

        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let workers = Arc::new(WorkerSupervisor::new(
            WorkerCommand {
                program: config.worker_executable(),
                base_args: config.worker.args.clone(),
            },
            config.service_key(),
            config.preferred_port(),
            Arc::new(PortAllocator::new()),
            exit_tx,
        ));

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (quit_tx, mut quit_rx) = mpsc::unbounded_channel::<()>();
        {
            // last-window-closed becomes a regular shutdown request
            let control_tx = control_tx.clone();
            tokio::spawn(async move {
                while quit_rx.recv().await.is_some() {
                    if control_tx.send(ShutdownReason::AllWindowsClosed).is_err() {
                        break;
                    }
                }
            });
        }

        let windows = Arc::new(WindowManager::new(
            shell,
            WindowStateStore::new(user_data.join("window-state.json")),
            config.entry_url(),
            config.default_width(),
            config.default_height(),
            platform.quit_on_all_windows_closed(),
            quit_tx,
        ));

        let extensions = Arc::new(ExtensionLoader::new(config.plugin_root(&user_data)));

        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let shortcuts = Arc::new(ShortcutRegistrar::new(hotkeys, fired_rx, action_tx));

        let orchestrator = Arc::new(Self {
            platform,
            windows,
            workers,
            extensions,
            shortcuts,
            bus: Arc::new(CommandBus::new()),
            restart_policy,
            state: StdMutex::new(AppStateMachine::new()),
            language: Arc::new(StdMutex::new(config.language())),
            control_tx,
            startup_path: launch.startup_path,
            configured_language: config.language(),
        });
        orchestrator.register_handlers();

        (
            orchestrator,
            OrchestratorChannels {
                exit_rx,
                action_rx,
                control_rx,
            },
        )
    }

    pub fn bus(&self) -> &Arc<CommandBus> {
        &self.bus
    }

    pub fn windows(&self) -> &Arc<WindowManager> {
        &self.windows
    }

    pub fn workers(&self) -> &Arc<WorkerSupervisor> {
        &self.workers
    }

    pub fn shortcuts(&self) -> &Arc<ShortcutRegistrar> {
        &self.shortcuts
    }

    pub fn control_handle(&self) -> mpsc::UnboundedSender<ShutdownReason> {
        self.control_tx.clone()
    }

    pub fn language(&self) -> String {
        self.language
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn transition(&self, to: AppState) -> anyhow::Result<()> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .transition(to)?;
        Ok(())
    }

    pub fn app_state(&self) -> AppState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).current()
    }

    /// Run to completion: startup, the event loop, shutdown. The returned
    /// reason tells the caller whether to relaunch. Errors out of here are
    /// fatal for the process.
    pub async fn run(
        self: Arc<Self>,
        mut channels: OrchestratorChannels,
    ) -> anyhow::Result<ShutdownReason> {
        tracing::info!("language set to '{}'", self.configured_language);

        let worker_port = match self.workers.start(None).await {
            Ok(handle) => Some(handle.port),
            Err(e) => {
                tracing::error!("worker failed to start: {}", e);
                None
            }
        };

        self.transition(AppState::Ready)?;

        let primary = self
            .windows
            .create_primary(self.startup_path.as_deref())
            .await?;
        match worker_port {
            Some(port) => {
                self.windows
                    .send_to(primary, "start_ws", json!({ "port": port }))
                    .await
            }
            None => {
                self.windows
                    .send_to(primary, "worker_unavailable", Value::Null)
                    .await
            }
        }

        let mut last_crash: Option<Instant> = None;
        let mut retries_suspended = false;
        // armed by a crash, polled by the loop so backoff never blocks it
        let mut retry_pending = false;
        let retry_timer = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(retry_timer);

        loop {
            tokio::select! {
                () = &mut retry_timer, if retry_pending => {
                    retry_pending = false;
                    match self.workers.start(None).await {
                        Ok(handle) => {
                            self.windows
                                .broadcast("start_ws", json!({ "port": handle.port }))
                                .await;
                        }
                        Err(e) => {
                            tracing::error!("worker restart failed: {}", e);
                            retries_suspended = true;
                            self.windows.broadcast("worker_unavailable", Value::Null).await;
                        }
                    }
                }
                Some(exit) = channels.exit_rx.recv() => {
                    if exit.expected {
                        tracing::debug!("worker {} stopped deliberately", exit.pid);
                        continue;
                    }
                    if retries_suspended {
                        tracing::debug!("worker exit after escalation, not retrying");
                        continue;
                    }
                    let now = Instant::now();
                    let escalate = last_crash
                        .map(|at| now.duration_since(at) < self.restart_policy.escalation_window)
                        .unwrap_or(false);
                    if escalate {
                        tracing::error!(
                            "worker crashed twice within {:?}, giving up: {}",
                            self.restart_policy.escalation_window,
                            exit.detail
                        );
                        retries_suspended = true;
                        retry_pending = false;
                        self.windows.broadcast("worker_unavailable", Value::Null).await;
                        continue;
                    }
                    last_crash = Some(now);
                    tracing::warn!("worker crashed ({}), restarting", exit.detail);
                    retry_timer
                        .as_mut()
                        .reset(tokio::time::Instant::now() + self.restart_policy.backoff);
                    retry_pending = true;
                }
                Some(action) = channels.action_rx.recv() => {
                    if let Err(e) = self.handle_action(&action).await {
                        tracing::warn!("action '{}' failed: {}, reloading primary", action, e);
                        // last resort; a failure here takes the process down
                        self.windows.reload_primary().await?;
                    }
                }
                Some(reason) = channels.control_rx.recv() => {
                    tracing::info!("shutting down: {:?}", reason);
                    self.shutdown().await;
                    return Ok(reason);
                }
                else => {
                    self.shutdown().await;
                    return Ok(ShutdownReason::Quit);
                }
            }
        }
    }

    async fn handle_action(&self, action: &str) -> anyhow::Result<()> {
        match action {
            "show-main-window" => self.windows.show_primary().await,
            "play-pause" => {
                self.windows.broadcast("play-pause", json!(true)).await;
                Ok(())
            }
            other => {
                // media-style actions stay in the background, the rest bring
                // the window to front first
                if !matches!(other, "next-file" | "previous-file") {
                    self.windows.show_primary().await?;
                }
                match self.windows.primary_id().await {
                    Some(primary) => self.windows.send_to(primary, "cmd", json!(other)).await,
                    None => tracing::debug!("no primary window for action '{}'", other),
                }
                Ok(())
            }
        }
    }

    async fn shutdown(&self) {
        if let Err(e) = self.transition(AppState::ShuttingDown) {
            tracing::debug!("{}", e);
        }
        self.workers.stop().await;
        self.shortcuts.disable();
        self.windows.release_all().await;
        if let Err(e) = self.transition(AppState::Terminated) {
            tracing::debug!("{}", e);
        }
    }

    // -----------------------------------------------------------------------
    // command surface
    // -----------------------------------------------------------------------

    fn register_handlers(&self) {
        let bus = &self.bus;

        {
            let windows = self.windows.clone();
            bus.on_notify("show-main-window", move |_win, _payload| {
                let windows = windows.clone();
                async move {
                    if let Err(e) = windows.show_primary().await {
                        tracing::warn!("show-main-window failed: {}", e);
                    }
                }
            });
        }

        {
            let windows = self.windows.clone();
            let workers = self.workers.clone();
            bus.on_notify("create-new-window", move |_win, payload| {
                let windows = windows.clone();
                let workers = workers.clone();
                async move {
                    let url = payload
                        .as_str()
                        .or_else(|| payload.get("url").and_then(Value::as_str))
                        .map(str::to_string);
                    match windows.create_secondary(url.as_deref()).await {
                        Ok(id) => {
                            if let Some(port) = workers.port().await {
                                windows.send_to(id, "start_ws", json!({ "port": port })).await;
                            }
                        }
                        Err(e) => tracing::warn!("create-new-window failed: {}", e),
                    }
                }
            });
        }

        {
            let extensions = self.extensions.clone();
            let windows = self.windows.clone();
            bus.on_notify("load-extensions", move |_win, _payload| {
                let extensions = extensions.clone();
                let windows = windows.clone();
                async move {
                    let scan = extensions.load_all().await;
                    match serde_json::to_value(&scan) {
                        Ok(value) => windows.broadcast("set_extensions", value).await,
                        Err(e) => tracing::warn!("failed to serialize extension scan: {}", e),
                    }
                }
            });
        }

        {
            let extensions = self.extensions.clone();
            bus.on_notify("remove-extension", move |_win, payload| {
                let extensions = extensions.clone();
                async move {
                    match payload.as_str() {
                        Some(id) => extensions.remove(id).await,
                        None => tracing::warn!("remove-extension without an id"),
                    }
                }
            });
        }

        {
            let windows = self.windows.clone();
            bus.on_notify("focus-window", move |win, _payload| {
                let windows = windows.clone();
                async move { windows.focus(win).await }
            });
        }

        {
            let language = self.language.clone();
            bus.on_notify("set-language", move |_win, payload| {
                let language = language.clone();
                async move {
                    match payload.as_str() {
                        Some(code) => {
                            *language.lock().unwrap_or_else(|e| e.into_inner()) =
                                code.to_string();
                            tracing::info!("language set to '{}'", code);
                        }
                        None => tracing::warn!("set-language without a code"),
                    }
                }
            });
        }

        {
            let shortcuts = self.shortcuts.clone();
            bus.on_notify("global-shortcuts-enabled", move |_win, payload| {
                let shortcuts = shortcuts.clone();
                async move {
                    if payload.as_bool().unwrap_or(false) {
                        shortcuts.enable(&default_bindings());
                    } else {
                        shortcuts.disable();
                    }
                }
            });
        }

        {
            // reloads the primary window's content in place
            let windows = self.windows.clone();
            bus.on_notify("relaunch-app", move |_win, _payload| {
                let windows = windows.clone();
                async move {
                    if let Err(e) = windows.show_primary().await {
                        tracing::warn!("relaunch-app failed to show primary: {}", e);
                        return;
                    }
                    if let Err(e) = windows.reload_primary().await {
                        tracing::warn!("relaunch-app failed to reload primary: {}", e);
                    }
                }
            });
        }

        {
            let control = self.control_tx.clone();
            bus.on_notify("quit-application", move |_win, _payload| {
                let control = control.clone();
                async move {
                    let _ = control.send(ShutdownReason::Quit);
                }
            });
        }

        {
            // applies to the command's window: the sender, or an explicit target
            let windows = self.windows.clone();
            bus.on_notify("setZoomFactor", move |win, payload| {
                let windows = windows.clone();
                async move {
                    match payload.as_f64() {
                        Some(level) => windows.set_zoom(win, level).await,
                        None => tracing::warn!("setZoomFactor without a level"),
                    }
                }
            });
        }

        {
            let platform = self.platform.clone();
            bus.on_notify("open-files-in-firefox", move |_win, payload| {
                let platform = platform.clone();
                async move {
                    let entries = payload.as_array().cloned().unwrap_or_default();
                    for entry in entries {
                        if let Some(target) = entry.as_str() {
                            if let Err(e) = platform.open_external(target) {
                                tracing::warn!("failed to open '{}': {}", target, e);
                            }
                        }
                    }
                }
            });
        }

        {
            let platform = self.platform.clone();
            bus.on_query("get-user-data", move |_win, _payload| {
                let platform = platform.clone();
                async move { Ok(json!(platform.user_data_dir().to_string_lossy())) }
            });
        }

        {
            let platform = self.platform.clone();
            bus.on_query("get-device-paths", move |_win, _payload| {
                let platform = platform.clone();
                async move { Ok(serde_json::to_value(platform.device_paths())?) }
            });
        }

        {
            let platform = self.platform.clone();
            bus.on_query("get-user-home-path", move |_win, _payload| {
                let platform = platform.clone();
                async move { Ok(json!(platform.user_home().to_string_lossy())) }
            });
        }

        {
            let platform = self.platform.clone();
            bus.on_query("select-directory-dialog", move |_win, _payload| {
                let platform = platform.clone();
                async move {
                    match platform.pick_directories().await {
                        Some(paths) => {
                            let paths: Vec<String> = paths
                                .iter()
                                .map(|p| p.to_string_lossy().into_owned())
                                .collect();
                            Ok(json!(paths))
                        }
                        // the wire contract for a cancelled dialog
                        None => Ok(json!(false)),
                    }
                }
            });
        }

        {
            let platform = self.platform.clone();
            bus.on_query("app-data-path-request", move |_win, _payload| {
                let platform = platform.clone();
                async move { Ok(json!(platform.app_data_dir().to_string_lossy())) }
            });
        }

        {
            let platform = self.platform.clone();
            bus.on_query("app-version-request", move |_win, _payload| {
                let platform = platform.clone();
                async move { Ok(json!(platform.app_version())) }
            });
        }

        {
            let platform = self.platform.clone();
            bus.on_query("move-to-trash", move |_win, payload| {
                let platform = platform.clone();
                async move {
                    let files: Vec<PathBuf> = payload
                        .as_array()
                        .map(|entries| {
                            entries
                                .iter()
                                .filter_map(Value::as_str)
                                .map(PathBuf::from)
                                .collect()
                        })
                        .unwrap_or_default();
                    let outcomes = platform.move_to_trash(files).await;
                    Ok(serde_json::to_value(outcomes)?)
                }
            });
        }
    }
}
