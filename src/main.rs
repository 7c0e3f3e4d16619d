//! Shelfmark core daemon entry point.

use shelfmark_core::config::GlobalConfig;
use shelfmark_core::orchestrator::state::ShutdownReason;
use shelfmark_core::orchestrator::{LaunchOptions, Orchestrator, RestartPolicy};
use shelfmark_core::platform::hotkeys::{DisabledHotkeys, NativeHotkeys};
use shelfmark_core::platform::native::NativePlatform;
use shelfmark_core::platform::HostPlatform;
use shelfmark_core::shortcuts::HotkeyBackend;
use shelfmark_core::windows::{DetachedShell, WindowShell};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("fatal: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let launch = LaunchOptions::parse(std::env::args().skip(1));
    if launch.portable {
        tracing::info!("running in portable mode");
    }

    let platform = Arc::new(NativePlatform::new(launch.portable));
    let config = GlobalConfig::load(&platform.user_data_dir());

    let (fired_tx, fired_rx) = mpsc::unbounded_channel();
    let hotkeys: Arc<dyn HotkeyBackend> = match NativeHotkeys::start(fired_tx) {
        Ok(native) => Arc::new(native),
        Err(e) => {
            tracing::warn!("{}, global shortcuts disabled", e);
            Arc::new(DisabledHotkeys)
        }
    };

    // the UI shell attaches here; without one the core runs headless
    let shell: Arc<dyn WindowShell> = Arc::new(DetachedShell);

    let (orchestrator, channels) = Orchestrator::new(
        platform,
        config,
        shell,
        hotkeys,
        fired_rx,
        launch,
        RestartPolicy::default(),
    );

    let control = orchestrator.control_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received");
            let _ = control.send(ShutdownReason::Quit);
        }
    });

    let reason = orchestrator.run(channels).await?;
    tracing::info!("exited: {:?}", reason);
    Ok(())
}
