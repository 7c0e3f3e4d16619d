//! Worker service supervision.
//!
//! The worker runs as a separate OS process, invoked as
//! `<executable> [base args] -p <port> -k <key>`. This module owns the single
//! live `WorkerHandle`, spawning and terminating the process and reporting
//! every exit exactly once over an mpsc channel. Readiness of the service is
//! observed asynchronously by the windows once the port is pushed to them;
//! spawn success alone moves the handle to Running.

pub mod state;

use crate::ports::{NoFreePortError, PortAllocator};
use state::{WorkerState, WorkerStateMachine};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error(transparent)]
    NoFreePort(#[from] NoFreePortError),
    #[error("failed to launch worker '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// How to invoke the worker service executable.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    pub program: PathBuf,
    /// Arguments placed before the generated `-p <port> -k <key>` pair.
    pub base_args: Vec<String>,
}

/// Snapshot of the supervised process at a point in time.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    pub pid: u32,
    pub port: u16,
    pub state: WorkerState,
    pub args: Vec<String>,
}

/// Delivered exactly once per worker lifetime, for any exit cause.
#[derive(Debug, Clone)]
pub struct WorkerExit {
    pub pid: u32,
    pub port: u16,
    /// True when a `stop()` was in flight; false for crashes.
    pub expected: bool,
    pub detail: String,
}

struct ActiveWorker {
    pid: u32,
    port: u16,
    args: Vec<String>,
    stopping: Arc<AtomicBool>,
    kill_tx: mpsc::Sender<()>,
    machine: Arc<StdMutex<WorkerStateMachine>>,
}

impl ActiveWorker {
    fn state(&self) -> WorkerState {
        self.machine
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .current()
    }

    fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    fn snapshot(&self) -> WorkerHandle {
        WorkerHandle {
            pid: self.pid,
            port: self.port,
            state: self.state(),
            args: self.args.clone(),
        }
    }
}

pub struct WorkerSupervisor {
    command: WorkerCommand,
    service_key: String,
    preferred_start: u16,
    ports: Arc<PortAllocator>,
    active: Mutex<Option<ActiveWorker>>,
    exit_tx: mpsc::UnboundedSender<WorkerExit>,
}

impl WorkerSupervisor {
    pub fn new(
        command: WorkerCommand,
        service_key: String,
        preferred_start: u16,
        ports: Arc<PortAllocator>,
        exit_tx: mpsc::UnboundedSender<WorkerExit>,
    ) -> Self {
        Self {
            command,
            service_key,
            preferred_start,
            ports,
            active: Mutex::new(None),
            exit_tx,
        }
    }

    /// Start the worker, or return the live handle unchanged when one is
    /// already Running. An explicit `preferred_port` bypasses allocation
    /// (forced port, for reproducible debugging); when it differs from the
    /// running worker's port the old worker is stopped first.
    pub async fn start(&self, preferred_port: Option<u16>) -> Result<WorkerHandle, SpawnError> {
        let mut active = self.active.lock().await;

        if let Some(worker) = active.as_ref() {
            if worker.is_running() {
                match preferred_port {
                    Some(port) if port != worker.port => {
                        tracing::info!(
                            "explicit port {} requested, stopping worker on port {}",
                            port,
                            worker.port
                        );
                        signal_stop(worker).await;
                    }
                    _ => return Ok(worker.snapshot()),
                }
            }
            *active = None;
        }

        let (port, allocated) = match preferred_port {
            Some(port) => (port, false),
            None => (self.ports.allocate(self.preferred_start).await?, true),
        };

        let mut args = self.command.base_args.clone();
        args.extend([
            "-p".to_string(),
            port.to_string(),
            "-k".to_string(),
            self.service_key.clone(),
        ]);

        let mut cmd = Command::new(&self.command.program);
        cmd.args(&args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(false);
        crate::utils::apply_creation_flags(&mut cmd);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                if allocated {
                    self.ports.release(port);
                }
                return Err(SpawnError::Launch {
                    program: self.command.program.display().to_string(),
                    source: e,
                });
            }
        };
        let pid = child.id().unwrap_or(0);

        let machine = Arc::new(StdMutex::new(WorkerStateMachine::new()));
        if let Err(e) = machine
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .transition(WorkerState::Running)
        {
            tracing::warn!("{}", e);
        }

        let stopping = Arc::new(AtomicBool::new(false));
        let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);

        // waiter task: classifies the exit and releases the port
        let exit_tx = self.exit_tx.clone();
        let ports = self.ports.clone();
        let waiter_machine = machine.clone();
        let waiter_stopping = stopping.clone();
        tokio::spawn(async move {
            let detail = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => format!("worker exited with {}", status),
                    Err(e) => format!("failed to wait for worker: {}", e),
                },
                _ = kill_rx.recv() => {
                    if let Err(e) = child.start_kill() {
                        tracing::warn!("failed to kill worker {}: {}", pid, e);
                    }
                    match child.wait().await {
                        Ok(status) => format!("worker terminated ({})", status),
                        Err(e) => format!("failed to wait for worker: {}", e),
                    }
                }
            };
            let expected = waiter_stopping.load(Ordering::SeqCst);
            let next = if expected {
                WorkerState::Stopped
            } else {
                WorkerState::Crashed
            };
            if let Err(e) = waiter_machine
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .transition(next)
            {
                tracing::debug!("{}", e);
            }
            ports.release(port);
            tracing::info!("{} (pid {}, expected: {})", detail, pid, expected);
            let _ = exit_tx.send(WorkerExit {
                pid,
                port,
                expected,
                detail,
            });
        });

        let worker = ActiveWorker {
            pid,
            port,
            args,
            stopping,
            kill_tx,
            machine,
        };
        let snapshot = worker.snapshot();
        *active = Some(worker);
        tracing::info!("worker started on port {} with pid {}", port, pid);
        Ok(snapshot)
    }

    /// Terminate the worker if one is running. Idempotent; termination
    /// failures are logged, never surfaced, since shutdown must proceed
    /// regardless.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        let Some(worker) = active.take() else {
            tracing::debug!("stop requested but no worker is tracked");
            return;
        };
        if !worker.is_running() {
            return;
        }
        signal_stop(&worker).await;
    }

    /// Snapshot of the current handle, if any worker is tracked.
    pub async fn handle(&self) -> Option<WorkerHandle> {
        self.active.lock().await.as_ref().map(ActiveWorker::snapshot)
    }

    /// Port of the Running worker, if there is one.
    pub async fn port(&self) -> Option<u16> {
        self.active
            .lock()
            .await
            .as_ref()
            .filter(|w| w.is_running())
            .map(|w| w.port)
    }
}

async fn signal_stop(worker: &ActiveWorker) {
    worker.stopping.store(true, Ordering::SeqCst);
    if worker.kill_tx.send(()).await.is_err() {
        tracing::debug!("worker {} already exited", worker.pid);
    } else {
        tracing::info!("stop signal sent to worker {}", worker.pid);
    }
}
