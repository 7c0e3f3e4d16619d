//! Command routing between windows and the core.
//!
//! Two registries: notifications (fire-and-forget) and queries
//! (request/response, exactly one reply). The distinction is explicit at
//! registration; a query name submitted through the notify path is dropped
//! with a log line rather than silently half-handled.
//!
//! Ordering: commands from one sender run in issuance order through a
//! per-sender queue task. Commands from different senders interleave freely.

use crate::windows::WindowId;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NotifyFn = Arc<dyn Fn(WindowId, Value) -> BoxFuture<()> + Send + Sync>;
type QueryFn =
    Arc<dyn Fn(WindowId, Value) -> BoxFuture<Result<Value, anyhow::Error>> + Send + Sync>;

/// A routed command. Ephemeral; nothing is persisted or replayed.
#[derive(Debug, Clone)]
pub struct Command {
    pub name: String,
    /// Window the command applies to; defaults to the sender.
    pub target: Option<WindowId>,
    pub payload: Value,
}

impl Command {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            target: None,
            payload,
        }
    }

    pub fn targeted(name: impl Into<String>, target: WindowId, payload: Value) -> Self {
        Self {
            name: name.into(),
            target: Some(target),
            payload,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("unknown query '{0}'")]
    Unknown(String),
    #[error("query failed: {0}")]
    Handler(String),
}

impl QueryError {
    /// Error shape sent back to the window so a query is never left
    /// unanswered.
    pub fn to_payload(&self) -> Value {
        serde_json::json!({ "error": self.to_string() })
    }
}

#[derive(Default)]
struct Registry {
    notify: RwLock<HashMap<String, NotifyFn>>,
    query: RwLock<HashMap<String, QueryFn>>,
}

impl Registry {
    fn read_notify(&self) -> RwLockReadGuard<'_, HashMap<String, NotifyFn>> {
        self.notify.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_notify(&self) -> RwLockWriteGuard<'_, HashMap<String, NotifyFn>> {
        self.notify.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read_query(&self) -> RwLockReadGuard<'_, HashMap<String, QueryFn>> {
        self.query.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_query(&self) -> RwLockWriteGuard<'_, HashMap<String, QueryFn>> {
        self.query.write().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct CommandBus {
    registry: Arc<Registry>,
    queues: Mutex<HashMap<WindowId, mpsc::UnboundedSender<Command>>>,
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBus {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry::default()),
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Register a fire-and-forget handler. Re-registering a name replaces the
    /// previous handler.
    pub fn on_notify<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(WindowId, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: NotifyFn = Arc::new(move |id, payload| Box::pin(handler(id, payload)));
        self.registry
            .write_notify()
            .insert(name.to_string(), boxed);
    }

    /// Register a request/response handler.
    pub fn on_query<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(WindowId, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, anyhow::Error>> + Send + 'static,
    {
        let boxed: QueryFn = Arc::new(move |id, payload| Box::pin(handler(id, payload)));
        self.registry.write_query().insert(name.to_string(), boxed);
    }

    /// Enqueue a notification from `sender`. Returns once the command is
    /// queued; execution happens on the sender's queue task, in order.
    pub async fn submit(&self, sender: WindowId, command: Command) {
        let mut queues = self.queues.lock().await;
        let tx = queues.entry(sender).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_sender_queue(sender, rx, self.registry.clone()));
            tx
        });
        if tx.send(command).is_err() {
            tracing::warn!("queue task for window {} is gone", sender);
            queues.remove(&sender);
        }
    }

    /// Run a query to completion. Exactly one reply per call; handler
    /// failures come back as `QueryError::Handler`.
    pub async fn query(
        &self,
        sender: WindowId,
        name: &str,
        payload: Value,
    ) -> Result<Value, QueryError> {
        let handler = self
            .registry
            .read_query()
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::Unknown(name.to_string()))?;
        handler(sender, payload)
            .await
            .map_err(|e| QueryError::Handler(e.to_string()))
    }

    /// Tear down a closed window's queue. Already-queued commands still run.
    pub async fn drop_sender(&self, sender: WindowId) {
        if self.queues.lock().await.remove(&sender).is_some() {
            tracing::debug!("dropped command queue for window {}", sender);
        }
    }
}

async fn run_sender_queue(
    sender: WindowId,
    mut rx: mpsc::UnboundedReceiver<Command>,
    registry: Arc<Registry>,
) {
    while let Some(command) = rx.recv().await {
        let handler = registry.read_notify().get(&command.name).cloned();
        match handler {
            Some(handler) => {
                let window = command.target.unwrap_or(sender);
                handler(window, command.payload).await;
            }
            None if registry.read_query().contains_key(&command.name) => {
                tracing::warn!(
                    "'{}' is a query, dropping notify submission from {}",
                    command.name,
                    sender
                );
            }
            None => tracing::warn!("unknown command '{}' from {}", command.name, sender),
        }
    }
    tracing::debug!("command queue for window {} drained", sender);
}
