//! Execution request routing
//!
//! Maps live `cmd_id`s to their executors and dispatches decoded client
//! frames. The map lock is held only for map mutations; an entry is
//! removed only after its executor has emitted the terminal `complete`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::channel::ClientChannel;
use crate::config::Config;
use crate::executor::{Executor, ExecutorHandle};
use crate::protocol::{ClientCommand, ErrorKind, Payload, ServerMessage};
use crate::types::ExecutionRequest;

/// Router-level dispatch failures. These are also reported to the client
/// as `error` frames.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("an execution with cmd_id '{0}' is already registered")]
    DuplicateCmdId(String),

    #[error("no execution with cmd_id '{0}' is known")]
    UnknownCmdId(String),
}

struct Entry {
    handle: ExecutorHandle,
    /// Awaits the executor task, then retires the entry
    watcher: JoinHandle<()>,
}

struct RouterInner {
    config: Arc<Config>,
    executors: Mutex<HashMap<String, Entry>>,
    /// Executions that have already emitted their terminal message.
    /// Keeps late stop/input frames for them distinguishable from
    /// frames for cmd_ids that never existed.
    completed: Mutex<HashSet<String>>,
}

impl RouterInner {
    /// Retire an entry once its executor has finished
    fn finish(&self, cmd_id: &str) {
        lock(&self.executors).remove(cmd_id);
        lock(&self.completed).insert(cmd_id.to_string());
        debug!(cmd_id, "execution retired");
    }

    fn is_completed(&self, cmd_id: &str) -> bool {
        lock(&self.completed).contains(cmd_id)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Dispatches client frames to per-request executors
#[derive(Clone)]
pub struct ExecutionRouter {
    inner: Arc<RouterInner>,
}

impl ExecutionRouter {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                config,
                executors: Mutex::new(HashMap::new()),
                completed: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Route one decoded client frame. Failures are reported on the
    /// channel as `error` frames and also returned to the caller.
    pub fn dispatch(
        &self,
        channel: &ClientChannel,
        command: ClientCommand,
    ) -> Result<(), RouterError> {
        match command {
            ClientCommand::ExecuteScript {
                cmd_id,
                file_path,
                username,
            } => self.execute(channel, cmd_id, file_path, username),
            ClientCommand::SendInput { cmd_id, text } => self.send_input(channel, &cmd_id, text),
            ClientCommand::StopExecution { cmd_id } => self.stop(channel, &cmd_id),
        }
    }

    /// Number of executions currently registered
    pub fn live_executions(&self) -> usize {
        lock(&self.inner.executors).len()
    }

    /// Stop every live execution and wait for each terminal `complete`
    pub async fn shutdown(&self) {
        let entries: Vec<(String, Entry)> = lock(&self.inner.executors).drain().collect();
        if entries.is_empty() {
            return;
        }

        debug!(count = entries.len(), "stopping live executions");
        for (_, entry) in &entries {
            entry.handle.stop();
        }

        for (cmd_id, entry) in entries {
            if let Err(err) = entry.watcher.await {
                warn!(cmd_id, error = %err, "executor task failed during shutdown");
            }
        }
    }

    fn execute(
        &self,
        channel: &ClientChannel,
        cmd_id: String,
        file_path: std::path::PathBuf,
        username: Option<String>,
    ) -> Result<(), RouterError> {
        let user = username.unwrap_or_else(|| "anonymous".to_string());

        let mut executors = lock(&self.inner.executors);
        if executors.contains_key(&cmd_id) {
            channel.send(ServerMessage::new(
                cmd_id.clone(),
                Payload::error(
                    ErrorKind::DuplicateCmdId,
                    format!("an execution with cmd_id '{cmd_id}' is already running"),
                ),
            ));
            return Err(RouterError::DuplicateCmdId(cmd_id));
        }

        let request = ExecutionRequest::new(cmd_id.clone(), file_path, user);
        let (handle, join) = Executor::spawn(self.inner.config.clone(), request, channel.clone());

        let watcher = tokio::spawn({
            let inner = self.inner.clone();
            let cmd_id = cmd_id.clone();
            async move {
                if let Err(err) = join.await {
                    warn!(cmd_id, error = %err, "executor task panicked");
                }
                inner.finish(&cmd_id);
            }
        });

        executors.insert(cmd_id.clone(), Entry { handle, watcher });
        drop(executors);

        // A reused cmd_id starts a fresh lifecycle
        lock(&self.inner.completed).remove(&cmd_id);

        debug!(cmd_id, "execution registered");
        Ok(())
    }

    fn send_input(
        &self,
        channel: &ClientChannel,
        cmd_id: &str,
        text: String,
    ) -> Result<(), RouterError> {
        {
            let executors = lock(&self.inner.executors);
            if let Some(entry) = executors.get(cmd_id) {
                entry.handle.send_input(text);
                return Ok(());
            }
        }

        if self.inner.is_completed(cmd_id) {
            // Late input for a finished execution. No frame may follow
            // its `complete`, so this is dropped quietly.
            debug!(cmd_id, "dropping input for completed execution");
            return Ok(());
        }

        channel.send(ServerMessage::new(
            cmd_id.to_string(),
            Payload::error(
                ErrorKind::UnknownCmdId,
                format!("no execution with cmd_id '{cmd_id}' is known"),
            ),
        ));
        Err(RouterError::UnknownCmdId(cmd_id.to_string()))
    }

    fn stop(&self, channel: &ClientChannel, cmd_id: &str) -> Result<(), RouterError> {
        {
            let executors = lock(&self.inner.executors);
            if let Some(entry) = executors.get(cmd_id) {
                entry.handle.stop();
                return Ok(());
            }
        }

        if self.inner.is_completed(cmd_id) {
            // Stop is idempotent: a repeat after completion is a no-op
            debug!(cmd_id, "ignoring stop for completed execution");
            return Ok(());
        }

        channel.send(ServerMessage::new(
            cmd_id.to_string(),
            Payload::error(
                ErrorKind::UnknownCmdId,
                format!("no execution with cmd_id '{cmd_id}' is known"),
            ),
        ));
        Err(RouterError::UnknownCmdId(cmd_id.to_string()))
    }
}
