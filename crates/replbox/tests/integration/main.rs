//! Integration tests for replbox
//!
//! These tests run real executions against a python3 interpreter.
//! Run with: cargo test -p replbox --features integration-tests
//!
//! Tests that require python3 are marked `#[ignore]`. To include them:
//!   cargo test -p replbox --features integration-tests -- --include-ignored

#![cfg(feature = "integration-tests")]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use replbox::{
    ClientChannel, ClientCommand, Config, ExecutionRouter, Payload, ResourceLimits,
    ServerMessage,
};
use tokio::sync::mpsc::UnboundedReceiver;

mod failures;
mod limits;
mod repl_handover;
mod script_io;

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

/// One registered execution against a fresh temp workspace
struct TestBed {
    router: ExecutionRouter,
    channel: ClientChannel,
    messages: UnboundedReceiver<ServerMessage>,
    cmd_id: String,
    _workspace: tempfile::TempDir,
}

impl TestBed {
    /// Start an execution of `script` with the default limits
    fn start(cmd_id: &str, script: &str) -> Self {
        Self::start_with_limits(cmd_id, script, ResourceLimits::default())
    }

    /// Start an execution of `script` with custom limits
    fn start_with_limits(cmd_id: &str, script: &str, limits: ResourceLimits) -> Self {
        let workspace = tempfile::tempdir().expect("failed to create workspace root");
        let user_dir = workspace.path().join("student");
        std::fs::create_dir_all(&user_dir).expect("failed to create user workspace");

        let script_path = user_dir.join("main.py");
        std::fs::write(&script_path, script).expect("failed to write script");

        let config = Config {
            python_path: Some(PathBuf::from("python3")),
            workspace_root: workspace.path().to_path_buf(),
            debug: false,
            default_limits: limits,
            output_limits: Default::default(),
        };

        let router = ExecutionRouter::new(Arc::new(config));
        let (channel, messages) = ClientChannel::new();

        router
            .dispatch(
                &channel,
                ClientCommand::ExecuteScript {
                    cmd_id: cmd_id.to_string(),
                    file_path: script_path,
                    username: Some("student".to_string()),
                },
            )
            .expect("failed to register execution");

        Self {
            router,
            channel,
            messages,
            cmd_id: cmd_id.to_string(),
            _workspace: workspace,
        }
    }

    async fn recv(&mut self) -> ServerMessage {
        tokio::time::timeout(RECV_TIMEOUT, self.messages.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("channel closed unexpectedly")
    }

    /// Receive until `pred` matches; returns the earlier messages and
    /// the matching one
    async fn recv_until(
        &mut self,
        pred: impl Fn(&Payload) -> bool,
    ) -> (Vec<ServerMessage>, ServerMessage) {
        let mut seen = Vec::new();
        loop {
            let message = self.recv().await;
            assert_eq!(message.cmd_id, self.cmd_id);
            if pred(&message.payload) {
                return (seen, message);
            }
            assert!(
                !message.payload.is_terminal(),
                "execution completed before the expected message: {seen:?}"
            );
            seen.push(message);
        }
    }

    /// Receive until the terminal message; returns the earlier messages
    /// and the exit code
    async fn recv_until_complete(&mut self) -> (Vec<ServerMessage>, i32) {
        let (seen, terminal) = self
            .recv_until(|payload| matches!(payload, Payload::Complete { .. }))
            .await;
        match terminal.payload {
            Payload::Complete { exit_code, .. } => (seen, exit_code),
            _ => unreachable!(),
        }
    }

    fn send_input(&self, text: &str) {
        self.router
            .dispatch(
                &self.channel,
                ClientCommand::SendInput {
                    cmd_id: self.cmd_id.clone(),
                    text: text.to_string(),
                },
            )
            .expect("failed to send input");
    }

    fn stop(&self) {
        self.router
            .dispatch(
                &self.channel,
                ClientCommand::StopExecution {
                    cmd_id: self.cmd_id.clone(),
                },
            )
            .expect("failed to request stop");
    }
}

/// Concatenated stdout text of a message batch
fn stdout_text(messages: &[ServerMessage]) -> String {
    messages
        .iter()
        .filter_map(|message| match &message.payload {
            Payload::Stdout { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

/// Concatenated stderr text of a message batch
fn stderr_text(messages: &[ServerMessage]) -> String {
    messages
        .iter()
        .filter_map(|message| match &message.payload {
            Payload::Stderr { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

fn contains_repl_ready(messages: &[ServerMessage]) -> bool {
    messages
        .iter()
        .any(|message| matches!(message.payload, Payload::ReplReady { .. }))
}
