//! Wire protocol between the engine and the client channel
//!
//! Outbound messages are JSON records `{cmd_id, type, data, timestamp}`;
//! inbound client frames are JSON records tagged by `cmd`. The timestamp
//! is stamped when the message is constructed for emission.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prompt string announced when the interactive phase begins
pub const REPL_PROMPT: &str = ">>> ";

/// Errors that occur while framing messages
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode outbound message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode client frame: {0}")]
    Decode(#[source] serde_json::Error),
}

/// A frame received from the client channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Start executing a source file
    ExecuteScript {
        cmd_id: String,
        file_path: PathBuf,
        /// Filled in by the authentication layer, not by the client itself
        #[serde(default)]
        username: Option<String>,
    },

    /// Deliver one input line to a running execution
    SendInput {
        cmd_id: String,
        #[serde(default)]
        text: String,
    },

    /// Request termination of a running execution. Idempotent.
    StopExecution { cmd_id: String },
}

impl ClientCommand {
    /// Decode a client frame from its JSON text
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(ProtocolError::Decode)
    }

    /// The execution this frame addresses
    pub fn cmd_id(&self) -> &str {
        match self {
            ClientCommand::ExecuteScript { cmd_id, .. }
            | ClientCommand::SendInput { cmd_id, .. }
            | ClientCommand::StopExecution { cmd_id } => cmd_id,
        }
    }
}

/// Machine-readable category of an out-of-band engine failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Could not start the interpreter child
    SpawnFailed,

    /// Resource limits could not be applied; the child never started
    LimitInstallFailed,

    /// An execution with this cmd_id is already registered
    DuplicateCmdId,

    /// No execution with this cmd_id is known
    UnknownCmdId,

    /// Bug in the engine itself
    Internal,
}

/// Typed payload of an outbound message, keyed by `type` with the
/// type-specific fields under `data`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    /// One fragment of child stdout (may be a partial line)
    Stdout { text: String },

    /// One fragment of child stderr. Cap and timeout notices use this
    /// channel as well.
    Stderr { text: String },

    /// The child is blocked reading stdin
    InputRequest { prompt: String },

    /// The script finished cleanly; the interactive phase is accepting input
    ReplReady { prompt: String },

    /// Opaque image payload captured from the child
    Figure {
        format: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        height: Option<u32>,
    },

    /// Terminal message for this cmd_id
    Complete {
        exit_code: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<f64>,
    },

    /// Out-of-band engine failure
    Error {
        kind: ErrorKind,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        traceback: Option<String>,
    },

    /// Emitted only when debug mode is on
    Debug { text: String },
}

impl Payload {
    /// Stdout text payload
    pub fn stdout(text: impl Into<String>) -> Self {
        Payload::Stdout { text: text.into() }
    }

    /// Stderr text payload
    pub fn stderr(text: impl Into<String>) -> Self {
        Payload::Stderr { text: text.into() }
    }

    /// Engine failure payload
    pub fn error(kind: ErrorKind, error: impl Into<String>) -> Self {
        Payload::Error {
            kind,
            error: error.into(),
            traceback: None,
        }
    }

    /// Whether this payload ends the message stream for its cmd_id
    pub fn is_terminal(&self) -> bool {
        matches!(self, Payload::Complete { .. })
    }
}

/// A framed outbound message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    pub cmd_id: String,

    #[serde(flatten)]
    pub payload: Payload,

    /// Seconds since the Unix epoch, stamped at emission time
    pub timestamp: f64,
}

impl ServerMessage {
    /// Frame a payload for emission, stamping the current time
    pub fn new(cmd_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            cmd_id: cmd_id.into(),
            payload,
            timestamp: unix_timestamp(),
        }
    }

    /// Encode the message as a JSON record
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Decode a message from its JSON text
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(ProtocolError::Decode)
    }
}

fn unix_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
