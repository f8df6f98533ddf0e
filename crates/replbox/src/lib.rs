//! A library for hybrid script-then-REPL execution of student programs.
//!
//! Replbox runs a user's Python script in a supervised interpreter child,
//! streams its output to a client channel as framed messages, and — when
//! the script exits cleanly — turns the same child into an interactive
//! REPL whose namespace is exactly the script's final bindings.
//!
//! # Features
//!
//! - **Two-phase execution** — Script run and interactive REPL inside one
//!   child process, so state carries over without re-execution.
//! - **Streamed I/O** — Stdout, stderr and interactive input flow between
//!   child and client as typed JSON messages.
//! - **Abuse containment** — Wall clock, CPU, memory and output-flow caps
//!   with escalating termination.
//! - **Prompt detection** — A cooperative driver marker surfaces blocked
//!   `input()` reads as explicit input requests.
//! - **TOML configuration** — Deployment-tunable limits and paths.

pub use channel::ClientChannel;
pub use child::{ChildError, ChildProcess, DriverScript};
pub use config::{Config, ConfigError, EXAMPLE_CONFIG};
pub use executor::{Executor, ExecutorHandle, OutputGovernor, Phase, Verdict};
pub use protocol::{
    ClientCommand, ErrorKind, Payload, ProtocolError, REPL_PROMPT, ServerMessage,
};
pub use router::{ExecutionRouter, RouterError};
pub use types::{ExecutionRequest, OutputLimits, ResourceLimits};

pub mod channel;
pub mod child;
pub mod config;
pub mod executor;
pub mod protocol;
pub mod router;
pub mod types;
