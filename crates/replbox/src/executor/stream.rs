//! Child stream assembly
//!
//! Raw chunks from the child's pipes are assembled into complete lines
//! plus an aged trailing fragment. Unterminated fragments are held
//! briefly so interactive prompts that end without a newline still reach
//! the client. Driver marker lines are recognized here.

use tokio::time::{Duration, Instant};

use crate::child::{
    FIGURE_BEGIN_SENTINEL, FIGURE_END_SENTINEL, INPUT_REQUEST_SENTINEL, REPL_READY_SENTINEL,
};

/// A driver control line, never forwarded to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Marker {
    /// Script finished with status 0; the interactive loop is starting
    ReplReady,
    /// The child is about to block on a stdin read
    InputRequest,
    /// Start of a base64 figure payload
    FigureBegin,
    /// End of a figure payload
    FigureEnd,
}

/// Classify a complete line as a driver marker
pub(crate) fn marker_of(line: &str) -> Option<Marker> {
    match line.trim_end_matches(['\r', '\n']) {
        REPL_READY_SENTINEL => Some(Marker::ReplReady),
        INPUT_REQUEST_SENTINEL => Some(Marker::InputRequest),
        FIGURE_BEGIN_SENTINEL => Some(Marker::FigureBegin),
        FIGURE_END_SENTINEL => Some(Marker::FigureEnd),
        _ => None,
    }
}

/// Accumulates chunks and yields complete lines
#[derive(Debug)]
pub(crate) struct LineBuffer {
    buf: String,
    last_data_at: Option<Instant>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self {
            buf: String::new(),
            last_data_at: None,
        }
    }

    /// Append a raw chunk (decoded lossily)
    pub fn push(&mut self, chunk: &[u8], now: Instant) {
        self.buf.push_str(&String::from_utf8_lossy(chunk));
        self.last_data_at = Some(now);
    }

    /// Pop the next complete line, including its trailing newline
    pub fn next_line(&mut self) -> Option<String> {
        let idx = self.buf.find('\n')?;
        Some(self.buf.drain(..=idx).collect())
    }

    /// When the held fragment should be flushed, if one is pending
    pub fn fragment_deadline(&self, hold: Duration) -> Option<Instant> {
        if self.buf.is_empty() {
            return None;
        }
        self.last_data_at.map(|at| at + hold)
    }

    /// Take the fragment if it has aged past the hold interval
    pub fn take_fragment_if_stale(&mut self, now: Instant, hold: Duration) -> Option<String> {
        let deadline = self.fragment_deadline(hold)?;
        if now < deadline {
            return None;
        }
        self.take_fragment()
    }

    /// Take whatever unterminated content is pending
    pub fn take_fragment(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        self.last_data_at = None;
        Some(std::mem::take(&mut self.buf))
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
