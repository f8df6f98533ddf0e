//! Output flow control
//!
//! Every line read from the child during the script phase passes through
//! the governor before framing. Three independent caps apply: a rolling
//! one-second rate cap (excess lines are dropped, with one notice per
//! window), a consecutive-identical-line cap and a total-volume cap
//! (both stop the execution, since they indicate a runaway loop).
//!
//! The clock is passed in by the caller so the caps are testable on
//! tokio's paused time.

use std::collections::VecDeque;

use tokio::time::{Duration, Instant};

use crate::types::OutputLimits;

const WINDOW: Duration = Duration::from_secs(1);

/// Outcome of offering one line to the governor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Deliver the line to the client
    Emit,

    /// Drop the line silently
    Drop,

    /// Drop the line and deliver the notice on the stderr channel
    DropWithNotice(String),

    /// Deliver the notice, then stop the execution
    Terminate(String),
}

/// Line admission for one execution's script phase
#[derive(Debug)]
pub struct OutputGovernor {
    rate_limit: Option<u32>,
    identical_limit: Option<u32>,
    total_limit: Option<u32>,

    /// Emission times within the rolling window
    window: VecDeque<Instant>,
    /// A rate notice has been emitted for the current saturated window
    window_notified: bool,

    last_line: Option<String>,
    identical_run: u32,
    lines_seen: u32,
    tripped: bool,
}

impl OutputGovernor {
    pub fn new(limits: &OutputLimits) -> Self {
        Self {
            rate_limit: limits.rate_limit,
            identical_limit: limits.identical_limit,
            total_limit: limits.total_limit,
            window: VecDeque::new(),
            window_notified: false,
            last_line: None,
            identical_run: 0,
            lines_seen: 0,
            tripped: false,
        }
    }

    /// Offer one complete line (content without the trailing newline)
    pub fn admit_line(&mut self, line: &str, now: Instant) -> Verdict {
        if self.tripped {
            return Verdict::Drop;
        }

        self.lines_seen = self.lines_seen.saturating_add(1);

        // Identical and total caps count every line the child produced,
        // including ones the rate cap would drop, so a flood trips them
        // at full speed.
        if self.last_line.as_deref() == Some(line) {
            self.identical_run = self.identical_run.saturating_add(1);
        } else {
            self.identical_run = 1;
            self.last_line = Some(line.to_string());
        }

        if let Some(limit) = self.identical_limit
            && self.identical_run > limit
        {
            self.tripped = true;
            return Verdict::Terminate(format!(
                "\n[stopped: {limit} consecutive identical output lines]\n"
            ));
        }

        if let Some(limit) = self.total_limit
            && self.lines_seen > limit
        {
            self.tripped = true;
            return Verdict::Terminate(format!("\n[stopped: output exceeded {limit} lines]\n"));
        }

        self.admit_to_window(now)
    }

    /// Offer an unterminated fragment (a flushed partial line). Counts
    /// against the rate cap only; identical-run tracking needs whole
    /// lines.
    pub fn admit_fragment(&mut self, now: Instant) -> Verdict {
        if self.tripped {
            return Verdict::Drop;
        }
        self.admit_to_window(now)
    }

    /// Whether a terminating cap has fired
    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    fn admit_to_window(&mut self, now: Instant) -> Verdict {
        let Some(limit) = self.rate_limit else {
            return Verdict::Emit;
        };

        while let Some(&front) = self.window.front() {
            if now.duration_since(front) >= WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }

        if self.window.len() as u32 >= limit {
            if self.window_notified {
                return Verdict::Drop;
            }
            self.window_notified = true;
            return Verdict::DropWithNotice(format!(
                "\n[output limited to {limit} lines per second; extra lines dropped]\n"
            ));
        }

        self.window.push_back(now);
        self.window_notified = false;
        Verdict::Emit
    }
}
