//! Per-request execution engine
//!
//! One `Executor` owns one interpreter child and one client binding for
//! the lifetime of a request. A single spawned task pumps child stdout
//! and stderr through the output governor, delivers queued input lines,
//! enforces the script wall clock, drives the script → REPL handover and
//! emits the terminal `complete` message exactly once.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::AsyncReadExt;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, instrument, warn};

pub use crate::executor::governor::{OutputGovernor, Verdict};
pub use crate::executor::phase::{Phase, PhaseTracker};

use crate::channel::ClientChannel;
use crate::child::{self, ChildProcess};
use crate::config::Config;
use crate::executor::stream::{LineBuffer, Marker, marker_of};
use crate::protocol::{ErrorKind, Payload, REPL_PROMPT, ServerMessage};
use crate::types::ExecutionRequest;

pub mod governor;
pub mod phase;
mod stream;

/// A pending stop request, shared between the handle and the task
#[derive(Debug, Default)]
struct StopSignal {
    requested: AtomicBool,
    notify: Notify,
}

impl StopSignal {
    fn request(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            self.notify.notify_one();
        }
    }

    fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        if !self.is_requested() {
            self.notify.notified().await;
        }
    }
}

/// Handle to a running execution
#[derive(Debug)]
pub struct ExecutorHandle {
    cmd_id: String,
    input_tx: mpsc::UnboundedSender<String>,
    stop: Arc<StopSignal>,
}

impl ExecutorHandle {
    /// The execution this handle controls
    pub fn cmd_id(&self) -> &str {
        &self.cmd_id
    }

    /// Queue one input line for the child. Returns false if the
    /// execution has already finished.
    pub fn send_input(&self, text: impl Into<String>) -> bool {
        self.input_tx.send(text.into()).is_ok()
    }

    /// Request termination. Idempotent; takes effect on the next poll of
    /// the execution task.
    pub fn stop(&self) {
        self.stop.request();
    }
}

/// Entry point for one execution request
pub struct Executor;

impl Executor {
    /// Start an execution and return its control handle plus the join
    /// handle of the driving task. The terminal `complete` message has
    /// been emitted by the time the task finishes.
    pub fn spawn(
        config: Arc<Config>,
        request: ExecutionRequest,
        channel: ClientChannel,
    ) -> (ExecutorHandle, JoinHandle<()>) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let stop = Arc::new(StopSignal::default());

        let handle = ExecutorHandle {
            cmd_id: request.cmd_id.clone(),
            input_tx,
            stop: stop.clone(),
        };

        let join = tokio::spawn(run_execution(config, request, channel, input_rx, stop));

        (handle, join)
    }
}

/// Why the pump loop ended
#[derive(Debug, PartialEq, Eq)]
enum PumpExit {
    /// Both child streams reached end-of-file
    Natural,
    /// The client requested termination
    Stopped,
    /// The script wall clock expired
    DeadlineExpired,
    /// A terminating output cap fired (notice already emitted)
    CapTripped,
}

/// Script wall-clock budget. The clock pauses while the child is blocked
/// waiting for input the client has not provided yet, so interactive
/// scripts are not billed for human think time.
#[derive(Debug)]
struct WallClock {
    remaining: Option<Duration>,
    running_since: Instant,
    paused: bool,
}

impl WallClock {
    fn new(limit: Option<Duration>, now: Instant) -> Self {
        Self {
            remaining: limit,
            running_since: now,
            paused: false,
        }
    }

    fn pause(&mut self, now: Instant) {
        if self.paused {
            return;
        }
        if let Some(remaining) = self.remaining {
            self.remaining =
                Some(remaining.saturating_sub(now.duration_since(self.running_since)));
        }
        self.paused = true;
    }

    fn resume(&mut self, now: Instant) {
        if !self.paused {
            return;
        }
        self.running_since = now;
        self.paused = false;
    }

    fn deadline(&self) -> Option<Instant> {
        if self.paused {
            return None;
        }
        self.remaining.map(|remaining| self.running_since + remaining)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    fn payload(self, text: String) -> Payload {
        match self {
            StreamKind::Stdout => Payload::Stdout { text },
            StreamKind::Stderr => Payload::Stderr { text },
        }
    }
}

/// Per-execution state shared by the pump handlers
struct Engine {
    cmd_id: String,
    channel: ClientChannel,
    debug: bool,
    phase: PhaseTracker,
    governor: OutputGovernor,
    out_buf: LineBuffer,
    err_buf: LineBuffer,
    pending_input: VecDeque<String>,
    /// An input request is outstanding and no line was available for it
    awaiting_input: bool,
    /// Most recent unterminated fragment, kept as the prompt candidate
    last_fragment: Option<String>,
    /// Base64 lines being collected between figure markers
    figure: Option<String>,
    stop: Arc<StopSignal>,
    clock: WallClock,
    started: Instant,
}

impl Engine {
    fn emit(&self, payload: Payload) {
        // Nothing is emitted for a cmd_id after its terminal message
        if self.phase.current().is_complete() {
            return;
        }
        self.channel
            .send(ServerMessage::new(self.cmd_id.clone(), payload));
    }

    fn debug_msg(&self, text: &str) {
        if self.debug {
            self.emit(Payload::Debug {
                text: text.to_string(),
            });
        }
    }

    fn in_script(&self) -> bool {
        self.phase.current().in_script()
    }

    /// Earliest pending fragment flush across both streams
    fn flush_deadline(&self, hold: Duration) -> Option<Instant> {
        [
            self.out_buf.fragment_deadline(hold),
            self.err_buf.fragment_deadline(hold),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn on_stdout(&mut self, data: &[u8], now: Instant) -> Option<PumpExit> {
        self.clock.resume(now);
        self.observe_output();
        self.out_buf.push(data, now);

        while let Some(line) = self.out_buf.next_line() {
            match marker_of(&line) {
                Some(Marker::FigureBegin) => {
                    self.figure = Some(String::new());
                    continue;
                }
                Some(Marker::FigureEnd) => {
                    if let Some(content) = self.figure.take() {
                        self.emit(Payload::Figure {
                            format: "png".to_string(),
                            content,
                            width: None,
                            height: None,
                        });
                    }
                    continue;
                }
                _ => {}
            }

            if let Some(figure) = self.figure.as_mut() {
                figure.push_str(line.trim_end());
                continue;
            }

            self.last_fragment = None;
            if let Some(end) = self.emit_line(StreamKind::Stdout, line, now) {
                return Some(end);
            }
        }

        None
    }

    async fn on_stderr(
        &mut self,
        data: &[u8],
        now: Instant,
        child: &mut ChildProcess,
    ) -> Option<PumpExit> {
        self.clock.resume(now);
        self.err_buf.push(data, now);

        while let Some(line) = self.err_buf.next_line() {
            match marker_of(&line) {
                Some(Marker::ReplReady) => {
                    self.enter_repl(now, child).await;
                    continue;
                }
                Some(Marker::InputRequest) => {
                    self.on_input_request(now, child).await;
                    continue;
                }
                _ => {}
            }

            self.observe_output();
            self.last_fragment = None;
            if let Some(end) = self.emit_line(StreamKind::Stderr, line, now) {
                return Some(end);
            }
        }

        None
    }

    /// New child output while blocked on input resumes the script phase
    fn observe_output(&mut self) {
        if self.phase.current() == Phase::WaitingInput {
            self.phase.advance(Phase::ScriptRunning);
        }
    }

    fn emit_line(&mut self, stream: StreamKind, line: String, now: Instant) -> Option<PumpExit> {
        if !self.in_script() {
            self.emit(stream.payload(line));
            return None;
        }

        match self
            .governor
            .admit_line(line.trim_end_matches(['\r', '\n']), now)
        {
            Verdict::Emit => self.emit(stream.payload(line)),
            Verdict::Drop => {}
            Verdict::DropWithNotice(notice) => self.emit(Payload::stderr(notice)),
            Verdict::Terminate(notice) => {
                self.emit(Payload::stderr(notice));
                return Some(PumpExit::CapTripped);
            }
        }
        None
    }

    fn emit_fragment(&mut self, stream: StreamKind, fragment: String, now: Instant) {
        self.last_fragment = Some(fragment.clone());

        if !self.in_script() {
            self.emit(stream.payload(fragment));
            return;
        }

        match self.governor.admit_fragment(now) {
            Verdict::Emit => self.emit(stream.payload(fragment)),
            Verdict::Drop => {}
            Verdict::DropWithNotice(notice) => self.emit(Payload::stderr(notice)),
            // Fragments only hit the rate cap; it never terminates
            Verdict::Terminate(notice) => self.emit(Payload::stderr(notice)),
        }
    }

    /// Flush fragments that have aged past the hold interval
    fn flush_stale(&mut self, now: Instant, hold: Duration) {
        if let Some(fragment) = self.out_buf.take_fragment_if_stale(now, hold) {
            self.emit_fragment(StreamKind::Stdout, fragment, now);
        }
        if let Some(fragment) = self.err_buf.take_fragment_if_stale(now, hold) {
            self.emit_fragment(StreamKind::Stderr, fragment, now);
        }
    }

    /// Flush everything still buffered (used at child exit)
    fn flush_all(&mut self, now: Instant) {
        if let Some(fragment) = self.out_buf.take_fragment() {
            self.emit_fragment(StreamKind::Stdout, fragment, now);
        }
        if let Some(fragment) = self.err_buf.take_fragment() {
            self.emit_fragment(StreamKind::Stderr, fragment, now);
        }
    }

    /// Script finished with status 0: hand the child over to the
    /// interactive phase. The sentinel line itself is never forwarded.
    async fn enter_repl(&mut self, now: Instant, child: &mut ChildProcess) {
        if !self.in_script() || self.stop.is_requested() {
            return;
        }

        // Script output precedes the handover message
        if let Some(fragment) = self.out_buf.take_fragment() {
            self.emit_fragment(StreamKind::Stdout, fragment, now);
        }

        self.awaiting_input = false;
        self.phase.advance(Phase::ReplActive);
        self.emit(Payload::ReplReady {
            prompt: REPL_PROMPT.to_string(),
        });
        self.debug_msg("interactive phase started");

        // Queued lines become interactive input, in arrival order
        while let Some(text) = self.pending_input.pop_front() {
            self.write_input(child, &text).await;
        }
    }

    /// The child is about to block reading stdin during the script phase
    async fn on_input_request(&mut self, now: Instant, child: &mut ChildProcess) {
        if !self.in_script() {
            return;
        }

        // The unterminated fragment is the prompt; surface it first
        let prompt = if let Some(fragment) = self.out_buf.take_fragment() {
            self.emit_fragment(StreamKind::Stdout, fragment.clone(), now);
            fragment
        } else {
            self.last_fragment.clone().unwrap_or_default()
        };

        self.phase.advance(Phase::WaitingInput);
        self.emit(Payload::InputRequest { prompt });

        // Deliver on demand: one queued line per request, never pre-pushed
        if let Some(text) = self.pending_input.pop_front() {
            self.write_input(child, &text).await;
            self.awaiting_input = false;
        } else {
            self.awaiting_input = true;
            self.clock.pause(now);
        }
    }

    async fn on_input(&mut self, text: String, now: Instant, child: &mut ChildProcess) {
        match self.phase.current() {
            // Interactive phase: forwarded verbatim
            Phase::ReplActive => self.write_input(child, &text).await,
            _ if self.awaiting_input => {
                self.write_input(child, &text).await;
                self.awaiting_input = false;
                self.clock.resume(now);
            }
            _ => self.pending_input.push_back(text),
        }
    }

    async fn write_input(&mut self, child: &mut ChildProcess, text: &str) {
        if let Err(err) = child.write_line(text).await {
            // The child is on its way out; EOF will surface shortly
            warn!(error = %err, "failed to deliver input line");
        }
    }

    fn on_stream_eof(&mut self, stream: StreamKind, now: Instant) {
        let fragment = match stream {
            StreamKind::Stdout => self.out_buf.take_fragment(),
            StreamKind::Stderr => self.err_buf.take_fragment(),
        };
        if let Some(fragment) = fragment {
            self.emit_fragment(stream, fragment, now);
        }
    }

    /// Emit the terminal message and seal the phase machine
    fn finish(&mut self, exit_code: i32) {
        self.phase.advance(Phase::Terminating);
        let duration = self.started.elapsed().as_secs_f64();
        self.emit(Payload::Complete {
            exit_code,
            duration: Some(duration),
        });
        self.phase.advance(Phase::Complete);
        debug!(exit_code, "execution complete");
    }
}

#[instrument(skip_all, fields(cmd_id = %request.cmd_id, user = %request.user))]
async fn run_execution(
    config: Arc<Config>,
    request: ExecutionRequest,
    channel: ClientChannel,
    mut input_rx: mpsc::UnboundedReceiver<String>,
    stop: Arc<StopSignal>,
) {
    let limits = config.default_limits.clone();
    let output_limits = config.output_limits.clone();
    let started = Instant::now();

    let mut engine = Engine {
        cmd_id: request.cmd_id.clone(),
        channel,
        debug: config.debug,
        phase: PhaseTracker::new(),
        governor: OutputGovernor::new(&output_limits),
        out_buf: LineBuffer::new(),
        err_buf: LineBuffer::new(),
        pending_input: VecDeque::new(),
        awaiting_input: false,
        last_fragment: None,
        figure: None,
        stop: stop.clone(),
        clock: WallClock::new(limits.wall_clock(), started),
        started,
    };

    engine.debug_msg("execution starting");

    let workspace = config.workspace_dir(&request.user);
    let mut child = match ChildProcess::spawn(
        &config.python_binary(),
        &workspace,
        &request.file_path,
        &limits,
    )
    .await
    {
        Ok(child) => child,
        Err(err) => {
            warn!(error = %err, "could not start execution");
            engine.emit(Payload::error(err.error_kind(), err.to_string()));
            engine.phase.advance(Phase::Terminating);
            engine.finish(-1);
            return;
        }
    };

    engine.phase.advance(Phase::ScriptRunning);
    engine.debug_msg("script phase started");

    let (Some(mut stdout), Some(mut stderr)) = (child.take_stdout(), child.take_stderr()) else {
        engine.emit(Payload::error(ErrorKind::Internal, "child pipes unavailable"));
        engine.phase.advance(Phase::Terminating);
        let _ = child.terminate(limits.grace()).await;
        engine.finish(-1);
        return;
    };

    let hold = output_limits.flush_interval();
    let grace = limits.grace();

    let mut out_chunk = [0u8; 4096];
    let mut err_chunk = [0u8; 4096];
    let mut out_open = true;
    let mut err_open = true;
    let mut out_retried = false;
    let mut err_retried = false;
    let mut input_open = true;

    let far_future = |now: Instant| now + Duration::from_secs(86_400);

    let end = loop {
        let now = Instant::now();

        // The wall clock binds the script phase only
        let wall_deadline = if engine.phase.current().in_script() {
            engine.clock.deadline()
        } else {
            None
        };
        let flush_deadline = engine.flush_deadline(hold);

        tokio::select! {
            biased;

            _ = stop.wait() => {
                debug!("stop requested");
                break PumpExit::Stopped;
            }

            _ = time::sleep_until(wall_deadline.unwrap_or_else(|| far_future(now))),
                if wall_deadline.is_some() =>
            {
                break PumpExit::DeadlineExpired;
            }

            result = stdout.read(&mut out_chunk), if out_open => match result {
                Ok(0) => {
                    out_open = false;
                    engine.on_stream_eof(StreamKind::Stdout, Instant::now());
                }
                Ok(n) => {
                    if let Some(end) = engine.on_stdout(&out_chunk[..n], Instant::now()) {
                        break end;
                    }
                }
                Err(err) => {
                    // One retry, then treat the stream as finished
                    warn!(error = %err, "stdout read error");
                    if out_retried {
                        out_open = false;
                        engine.on_stream_eof(StreamKind::Stdout, Instant::now());
                    } else {
                        out_retried = true;
                    }
                }
            },

            result = stderr.read(&mut err_chunk), if err_open => match result {
                Ok(0) => {
                    err_open = false;
                    engine.on_stream_eof(StreamKind::Stderr, Instant::now());
                }
                Ok(n) => {
                    if let Some(end) = engine
                        .on_stderr(&err_chunk[..n], Instant::now(), &mut child)
                        .await
                    {
                        break end;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "stderr read error");
                    if err_retried {
                        err_open = false;
                        engine.on_stream_eof(StreamKind::Stderr, Instant::now());
                    } else {
                        err_retried = true;
                    }
                }
            },

            maybe_line = input_rx.recv(), if input_open => match maybe_line {
                Some(text) => engine.on_input(text, Instant::now(), &mut child).await,
                None => input_open = false,
            },

            _ = time::sleep_until(flush_deadline.unwrap_or_else(|| far_future(now))),
                if flush_deadline.is_some() =>
            {
                engine.flush_stale(Instant::now(), hold);
            }
        }

        if !out_open && !err_open {
            break PumpExit::Natural;
        }
    };

    debug!(?end, "pump finished");

    let was_repl = engine.phase.current() == Phase::ReplActive;
    engine.phase.advance(Phase::Terminating);

    if end == PumpExit::DeadlineExpired {
        let seconds = limits.wall_clock_limit.unwrap_or_default();
        engine.emit(Payload::stderr(format!(
            "\n[script timed out after {seconds} seconds]\n"
        )));
    }

    let status = match end {
        PumpExit::Natural => child.wait().await,
        PumpExit::Stopped if was_repl => {
            // End-of-input lets the interactive loop exit cleanly; force
            // only if it does not
            child.close_stdin();
            match time::timeout(grace, child.wait()).await {
                Ok(status) => status,
                Err(_) => child.terminate(grace).await,
            }
        }
        PumpExit::Stopped | PumpExit::DeadlineExpired | PumpExit::CapTripped => {
            child.terminate(grace).await
        }
    };

    // A trailing unterminated fragment flushes at child exit
    engine.flush_all(Instant::now());

    match status {
        Ok(status) => engine.finish(child::exit_code(status)),
        Err(err) => {
            warn!(error = %err, "failed to reap child");
            engine.emit(Payload::error(
                ErrorKind::Internal,
                format!("failed to reap child: {err}"),
            ));
            engine.finish(-1);
        }
    }
}
