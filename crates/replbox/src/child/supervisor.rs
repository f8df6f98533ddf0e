//! Interpreter child lifecycle
//!
//! Spawns the interpreter on the driver program, installs resource
//! limits before exec, and owns termination and reaping.

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, instrument};

use crate::child::driver::DriverScript;
use crate::child::{ChildError, limits};
use crate::types::ResourceLimits;

/// Handle to one running interpreter child
#[derive(Debug)]
pub struct ChildProcess {
    child: tokio::process::Child,
    stdin: Option<ChildStdin>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    /// Keeps the staged driver file alive for the child's lifetime
    _driver: DriverScript,
}

impl ChildProcess {
    /// Spawn the interpreter on a freshly staged driver program.
    ///
    /// The child runs `<python> -u <driver> <workspace_dir> <script_path>`
    /// with piped stdio; resource limits are installed between fork and
    /// exec.
    #[instrument(skip(python, limits), fields(script = %script_path.display()))]
    pub async fn spawn(
        python: &Path,
        workspace_dir: &Path,
        script_path: &Path,
        limits: &ResourceLimits,
    ) -> Result<Self, ChildError> {
        let driver = DriverScript::stage()?;

        let mut command = Command::new(python);
        command
            .arg("-u")
            .arg(driver.path())
            .arg(workspace_dir)
            .arg(script_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child_limits = limits.clone();
        // Safety: install() only calls setrlimit, which is async-signal-safe.
        unsafe {
            command.pre_exec(move || limits::install(&child_limits));
        }

        let mut child = command.spawn().map_err(classify_spawn_error)?;

        debug!(pid = child.id(), "spawned interpreter child");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        Ok(Self {
            child,
            stdin,
            stdout,
            stderr,
            _driver: driver,
        })
    }

    /// The child's OS process id, if it is still running
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Write to the child's stdin
    pub async fn write(&mut self, data: &[u8]) -> Result<(), ChildError> {
        if let Some(ref mut stdin) = self.stdin {
            stdin.write_all(data).await?;
            stdin.flush().await?;
            Ok(())
        } else {
            Err(ChildError::StdinClosed)
        }
    }

    /// Write a line to the child's stdin (adds newline)
    pub async fn write_line(&mut self, line: &str) -> Result<(), ChildError> {
        let mut data = line.as_bytes().to_vec();
        data.push(b'\n');
        self.write(&data).await
    }

    /// Close stdin to signal end-of-input
    pub fn close_stdin(&mut self) {
        self.stdin = None;
        debug!("closed stdin");
    }

    /// Take ownership of stdout
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    /// Take ownership of stderr
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Check for exit without blocking
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Wait for the child to exit and reap it
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        // Close stdin first so a child blocked on a read sees EOF
        self.stdin = None;
        self.child.wait().await
    }

    /// Terminate the child: SIGTERM, then SIGKILL after the grace
    /// period. Always reaps and returns the final status.
    #[instrument(skip(self))]
    pub async fn terminate(&mut self, grace: Duration) -> io::Result<ExitStatus> {
        self.stdin = None;

        if let Some(pid) = self.child.id() {
            debug!(pid, "sending SIGTERM");
            let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);

            match tokio::time::timeout(grace, self.child.wait()).await {
                Ok(status) => return status,
                Err(_) => {
                    debug!(pid, "grace period expired, sending SIGKILL");
                    self.child.start_kill()?;
                }
            }
        }

        self.child.wait().await
    }
}

/// Collapse an exit status into a single code: the process exit code, or
/// the negated signal number for signal deaths (the convention the
/// original interpreter runtime reports).
pub fn exit_code(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => -status.signal().unwrap_or(1),
    }
}

/// The kernel reports pre_exec failures back through spawn with only an
/// errno, so setrlimit's failure modes are told apart from a missing
/// interpreter by errno class.
fn classify_spawn_error(err: io::Error) -> ChildError {
    match err.raw_os_error() {
        Some(code) if code == Errno::EPERM as i32 || code == Errno::EINVAL as i32 => {
            ChildError::LimitInstall(err)
        }
        _ => ChildError::SpawnFailed(err),
    }
}
