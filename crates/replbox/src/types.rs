use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-process limits installed on the interpreter child.
///
/// All fields are optional so that partial overrides can be layered with
/// [`with_overrides`](Self::with_overrides); `Default` fills in the values
/// used for classroom executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Wall clock limit for the script phase in seconds.
    /// The interactive phase has no wall clock cap.
    #[serde(default)]
    pub wall_clock_limit: Option<f64>,

    /// CPU time limit in seconds (RLIMIT_CPU)
    #[serde(default)]
    pub cpu_time_limit: Option<u64>,

    /// Address space limit in kilobytes (RLIMIT_AS)
    #[serde(default)]
    pub memory_limit: Option<u64>,

    /// Maximum size of any file the child may create, in kilobytes (RLIMIT_FSIZE)
    #[serde(default)]
    pub file_size_limit: Option<u64>,

    /// Maximum number of processes the child may hold (RLIMIT_NPROC)
    #[serde(default)]
    pub max_processes: Option<u32>,

    /// Grace period between SIGTERM and SIGKILL in seconds
    #[serde(default)]
    pub term_grace: Option<f64>,
}

impl ResourceLimits {
    /// 1 kilobyte in kilobytes
    pub const KB: u64 = 1;
    /// 1 megabyte in kilobytes
    pub const MB: u64 = 1024;

    /// Create new resource limits with all fields set to None
    pub fn new() -> Self {
        Self::unrestricted()
    }

    /// Create resource limits with no limit set
    pub fn unrestricted() -> Self {
        Self {
            wall_clock_limit: None,
            cpu_time_limit: None,
            memory_limit: None,
            file_size_limit: None,
            max_processes: None,
            term_grace: None,
        }
    }

    /// Set the script-phase wall clock limit in seconds
    pub fn with_wall_clock_limit(mut self, seconds: f64) -> Self {
        self.wall_clock_limit = Some(seconds);
        self
    }

    /// Set the CPU time limit in seconds
    pub fn with_cpu_time_limit(mut self, seconds: u64) -> Self {
        self.cpu_time_limit = Some(seconds);
        self
    }

    /// Set the address space limit in kilobytes
    pub fn with_memory_limit(mut self, kb: u64) -> Self {
        self.memory_limit = Some(kb);
        self
    }

    /// Set the file size limit in kilobytes
    pub fn with_file_size_limit(mut self, kb: u64) -> Self {
        self.file_size_limit = Some(kb);
        self
    }

    /// Set the maximum number of processes
    pub fn with_max_processes(mut self, count: u32) -> Self {
        self.max_processes = Some(count);
        self
    }

    /// Set the SIGTERM to SIGKILL grace period in seconds
    pub fn with_term_grace(mut self, seconds: f64) -> Self {
        self.term_grace = Some(seconds);
        self
    }

    /// Apply overrides from another ResourceLimits, preferring values from `overrides`
    ///
    /// Returns a new ResourceLimits with values from `overrides` taking precedence
    /// over values from `self` when both are present.
    pub fn with_overrides(&self, overrides: &ResourceLimits) -> ResourceLimits {
        ResourceLimits {
            wall_clock_limit: overrides.wall_clock_limit.or(self.wall_clock_limit),
            cpu_time_limit: overrides.cpu_time_limit.or(self.cpu_time_limit),
            memory_limit: overrides.memory_limit.or(self.memory_limit),
            file_size_limit: overrides.file_size_limit.or(self.file_size_limit),
            max_processes: overrides.max_processes.or(self.max_processes),
            term_grace: overrides.term_grace.or(self.term_grace),
        }
    }

    /// The wall clock limit as a Duration, if one is set
    pub fn wall_clock(&self) -> Option<Duration> {
        self.wall_clock_limit.map(Duration::from_secs_f64)
    }

    /// The SIGTERM to SIGKILL grace period, falling back to 500 ms
    pub fn grace(&self) -> Duration {
        self.term_grace
            .map(Duration::from_secs_f64)
            .unwrap_or(Duration::from_millis(500))
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            wall_clock_limit: Some(3.0),
            cpu_time_limit: Some(10),
            memory_limit: Some(128 * Self::MB),
            file_size_limit: Some(10 * Self::MB),
            max_processes: Some(1),
            term_grace: Some(0.5),
        }
    }
}

/// Flow-control caps applied to child output during the script phase.
///
/// The interactive phase is exempt; a human at the keyboard provides
/// natural rate limiting there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputLimits {
    /// Maximum lines per rolling one-second window
    #[serde(default)]
    pub rate_limit: Option<u32>,

    /// Maximum consecutive lines with identical content before the
    /// execution is stopped
    #[serde(default)]
    pub identical_limit: Option<u32>,

    /// Maximum total lines per execution before the execution is stopped
    #[serde(default)]
    pub total_limit: Option<u32>,

    /// How long an unterminated trailing fragment is held before being
    /// flushed to the client, in milliseconds
    #[serde(default)]
    pub flush_interval_ms: Option<u64>,
}

impl OutputLimits {
    /// Create new output limits with all fields set to None
    pub fn new() -> Self {
        Self {
            rate_limit: None,
            identical_limit: None,
            total_limit: None,
            flush_interval_ms: None,
        }
    }

    /// Set the lines-per-second cap
    pub fn with_rate_limit(mut self, lines_per_second: u32) -> Self {
        self.rate_limit = Some(lines_per_second);
        self
    }

    /// Set the consecutive identical line cap
    pub fn with_identical_limit(mut self, lines: u32) -> Self {
        self.identical_limit = Some(lines);
        self
    }

    /// Set the total line cap
    pub fn with_total_limit(mut self, lines: u32) -> Self {
        self.total_limit = Some(lines);
        self
    }

    /// Set the partial fragment hold time in milliseconds
    pub fn with_flush_interval_ms(mut self, millis: u64) -> Self {
        self.flush_interval_ms = Some(millis);
        self
    }

    /// Apply overrides from another OutputLimits, preferring values from `overrides`
    pub fn with_overrides(&self, overrides: &OutputLimits) -> OutputLimits {
        OutputLimits {
            rate_limit: overrides.rate_limit.or(self.rate_limit),
            identical_limit: overrides.identical_limit.or(self.identical_limit),
            total_limit: overrides.total_limit.or(self.total_limit),
            flush_interval_ms: overrides.flush_interval_ms.or(self.flush_interval_ms),
        }
    }

    /// The fragment hold time as a Duration, falling back to 50 ms
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.unwrap_or(50))
    }
}

impl Default for OutputLimits {
    fn default() -> Self {
        Self {
            rate_limit: Some(100),
            identical_limit: Some(500),
            total_limit: Some(10_000),
            flush_interval_ms: Some(50),
        }
    }
}

/// The immutable input of one execution.
///
/// `cmd_id` is a client-chosen identifier that tags every message in both
/// directions. `file_path` is an already-authorized absolute path to the
/// user's source file. `user` selects the workspace directory the child
/// runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Client-chosen identifier, unique within the connection lifetime
    pub cmd_id: String,

    /// Absolute path to the source file to execute
    pub file_path: PathBuf,

    /// Owner of the execution; selects the child's working directory
    pub user: String,
}

impl ExecutionRequest {
    /// Create a new execution request
    pub fn new(
        cmd_id: impl Into<String>,
        file_path: impl Into<PathBuf>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            cmd_id: cmd_id.into(),
            file_path: file_path.into(),
            user: user.into(),
        }
    }
}
