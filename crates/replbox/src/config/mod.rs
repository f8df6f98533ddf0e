use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

use crate::types::{OutputLimits, ResourceLimits};

mod loader;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../replbox.example.toml");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Python interpreter used for executions (PATH lookup if not absolute)
    #[serde(default)]
    pub python_path: Option<PathBuf>,

    /// Root directory holding one workspace subdirectory per user
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,

    /// Emit debug messages on the client channel
    #[serde(default)]
    pub debug: bool,

    /// Limits installed on every interpreter child.
    /// These can be overridden per request via `with_overrides`.
    #[serde(default)]
    pub default_limits: ResourceLimits,

    /// Output flow control applied during the script phase
    #[serde(default)]
    pub output_limits: OutputLimits,
}

impl Config {
    /// Create a config with the embedded defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// The interpreter binary to spawn
    pub fn python_binary(&self) -> PathBuf {
        self.python_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("python3"))
    }

    /// The workspace directory for a user
    pub fn workspace_dir(&self, user: &str) -> PathBuf {
        self.workspace_root.join(user)
    }

    /// Merge resource limits with the configured defaults
    pub fn effective_limits(&self, overrides: Option<&ResourceLimits>) -> ResourceLimits {
        match overrides {
            Some(limits) => self.default_limits.with_overrides(limits),
            None => self.default_limits.clone(),
        }
    }

    /// Merge output limits with the configured defaults
    pub fn effective_output_limits(&self, overrides: Option<&OutputLimits>) -> OutputLimits {
        match overrides {
            Some(limits) => self.output_limits.with_overrides(limits),
            None => self.output_limits.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_workspace_root() -> PathBuf {
    PathBuf::from("/var/lib/replbox/workspaces")
}
