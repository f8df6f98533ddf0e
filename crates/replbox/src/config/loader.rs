//! Configuration file loading
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;

use config::{Config as ConfigBuilder, File, FileFormat};

use crate::config::{Config, ConfigError};

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = ConfigBuilder::builder()
            .add_source(File::from(path))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        if self.workspace_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("workspace_root is empty".to_string()));
        }

        if let Some(wall) = self.default_limits.wall_clock_limit
            && wall <= 0.0
        {
            return Err(ConfigError::Invalid(format!(
                "wall_clock_limit must be positive, got {wall}"
            )));
        }

        if let Some(grace) = self.default_limits.term_grace
            && grace < 0.0
        {
            return Err(ConfigError::Invalid(format!(
                "term_grace must not be negative, got {grace}"
            )));
        }

        for (name, value) in [
            ("rate_limit", self.output_limits.rate_limit),
            ("identical_limit", self.output_limits.identical_limit),
            ("total_limit", self.output_limits.total_limit),
        ] {
            if value == Some(0) {
                return Err(ConfigError::Invalid(format!("{name} must not be zero")));
            }
        }

        if self.output_limits.flush_interval_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "flush_interval_ms must not be zero".to_string(),
            ));
        }

        Ok(())
    }
}
