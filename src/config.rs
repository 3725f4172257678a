//! Profiler configuration
//!
//! Defaults come from the running kernel where it matters (the tid range),
//! can be loaded from a TOML file, and are overridden by environment variables.

use crate::error::{ProfilerError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Kernel `PID_MAX_LIMIT` on 64-bit targets
pub const PID_MAX_LIMIT: usize = 4_194_304;

const PID_MAX_PATH: &str = "/proc/sys/kernel/pid_max";

/// Environment override for [`ProfilerConfig::max_tid`]
pub const ENV_MAX_TID: &str = "CTXPROF_MAX_TID";
/// Environment override for [`ProfilerConfig::min_sampling_interval`]
pub const ENV_MIN_INTERVAL: &str = "CTXPROF_MIN_INTERVAL";

/// Configuration shared by the storage region, the filter table and the engine
///
/// # Example
/// ```
/// use ctxprof::config::ProfilerConfig;
///
/// let config = ProfilerConfig::default();
/// assert!(config.max_tid > 0);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    /// Exclusive upper bound on tids the storage region and filter can address
    ///
    /// Default: `/proc/sys/kernel/pid_max`, or [`PID_MAX_LIMIT`] when unreadable
    pub max_tid: usize,

    /// Floor on the sampler tick in nanoseconds
    pub min_sampling_interval: u64,

    /// CPU sampling interval used when a session starts with `interval <= 0`
    pub default_cpu_interval: u64,

    /// Wall-clock sampling interval used when a session starts with `interval <= 0`
    pub default_wall_interval: u64,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            max_tid: read_pid_max().unwrap_or(PID_MAX_LIMIT),
            min_sampling_interval: 100_000,   // 100us
            default_cpu_interval: 10_000_000, // 10ms
            default_wall_interval: 50_000_000, // 50ms
        }
    }
}

impl ProfilerConfig {
    /// Small configuration for tests and embedding with a known thread range
    pub fn with_max_tid(max_tid: usize) -> Self {
        Self {
            max_tid,
            ..Self::default()
        }
    }

    /// Load configuration from a TOML file; absent keys keep their defaults
    ///
    /// ```toml
    /// max_tid = 65536
    /// min_sampling_interval = 1000000
    /// ```
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            ProfilerError::InvalidArgument(format!(
                "failed to parse {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `CTXPROF_*` environment overrides in place
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var(ENV_MAX_TID) {
            self.max_tid = value.trim().parse().map_err(|_| {
                ProfilerError::InvalidArgument(format!("{ENV_MAX_TID} must be an integer"))
            })?;
        }
        if let Ok(value) = std::env::var(ENV_MIN_INTERVAL) {
            self.min_sampling_interval = value.trim().parse().map_err(|_| {
                ProfilerError::InvalidArgument(format!("{ENV_MIN_INTERVAL} must be an integer"))
            })?;
        }
        self.validate()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_tid == 0 || self.max_tid > PID_MAX_LIMIT {
            return Err(ProfilerError::InvalidArgument(format!(
                "max_tid must be in [1, {}], got {}",
                PID_MAX_LIMIT, self.max_tid
            )));
        }
        if self.min_sampling_interval == 0 {
            return Err(ProfilerError::InvalidArgument(
                "min_sampling_interval must be > 0".to_string(),
            ));
        }
        if self.default_cpu_interval == 0 || self.default_wall_interval == 0 {
            return Err(ProfilerError::InvalidArgument(
                "default intervals must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn read_pid_max() -> Option<usize> {
    let raw = fs::read_to_string(PID_MAX_PATH).ok()?;
    let value: usize = raw.trim().parse().ok()?;
    (value > 0).then_some(value.min(PID_MAX_LIMIT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ProfilerConfig::default();
        assert!(config.max_tid >= 1 && config.max_tid <= PID_MAX_LIMIT);
        assert_eq!(config.min_sampling_interval, 100_000);
        assert_eq!(config.default_cpu_interval, 10_000_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_max_tid() {
        let config = ProfilerConfig::with_max_tid(1024);
        assert_eq!(config.max_tid, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_max_tid() {
        assert!(ProfilerConfig::with_max_tid(0).validate().is_err());
        assert!(ProfilerConfig::with_max_tid(PID_MAX_LIMIT + 1)
            .validate()
            .is_err());
    }

    #[test]
    #[allow(clippy::field_reassign_with_default)]
    fn test_invalid_intervals() {
        let mut config = ProfilerConfig::default();
        config.min_sampling_interval = 0;
        assert!(config.validate().is_err());

        let mut config = ProfilerConfig::default();
        config.default_wall_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_partial() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_tid = 65536").unwrap();
        writeln!(file, "min_sampling_interval = 1000000").unwrap();

        let config = ProfilerConfig::from_toml(file.path()).unwrap();
        assert_eq!(config.max_tid, 65536);
        assert_eq!(config.min_sampling_interval, 1_000_000);
        assert_eq!(config.default_cpu_interval, 10_000_000);
    }

    #[test]
    fn test_from_toml_rejects_garbage() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "max_tid = \"lots\"").unwrap();
        assert!(matches!(
            ProfilerConfig::from_toml(file.path()),
            Err(ProfilerError::InvalidArgument(_))
        ));
    }

    #[test]
    #[serial_test::serial]
    fn test_env_overrides() {
        std::env::set_var(ENV_MAX_TID, "2048");
        std::env::set_var(ENV_MIN_INTERVAL, " 500000 ");
        let config = ProfilerConfig::from_env();
        std::env::set_var(ENV_MIN_INTERVAL, "often");
        let bad = ProfilerConfig::from_env();
        std::env::remove_var(ENV_MAX_TID);
        std::env::remove_var(ENV_MIN_INTERVAL);

        let config = config.unwrap();
        assert_eq!(config.max_tid, 2048);
        assert_eq!(config.min_sampling_interval, 500_000);
        assert!(matches!(bad, Err(ProfilerError::InvalidArgument(_))));
    }

    #[test]
    fn test_from_toml_missing_file() {
        assert!(matches!(
            ProfilerConfig::from_toml("/nonexistent/ctxprof.toml"),
            Err(ProfilerError::Io(_))
        ));
    }
}
