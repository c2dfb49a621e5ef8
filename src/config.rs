//! Configuration System using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults
//! 2. `dtest.toml` in the working directory, or the file named by `DTEST_CONFIG`
//! 3. Environment variables prefixed with `DTEST_`, nested with `__`
//!    (e.g. `DTEST_LOGGING__LEVEL=debug`)
//!
//! # Example
//! ```no_run
//! use dtest::config::DtestConfig;
//!
//! let config = DtestConfig::load()?;
//! config.validate()?;
//! println!("log level: {}", config.logging.level);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use dtest_scripting::RuntimeLimits;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "dtest.toml";

/// Environment variable naming an alternative configuration file.
pub const CONFIG_PATH_VAR: &str = "DTEST_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DtestConfig {
    pub logging: LoggingConfig,
    pub script: ScriptConfig,
    pub engine: EngineConfig,
}

/// Diagnostic output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    /// pretty, compact or json
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Script runtime limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptConfig {
    /// Abort after this many Rhai operations (0 = unlimited)
    pub max_operations: u64,
    pub max_call_levels: usize,
}

impl Default for ScriptConfig {
    fn default() -> Self {
        let limits = RuntimeLimits::default();
        Self {
            max_operations: limits.max_operations,
            max_call_levels: limits.max_call_levels,
        }
    }
}

/// Engine defaults applied before the script runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Launch delay between successive nodes, unless the script sets one
    pub execution_delay_ms: u64,
    /// Grace period before leftover processes are killed after a failure
    pub shutdown_grace_ms: u64,
}

impl EngineConfig {
    pub fn execution_delay(&self) -> Duration {
        Duration::from_millis(self.execution_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

impl DtestConfig {
    /// Load from `$DTEST_CONFIG` (or `dtest.toml`) and the environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load() -> Result<Self, figment::Error> {
        let path = std::env::var_os(CONFIG_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(path)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(DtestConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("DTEST_").ignore(&["CONFIG"]).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let level = self.logging.level.to_lowercase();
        if !VALID_LEVELS.contains(&level.as_str()) {
            return Err(format!(
                "Invalid logging.level '{}'. Must be one of: {}",
                self.logging.level,
                VALID_LEVELS.join(", ")
            ));
        }

        let format = self.logging.format.to_lowercase();
        if !VALID_FORMATS.contains(&format.as_str()) {
            return Err(format!(
                "Invalid logging.format '{}'. Must be one of: {}",
                self.logging.format,
                VALID_FORMATS.join(", ")
            ));
        }

        if self.script.max_call_levels == 0 {
            return Err("script.max_call_levels must be at least 1".to_string());
        }

        Ok(())
    }

    /// Runtime limits for the script engine.
    pub fn runtime_limits(&self) -> RuntimeLimits {
        RuntimeLimits {
            max_operations: self.script.max_operations,
            max_call_levels: self.script.max_call_levels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = DtestConfig::default();
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, "compact");
        assert_eq!(config.script.max_operations, 0);
        assert_eq!(config.script.max_call_levels, 64);
        assert_eq!(config.engine.execution_delay(), Duration::ZERO);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        Jail::expect_with(|_jail| {
            let config = DtestConfig::load_from("does-not-exist.toml")?;
            assert_eq!(config, DtestConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_file_and_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "dtest.toml",
                r#"
                [logging]
                level = "debug"

                [engine]
                execution_delay_ms = 250
                "#,
            )?;
            jail.set_env("DTEST_LOGGING__FORMAT", "json");
            jail.set_env("DTEST_SCRIPT__MAX_OPERATIONS", "1000");

            let config = DtestConfig::load()?;
            assert_eq!(config.logging.level, "debug");
            assert_eq!(config.logging.format, "json");
            assert_eq!(config.script.max_operations, 1000);
            assert_eq!(config.engine.execution_delay(), Duration::from_millis(250));
            assert_eq!(config.runtime_limits().max_operations, 1000);
            Ok(())
        });
    }

    #[test]
    fn test_config_path_override() {
        Jail::expect_with(|jail| {
            jail.create_file("suite.toml", "[script]\nmax_call_levels = 8\n")?;
            jail.set_env("DTEST_CONFIG", "suite.toml");
            let config = DtestConfig::load()?;
            assert_eq!(config.script.max_call_levels, 8);
            Ok(())
        });
    }

    #[test]
    fn test_validation_rejects_unknown_values() {
        let mut config = DtestConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().unwrap_err().contains("logging.level"));

        let mut config = DtestConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().unwrap_err().contains("logging.format"));

        let mut config = DtestConfig::default();
        config.script.max_call_levels = 0;
        assert!(config.validate().is_err());
    }
}
