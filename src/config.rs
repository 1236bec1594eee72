//! Rig configuration using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults (the bench rig's wiring and timing)
//! 2. `config/drop_rig.toml` (or the file given with `--config`), optional
//! 3. Environment variables prefixed with `DROP_RIG_`, `__` separating sections
//!
//! # Example
//! ```no_run
//! use drop_rig::config::RigConfig;
//!
//! // DROP_RIG_RIG__MAX_CYCLES=100 overrides [rig] max_cycles
//! let config = RigConfig::load()?;
//! println!("Max cycles: {}", config.rig.max_cycles);
//! # Ok::<(), figment::Error>(())
//! ```
//!
//! # File layout
//!
//! ```toml
//! [rig]
//! default_cycles = 10
//! max_cycles = 500
//! policy = "timed"          # or "switch-only"
//! lift_seconds = 30.0
//! drop_seconds = 1.0
//! log_file = "droptests.txt"
//!
//! [gpio]
//! chip = "/dev/gpiochip0"
//!
//! [signals]
//! limit_switches = [20, 21]
//! relay = 22
//! clutch = 27               # optional
//!
//! [signals.adc]
//! clock = 18
//! data_out = 24
//! data_in = 23
//! chip_select = 25
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adc::IrRange;
use crate::controller::{RunConfiguration, TerminationPolicy};
use crate::error::{AppResult, RigError};
use crate::hardware::SignalMap;

/// Config file read when none is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "config/drop_rig.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "DROP_RIG_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RigConfig {
    /// Test cycle settings
    #[serde(default)]
    pub rig: RigSettings,
    /// GPIO device selection
    #[serde(default)]
    pub gpio: GpioSettings,
    /// Physical wiring
    #[serde(default)]
    pub signals: SignalMap,
    /// Log output
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Infrared range sensor window
    #[serde(default)]
    pub ir_range: IrRange,
}

/// Cycle termination policy as written in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    /// Only the limit switches end a cycle
    SwitchOnly,
    /// Limit switches or the lift timer end a cycle
    Timed,
}

/// Test cycle settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RigSettings {
    /// Cycle count offered when none is given on the command line
    #[serde(default = "default_cycles")]
    pub default_cycles: u32,
    /// Largest cycle count accepted
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,
    /// Termination policy
    #[serde(default = "default_policy")]
    pub policy: PolicyKind,
    /// Lift timeout in seconds (timed policy)
    #[serde(default = "default_lift_seconds")]
    pub lift_seconds: f64,
    /// Settle delay after the relay opens, in seconds
    #[serde(default = "default_drop_seconds")]
    pub drop_seconds: f64,
    /// Interval between termination checks in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Countdown before the first cycle, in seconds
    #[serde(default = "default_countdown_seconds")]
    pub countdown_seconds: u32,
    /// Run log path (overwritten every session)
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    /// Per-poll diagnostics and debug-level logging
    #[serde(default)]
    pub debug: bool,
    /// Wait for Enter instead of the settle delay
    #[serde(default)]
    pub step_through: bool,
}

/// GPIO device selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpioSettings {
    /// Character device of the GPIO chip
    #[serde(default = "default_chip")]
    pub chip: PathBuf,
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_cycles() -> u32 {
    10
}

fn default_max_cycles() -> u32 {
    500
}

fn default_policy() -> PolicyKind {
    PolicyKind::Timed
}

fn default_lift_seconds() -> f64 {
    30.0
}

fn default_drop_seconds() -> f64 {
    1.0
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_countdown_seconds() -> u32 {
    3
}

fn default_log_file() -> PathBuf {
    PathBuf::from("droptests.txt")
}

fn default_chip() -> PathBuf {
    PathBuf::from("/dev/gpiochip0")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for RigSettings {
    fn default() -> Self {
        Self {
            default_cycles: default_cycles(),
            max_cycles: default_max_cycles(),
            policy: default_policy(),
            lift_seconds: default_lift_seconds(),
            drop_seconds: default_drop_seconds(),
            poll_interval_ms: default_poll_interval_ms(),
            countdown_seconds: default_countdown_seconds(),
            log_file: default_log_file(),
            debug: false,
            step_through: false,
        }
    }
}

impl Default for GpioSettings {
    fn default() -> Self {
        Self {
            chip: default_chip(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl RigConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path.as_ref()).extract()
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(RigConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            ));
        }

        let rig = &self.rig;
        if rig.max_cycles == 0 {
            return Err("max_cycles must be at least 1".to_string());
        }
        if rig.default_cycles == 0 || rig.default_cycles > rig.max_cycles {
            return Err(format!(
                "default_cycles {} must be within 1..={}",
                rig.default_cycles, rig.max_cycles
            ));
        }
        if !rig.lift_seconds.is_finite() || rig.lift_seconds <= 0.0 {
            return Err(format!(
                "lift_seconds must be positive, got {}",
                rig.lift_seconds
            ));
        }
        if !rig.drop_seconds.is_finite() || rig.drop_seconds < 0.0 {
            return Err(format!(
                "drop_seconds must not be negative, got {}",
                rig.drop_seconds
            ));
        }
        if Duration::try_from_secs_f64(rig.lift_seconds).is_err() {
            return Err(format!("lift_seconds {} is too large", rig.lift_seconds));
        }
        if Duration::try_from_secs_f64(rig.drop_seconds).is_err() {
            return Err(format!("drop_seconds {} is too large", rig.drop_seconds));
        }
        if rig.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be at least 1".to_string());
        }
        if rig.log_file.as_os_str().is_empty() {
            return Err("log_file cannot be empty".to_string());
        }

        self.signals.validate()?;

        if self.ir_range.min > self.ir_range.max {
            return Err(format!(
                "IR range min {} exceeds max {}",
                self.ir_range.min, self.ir_range.max
            ));
        }

        Ok(())
    }

    /// Termination policy with its lift timeout.
    pub fn policy(&self) -> TerminationPolicy {
        match self.rig.policy {
            PolicyKind::SwitchOnly => TerminationPolicy::SwitchOnly,
            PolicyKind::Timed => TerminationPolicy::SwitchOrTimer {
                lift: Duration::from_secs_f64(self.rig.lift_seconds),
            },
        }
    }

    /// Build the session configuration for `requested` cycles.
    ///
    /// Fails with `InvalidCycleCount` outside `1..=max_cycles`.
    pub fn run_configuration(&self, requested: i64) -> AppResult<RunConfiguration> {
        self.validate().map_err(RigError::Configuration)?;
        Ok(
            RunConfiguration::new(requested, self.rig.max_cycles, self.policy())?
                .with_drop_duration(Duration::from_secs_f64(self.rig.drop_seconds))
                .with_poll_interval(Duration::from_millis(self.rig.poll_interval_ms))
                .with_countdown(self.rig.countdown_seconds)
                .with_debug(self.rig.debug)
                .with_step_through(self.rig.step_through),
        )
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::PinId;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let config = RigConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rig.max_cycles, 500);
        assert_eq!(config.rig.log_file, PathBuf::from("droptests.txt"));
        assert_eq!(
            config.policy(),
            TerminationPolicy::SwitchOrTimer {
                lift: Duration::from_secs(30)
            }
        );
    }

    #[test]
    fn file_and_env_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "drop_rig.toml",
                r#"
                [rig]
                policy = "switch-only"
                max_cycles = 100

                [signals]
                limit_switches = [5, 6]
                relay = 13
                clutch = 19

                [signals.adc]
                clock = 11
                data_out = 10
                data_in = 9
                chip_select = 8
                "#,
            )?;
            jail.set_env("DROP_RIG_RIG__MAX_CYCLES", "50");
            jail.set_env("DROP_RIG_LOGGING__LEVEL", "debug");

            let config = RigConfig::load_from("drop_rig.toml")?;
            assert_eq!(config.rig.policy, PolicyKind::SwitchOnly);
            assert_eq!(config.rig.max_cycles, 50);
            assert_eq!(config.rig.default_cycles, 10);
            assert_eq!(config.logging.level, "debug");
            assert_eq!(config.signals.clutch, Some(PinId(19)));
            assert_eq!(config.signals.limit_switches, [PinId(5), PinId(6)]);
            assert_eq!(config.policy(), TerminationPolicy::SwitchOnly);
            Ok(())
        });
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        Jail::expect_with(|_jail| {
            let config = RigConfig::load_from("does_not_exist.toml")?;
            assert_eq!(config, RigConfig::default());
            Ok(())
        });
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = RigConfig::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());

        let mut config = RigConfig::default();
        config.rig.default_cycles = 600;
        assert!(config.validate().is_err());

        let mut config = RigConfig::default();
        config.rig.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = RigConfig::default();
        config.signals.relay = config.signals.adc.clock;
        assert!(config.validate().unwrap_err().contains("more than once"));
    }

    #[test]
    fn run_configuration_carries_timing() {
        let mut config = RigConfig::default();
        config.rig.drop_seconds = 2.5;
        config.rig.step_through = true;

        let run = config.run_configuration(12).unwrap();
        assert_eq!(run.cycle_count(), 12);
        assert_eq!(run.max_cycles(), 500);
        assert_eq!(run.drop_duration(), Duration::from_millis(2500));
        assert_eq!(run.poll_interval(), Duration::from_millis(250));
        assert!(run.step_through());

        assert!(matches!(
            config.run_configuration(0),
            Err(RigError::InvalidCycleCount { .. })
        ));
    }

    #[test]
    fn oversized_timings_are_rejected() {
        let mut config = RigConfig::default();
        config.rig.lift_seconds = 1e20;
        assert!(config.validate().unwrap_err().contains("lift_seconds"));
        assert!(matches!(
            config.run_configuration(5),
            Err(RigError::Configuration(_))
        ));

        let mut config = RigConfig::default();
        config.rig.drop_seconds = 1e20;
        assert!(config.validate().unwrap_err().contains("drop_seconds"));
        assert!(matches!(
            config.run_configuration(5),
            Err(RigError::Configuration(_))
        ));
    }

    #[test]
    fn renders_as_toml() {
        let rendered = RigConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[rig]"));
        assert!(rendered.contains("max_cycles = 500"));
        assert!(rendered.contains("[signals.adc]"));
    }
}
