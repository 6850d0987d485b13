//! Configuration loading and typed config structures for Cellsync.
//!
//! The canonical configuration lives in `cellsync.yaml`. This module defines
//! strongly-typed structs that mirror the YAML structure, and provides a
//! loader that reads and validates the file. Every field has a default, so
//! an empty file (or no file at all) yields a runnable five-cell line.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but describes an impossible setup.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CellsyncConfig {
    /// Grid dimensions and initial seeds.
    #[serde(default)]
    pub grid: GridConfig,

    /// Tick coordinator behavior.
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Run loop bounds.
    #[serde(default)]
    pub run: RunConfig,

    /// Observation ledger settings.
    #[serde(default)]
    pub observer: ObserverConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CellsyncConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `CELLSYNC_MAX_TICKS` overrides `run.max_ticks`
    /// - `CELLSYNC_PROPAGATION` overrides `coordinator.propagation`
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, apply environment
    /// overrides, and validate the result.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        // serde_yml rejects an empty document; treat it as "all defaults".
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `CELLSYNC_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("CELLSYNC_MAX_TICKS") {
            self.run.max_ticks = val.parse().map_err(|err| ConfigError::Invalid {
                reason: format!("CELLSYNC_MAX_TICKS={val}: {err}"),
            })?;
        }
        if let Ok(val) = std::env::var("CELLSYNC_PROPAGATION") {
            self.coordinator.propagation = val.parse()?;
        }
        Ok(())
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid.width == 0 || self.grid.height == 0 {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "grid must be at least 1x1, got {}x{}",
                    self.grid.width, self.grid.height
                ),
            });
        }
        if let Some(seed) = self
            .grid
            .seeds
            .iter()
            .find(|seed| seed.x >= self.grid.width || seed.y >= self.grid.height)
        {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "seed ({}, {}) lies outside the {}x{} grid",
                    seed.x, seed.y, self.grid.width, self.grid.height
                ),
            });
        }
        if self.coordinator.dispatch_timeout_ms == 0 || self.coordinator.settle_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                reason: "coordinator timeouts must be at least 1ms".to_owned(),
            });
        }
        Ok(())
    }
}

/// Grid dimensions and the cells gooed before the first tick.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GridConfig {
    /// Number of columns.
    #[serde(default = "default_width")]
    pub width: usize,

    /// Number of rows.
    #[serde(default = "default_height")]
    pub height: usize,

    /// Cells set before the first tick.
    #[serde(default = "default_seeds")]
    pub seeds: Vec<SeedCell>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            seeds: default_seeds(),
        }
    }
}

/// Grid coordinate of a seeded cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SeedCell {
    /// Column, 0-based from the left.
    pub x: usize,
    /// Row, 0-based from the top.
    pub y: usize,
}

/// How far a committed change may travel within one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationMode {
    /// Every cell snapshots its pending state when it accepts the tick
    /// signal, and nobody propagates until every cell has accepted. A
    /// change moves exactly one hop per tick.
    #[default]
    SingleHop,
    /// A cell reacts as soon as it accepts the tick signal, using whatever
    /// its pending state holds at that moment. A neighbor that already
    /// reacted this tick may have overwritten it, so a change can ripple
    /// more than one hop depending on arrival order.
    Unordered,
}

impl FromStr for PropagationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single_hop" | "single-hop" => Ok(Self::SingleHop),
            "unordered" => Ok(Self::Unordered),
            other => Err(ConfigError::Invalid {
                reason: format!("unknown propagation mode: {other}"),
            }),
        }
    }
}

/// Tick coordinator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CoordinatorConfig {
    /// How long a single cell may take to accept its tick signal.
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,

    /// How long a tick may take to settle once every cell has accepted.
    #[serde(default = "default_settle_timeout_ms")]
    pub settle_timeout_ms: u64,

    /// Propagation ordering.
    #[serde(default)]
    pub propagation: PropagationMode,
}

impl CoordinatorConfig {
    /// Dispatch timeout as a [`Duration`].
    pub const fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    /// Settle timeout as a [`Duration`].
    pub const fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
            settle_timeout_ms: default_settle_timeout_ms(),
            propagation: PropagationMode::default(),
        }
    }
}

/// Run loop bounds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunConfig {
    /// Maximum number of ticks (0 = unlimited).
    #[serde(default = "default_max_ticks")]
    pub max_ticks: u64,

    /// Real-time milliseconds to sleep between ticks.
    #[serde(default)]
    pub tick_interval_ms: u64,

    /// Stop after the first tick that exchanges no neighbor messages.
    #[serde(default = "default_true")]
    pub stop_when_quiescent: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_ticks: default_max_ticks(),
            tick_interval_ms: 0,
            stop_when_quiescent: true,
        }
    }
}

/// Observation ledger configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObserverConfig {
    /// Whether committed changes are published at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Entries buffered per subscriber before the oldest are dropped.
    #[serde(default = "default_ledger_capacity")]
    pub ledger_capacity: usize,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ledger_capacity: default_ledger_capacity(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level used when `RUST_LOG` is unset (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions
// ---------------------------------------------------------------------------

const fn default_width() -> usize {
    5
}

const fn default_height() -> usize {
    1
}

fn default_seeds() -> Vec<SeedCell> {
    vec![SeedCell { x: 2, y: 0 }]
}

const fn default_dispatch_timeout_ms() -> u64 {
    1_000
}

const fn default_settle_timeout_ms() -> u64 {
    5_000
}

const fn default_max_ticks() -> u64 {
    13
}

const fn default_ledger_capacity() -> usize {
    1_024
}

fn default_log_level() -> String {
    "info".to_owned()
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = CellsyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.grid.width, 5);
        assert_eq!(config.grid.height, 1);
        assert_eq!(config.grid.seeds, vec![SeedCell { x: 2, y: 0 }]);
        assert_eq!(config.coordinator.propagation, PropagationMode::SingleHop);
        assert_eq!(config.run.max_ticks, 13);
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r"
grid:
  width: 4
  height: 3
  seeds:
    - { x: 0, y: 0 }
    - { x: 3, y: 2 }

coordinator:
  dispatch_timeout_ms: 250
  settle_timeout_ms: 2000
  propagation: unordered

run:
  max_ticks: 40
  tick_interval_ms: 10
  stop_when_quiescent: false

observer:
  enabled: false
  ledger_capacity: 16

logging:
  level: debug
  format: json
";
        let config = CellsyncConfig::parse(yaml).unwrap();
        assert_eq!(config.grid.width, 4);
        assert_eq!(config.grid.height, 3);
        assert_eq!(config.grid.seeds.len(), 2);
        assert_eq!(config.coordinator.propagation, PropagationMode::Unordered);
        assert_eq!(
            config.coordinator.dispatch_timeout(),
            Duration::from_millis(250)
        );
        assert!(!config.run.stop_when_quiescent);
        assert!(!config.observer.enabled);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn parse_minimal_yaml() {
        let config = CellsyncConfig::parse("grid:\n  width: 9\n").unwrap();
        assert_eq!(config.grid.width, 9);
        // Everything else uses defaults
        assert_eq!(config.grid.height, 1);
        assert_eq!(config.coordinator.settle_timeout_ms, 5_000);
    }

    #[test]
    fn parse_empty_yaml() {
        assert!(CellsyncConfig::parse("").is_ok());
    }

    #[test]
    fn rejects_zero_sized_grid() {
        let result = CellsyncConfig::parse("grid:\n  width: 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn rejects_seed_outside_grid() {
        let yaml = "grid:\n  width: 2\n  height: 2\n  seeds:\n    - { x: 2, y: 0 }\n";
        let result = CellsyncConfig::parse(yaml);
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn rejects_zero_timeouts() {
        let result = CellsyncConfig::parse("coordinator:\n  settle_timeout_ms: 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn propagation_mode_from_str() {
        assert_eq!(
            "single-hop".parse::<PropagationMode>().unwrap(),
            PropagationMode::SingleHop
        );
        assert_eq!(
            "UNORDERED".parse::<PropagationMode>().unwrap(),
            PropagationMode::Unordered
        );
        assert!("sideways".parse::<PropagationMode>().is_err());
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("cellsync.yaml");
        if path.exists() {
            let config = CellsyncConfig::from_file(&path);
            assert!(config.is_ok(), "Failed to load project config: {config:?}");
        }
    }
}
