//! Configuration management for the orchestrator.
//!
//! Loads configuration from TOML files and provides runtime defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::click::ClickTiming;
use crate::coordinator::CoordinatorSettings;
use crate::geometry::{ButtonLayout, Point, Region};
use crate::orchestrator::TableLayout;
use crate::recovery::RecoveryPolicy;
use crate::scheduler::{IntervalSettings, SchedulingStrategy};
use crate::types::TableId;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub intervals: IntervalsConfig,

    #[serde(default)]
    pub resource: ResourceConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub clicking: ClickingConfig,

    #[serde(default)]
    pub run: RunConfig,

    #[serde(default = "default_tables")]
    pub tables: Vec<TableEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            intervals: IntervalsConfig::default(),
            resource: ResourceConfig::default(),
            recovery: RecoveryConfig::default(),
            clicking: ClickingConfig::default(),
            run: RunConfig::default(),
            tables: default_tables(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Whether the orchestrator runs at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalsConfig {
    /// Capture interval while any table is in the countdown tail
    #[serde(default = "default_fast_ms")]
    pub fast_ms: u64,

    /// Capture interval during the clickable window
    #[serde(default = "default_normal_ms")]
    pub normal_ms: u64,

    /// Capture interval while waiting between rounds
    #[serde(default = "default_slow_ms")]
    pub slow_ms: u64,

    /// Interval strategy: fastest, slowest, fixed, majority, per_table
    #[serde(default)]
    pub strategy: SchedulingStrategy,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            fast_ms: default_fast_ms(),
            normal_ms: default_normal_ms(),
            slow_ms: default_slow_ms(),
            strategy: SchedulingStrategy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// CPU percentage above which capture intervals widen
    #[serde(default = "default_cpu_threshold")]
    pub cpu_threshold: f32,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            cpu_threshold: default_cpu_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Backoff ladder between consecutive failed attempts, in seconds
    #[serde(default = "default_retry_delays")]
    pub retry_delays_secs: Vec<u64>,

    /// Consecutive failures before fallback/stuck escalation
    #[serde(default = "default_stuck_threshold")]
    pub stuck_threshold: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            retry_delays_secs: default_retry_delays(),
            stuck_threshold: default_stuck_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickingConfig {
    /// Pause between the choose and confirm clicks, in milliseconds
    #[serde(default = "default_phase_delay_min")]
    pub phase_delay_min_ms: u64,

    #[serde(default = "default_phase_delay_max")]
    pub phase_delay_max_ms: u64,

    /// Minimum spacing between any two clicks on the shared surface
    #[serde(default = "default_gap_min")]
    pub gap_min_ms: u64,

    #[serde(default = "default_gap_max")]
    pub gap_max_ms: u64,
}

impl Default for ClickingConfig {
    fn default() -> Self {
        Self {
            phase_delay_min_ms: default_phase_delay_min(),
            phase_delay_max_ms: default_phase_delay_max(),
            gap_min_ms: default_gap_min(),
            gap_max_ms: default_gap_max(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Stop once this many rounds were recorded across all tables
    #[serde(default)]
    pub round_target: Option<u64>,

    /// Rounds each table's replay script covers in replay mode
    #[serde(default = "default_replay_rounds")]
    pub replay_rounds: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            round_target: None,
            replay_rounds: default_replay_rounds(),
        }
    }
}

/// One table definition: where it lives on the shared surface and which
/// rules it plays
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableEntry {
    pub id: TableId,
    pub region: Region,
    pub timer_region: Region,
    pub blue_score_region: Region,
    pub red_score_region: Region,
    pub buttons: ButtonsEntry,
    #[serde(default)]
    pub rules: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ButtonsEntry {
    pub choose_blue: Point,
    pub choose_red: Point,
    pub confirm: Point,
    pub cancel: Point,
}

impl TableEntry {
    pub fn layout(&self) -> TableLayout {
        TableLayout {
            region: self.region,
            timer_region: self.timer_region,
            blue_score_region: self.blue_score_region,
            red_score_region: self.red_score_region,
            buttons: ButtonLayout {
                choose_blue: self.buttons.choose_blue,
                choose_red: self.buttons.choose_red,
                confirm: self.buttons.confirm,
                cancel: self.buttons.cancel,
            },
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_fast_ms() -> u64 {
    100
}

fn default_normal_ms() -> u64 {
    200
}

fn default_slow_ms() -> u64 {
    1000
}

fn default_cpu_threshold() -> f32 {
    80.0
}

fn default_retry_delays() -> Vec<u64> {
    vec![1, 2, 4]
}

fn default_stuck_threshold() -> u32 {
    3
}

fn default_phase_delay_min() -> u64 {
    50
}

fn default_phase_delay_max() -> u64 {
    100
}

fn default_gap_min() -> u64 {
    10
}

fn default_gap_max() -> u64 {
    20
}

fn default_replay_rounds() -> u32 {
    12
}

fn default_tables() -> Vec<TableEntry> {
    let buttons = ButtonsEntry {
        choose_blue: Point::new(52, 132),
        choose_red: Point::new(188, 132),
        confirm: Point::new(120, 158),
        cancel: Point::new(120, 172),
    };
    vec![
        TableEntry {
            id: 1,
            region: Region::new(178, 336, 240, 180),
            timer_region: Region::new(100, 12, 40, 24),
            blue_score_region: Region::new(24, 12, 30, 24),
            red_score_region: Region::new(186, 12, 30, 24),
            buttons: buttons.clone(),
            rules: Some("BBP-P;BPB-B".to_string()),
        },
        TableEntry {
            id: 2,
            region: Region::new(430, 336, 240, 180),
            timer_region: Region::new(100, 12, 40, 24),
            blue_score_region: Region::new(24, 12, 30, 24),
            red_score_region: Region::new(186, 12, 30, 24),
            buttons,
            rules: Some("PPB-B".to_string()),
        },
    ]
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        Self::load_from_path(Self::default_config_path())
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: PathBuf) -> Self {
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("No config file found at {:?}, using defaults", path);
                Self::default()
            }
        }
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("table-orchestrator")
            .join("config.toml")
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: PathBuf) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        std::fs::write(&path, contents)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Coordinator tunables derived from the loaded sections
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            intervals: IntervalSettings {
                fast_ms: self.intervals.fast_ms,
                normal_ms: self.intervals.normal_ms,
                slow_ms: self.intervals.slow_ms,
            },
            strategy: self.intervals.strategy,
            cpu_threshold: self.resource.cpu_threshold,
            recovery: RecoveryPolicy::new(
                self.recovery
                    .retry_delays_secs
                    .iter()
                    .map(|s| Duration::from_secs(*s))
                    .collect(),
                self.recovery.stuck_threshold,
            ),
            timing: ClickTiming {
                phase_delay_min_ms: self.clicking.phase_delay_min_ms,
                phase_delay_max_ms: self.clicking.phase_delay_max_ms,
                gap_min_ms: self.clicking.gap_min_ms,
                gap_max_ms: self.clicking.gap_max_ms,
            },
            round_target: self.run.round_target,
            reload_ready_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.general.enabled);
        assert_eq!(config.intervals.fast_ms, 100);
        assert_eq!(config.intervals.normal_ms, 200);
        assert_eq!(config.recovery.stuck_threshold, 3);
        assert_eq!(config.tables.len(), 2);
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[general]
enabled = true
log_level = "debug"

[intervals]
fast_ms = 50
strategy = "per_table"

[run]
round_target = 40

[[tables]]
id = 3
region = { x = 10, y = 20, width = 240, height = 180 }
timer_region = { x = 100, y = 12, width = 40, height = 24 }
blue_score_region = { x = 24, y = 12, width = 30, height = 24 }
red_score_region = { x = 186, y = 12, width = 30, height = 24 }
rules = "BBB-P"

[tables.buttons]
choose_blue = { x = 52, y = 132 }
choose_red = { x = 188, y = 132 }
confirm = { x = 120, y = 158 }
cancel = { x = 120, y = 172 }
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.intervals.fast_ms, 50);
        assert_eq!(config.intervals.strategy, SchedulingStrategy::PerTable);
        assert_eq!(config.run.round_target, Some(40));
        assert_eq!(config.tables.len(), 1);
        assert_eq!(config.tables[0].id, 3);
        assert_eq!(config.tables[0].rules.as_deref(), Some("BBB-P"));
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.intervals.normal_ms = 250;
        config.run.round_target = Some(10);
        config.save_to_path(path.clone()).unwrap();

        let reloaded = Config::load_from_path(path);
        assert_eq!(reloaded.intervals.normal_ms, 250);
        assert_eq!(reloaded.run.round_target, Some(10));
        assert_eq!(reloaded.tables.len(), config.tables.len());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = Config::load_from_path(PathBuf::from("/nonexistent/config.toml"));
        assert_eq!(config.intervals.slow_ms, 1000);
    }

    #[test]
    fn test_table_entry_to_layout() {
        let config = Config::default();
        let layout = config.tables[0].layout();
        assert_eq!(layout.region, Region::new(178, 336, 240, 180));
        assert_eq!(layout.buttons.choose_blue, Point::new(52, 132));
    }

    #[test]
    fn test_coordinator_settings_reflect_sections() {
        let mut config = Config::default();
        config.clicking.gap_max_ms = 25;
        config.recovery.stuck_threshold = 4;
        let settings = config.coordinator_settings();
        assert_eq!(settings.timing.gap_max_ms, 25);
        assert_eq!(settings.recovery.stuck_threshold(), 4);
    }
}
