//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section is optional. Missing sections and fields take the values
//! the machine was commissioned with.

use crate::domain::types::{PointsTable, Sensor};
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique machine identifier (used as metrics label)
    #[serde(default = "default_site_id")]
    pub id: String,
}

fn default_site_id() -> String {
    "sorter".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

/// BCM pin numbers
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    /// Ultrasonic trigger (output)
    pub trig: u8,
    /// Ultrasonic echo (input)
    pub echo: u8,
    /// Conveyor relay 1 (forward)
    pub conveyor_forward: u8,
    /// Conveyor relay 2 (reverse)
    pub conveyor_reverse: u8,
    /// Pusher relay 1 (down)
    pub pusher_down: u8,
    /// Pusher relay 2 (up)
    pub pusher_up: u8,
    pub ir_glass: u8,
    pub ir_plastic: u8,
    pub ir_can: u8,
    pub limit_home: u8,
    /// Far travel limit, doubles as the CAN ejection point
    pub limit_end: u8,
    pub ir_door: u8,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            trig: 20,
            echo: 21,
            conveyor_forward: 23,
            conveyor_reverse: 24,
            pusher_down: 26,
            pusher_up: 16,
            ir_glass: 17,
            ir_plastic: 13,
            ir_can: 19,
            limit_home: 25,
            limit_end: 7,
            ir_door: 22,
        }
    }
}

impl PinConfig {
    pub fn sensor_pin(&self, sensor: Sensor) -> u8 {
        match sensor {
            Sensor::Glass => self.ir_glass,
            Sensor::Plastic => self.ir_plastic,
            Sensor::Can => self.ir_can,
            Sensor::HomeLimit => self.limit_home,
            Sensor::EndLimit => self.limit_end,
            Sensor::Door => self.ir_door,
        }
    }

    /// Relay outputs (active-low)
    pub fn relays(&self) -> [u8; 4] {
        [self.conveyor_forward, self.conveyor_reverse, self.pusher_down, self.pusher_up]
    }

    /// All outputs including the rangefinder trigger
    pub fn outputs(&self) -> [u8; 5] {
        [self.trig, self.conveyor_forward, self.conveyor_reverse, self.pusher_down, self.pusher_up]
    }

    /// All inputs (pulled up)
    pub fn inputs(&self) -> [u8; 7] {
        [
            self.echo,
            self.ir_glass,
            self.ir_plastic,
            self.ir_can,
            self.limit_home,
            self.limit_end,
            self.ir_door,
        ]
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Consecutive agreeing samples needed before a digital input changes state
    pub debounce_samples: u32,
    pub debounce_interval_ms: u64,
    /// Budget for each echo phase (rise, then high time)
    pub echo_timeout_ms: u64,
    pub trigger_pulse_us: u64,
    /// Trigger held low before each measurement
    pub trigger_settle_ms: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            debounce_samples: 2,
            debounce_interval_ms: 2,
            echo_timeout_ms: 50,
            trigger_pulse_us: 10,
            trigger_settle_ms: 20,
        }
    }
}

impl SensorConfig {
    pub fn debounce_interval(&self) -> Duration {
        Duration::from_millis(self.debounce_interval_ms)
    }

    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }

    pub fn trigger_pulse(&self) -> Duration {
        Duration::from_micros(self.trigger_pulse_us)
    }

    pub fn trigger_settle(&self) -> Duration {
        Duration::from_millis(self.trigger_settle_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PositioningConfig {
    pub poll_interval_ms: u64,
    /// CAN seeks poll faster; the END limit bounds them physically
    pub can_poll_interval_ms: u64,
    /// Minimum burst length before the target sensor is re-evaluated
    pub min_dwell_ms: u64,
    pub attempt_timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_pause_ms: u64,
}

impl Default for PositioningConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            can_poll_interval_ms: 30,
            min_dwell_ms: 300,
            attempt_timeout_ms: 12_000,
            max_attempts: 3,
            retry_pause_ms: 300,
        }
    }
}

impl PositioningConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn can_poll_interval(&self) -> Duration {
        Duration::from_millis(self.can_poll_interval_ms)
    }

    pub fn min_dwell(&self) -> Duration {
        Duration::from_millis(self.min_dwell_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn retry_pause(&self) -> Duration {
        Duration::from_millis(self.retry_pause_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HomingConfig {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub min_dwell_ms: u64,
}

impl Default for HomingConfig {
    fn default() -> Self {
        Self { timeout_ms: 15_000, poll_interval_ms: 50, min_dwell_ms: 300 }
    }
}

impl HomingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn min_dwell(&self) -> Duration {
        Duration::from_millis(self.min_dwell_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PusherConfig {
    pub down_ms: u64,
    pub pause_ms: u64,
    /// Return stroke runs longer than the down stroke to guarantee retraction
    pub up_ms: u64,
    /// Slice length for stop-flag checks during the timed phases
    pub poll_interval_ms: u64,
}

impl Default for PusherConfig {
    fn default() -> Self {
        Self { down_ms: 1100, pause_ms: 300, up_ms: 1900, poll_interval_ms: 50 }
    }
}

impl PusherConfig {
    pub fn down(&self) -> Duration {
        Duration::from_millis(self.down_ms)
    }

    pub fn pause(&self) -> Duration {
        Duration::from_millis(self.pause_ms)
    }

    pub fn up(&self) -> Duration {
        Duration::from_millis(self.up_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub poll_interval_ms: u64,
    /// Rangefinder reading below this means an item sits against the scan window
    pub presence_threshold_cm: f64,
    /// Settle delay after detection, before the frame is captured
    pub settle_ms: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self { poll_interval_ms: 50, presence_threshold_cm: 3.0, settle_ms: 400 }
    }
}

impl GateConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub no_user_poll_ms: u64,
    pub camera_retry_interval_ms: u64,
    /// Consecutive ticks without a camera before a reconnect is attempted
    pub camera_max_failures: u32,
    /// Pause after a failed frame read before the camera is retried
    pub camera_fault_backoff_ms: u64,
    pub classification_backoff_ms: u64,
    pub error_backoff_ms: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            no_user_poll_ms: 1000,
            camera_retry_interval_ms: 1000,
            camera_max_failures: 5,
            camera_fault_backoff_ms: 1000,
            classification_backoff_ms: 200,
            error_backoff_ms: 500,
        }
    }
}

impl OrchestratorConfig {
    pub fn no_user_poll(&self) -> Duration {
        Duration::from_millis(self.no_user_poll_ms)
    }

    pub fn camera_retry_interval(&self) -> Duration {
        Duration::from_millis(self.camera_retry_interval_ms)
    }

    pub fn camera_fault_backoff(&self) -> Duration {
        Duration::from_millis(self.camera_fault_backoff_ms)
    }

    pub fn classification_backoff(&self) -> Duration {
        Duration::from_millis(self.classification_backoff_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_enabled")]
    pub enabled: bool,
    #[serde(default = "default_ledger_base_url")]
    pub base_url: String,
    #[serde(default = "default_ledger_timeout_ms")]
    pub timeout_ms: u64,
    /// Bounded queue between the sort worker and the HTTP worker
    #[serde(default = "default_ledger_queue_size")]
    pub queue_size: usize,
}

fn default_ledger_enabled() -> bool {
    true
}

fn default_ledger_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_ledger_timeout_ms() -> u64 {
    10_000
}

fn default_ledger_queue_size() -> usize {
    64
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            enabled: default_ledger_enabled(),
            base_url: default_ledger_base_url(),
            timeout_ms: default_ledger_timeout_ms(),
            queue_size: default_ledger_queue_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

fn default_metrics_interval() -> u64 {
    30
}

fn default_prometheus_port() -> u16 {
    9100
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: default_prometheus_port() }
    }
}

/// Simulated rig used when GPIO is unavailable
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Force simulation even when a GPIO backend is available
    pub enabled: bool,
    /// Sleep in real time alongside virtual time
    pub pace: bool,
    /// Interval between automatically presented items (0 disables)
    pub feed_interval_ms: u64,
    /// Labels cycled by the simulated classifier
    pub labels: Vec<String>,
    /// Conveyor travel time from HOME to each sensor
    pub plastic_at_ms: u64,
    pub can_at_ms: u64,
    pub end_at_ms: u64,
    /// Travel time during which a slot sensor stays triggered
    pub sensor_width_ms: u64,
    pub glass_width_ms: u64,
    pub item_distance_cm: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            pace: true,
            feed_interval_ms: 6000,
            labels: vec![
                "plastic_bottle".to_string(),
                "glass_bottle".to_string(),
                "can".to_string(),
            ],
            plastic_at_ms: 2500,
            can_at_ms: 5000,
            end_at_ms: 5400,
            sensor_width_ms: 150,
            glass_width_ms: 100,
            item_distance_cm: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub pins: PinConfig,
    #[serde(default)]
    pub sensors: SensorConfig,
    #[serde(default)]
    pub positioning: PositioningConfig,
    #[serde(default)]
    pub homing: HomingConfig,
    #[serde(default)]
    pub pusher: PusherConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub points: PointsTable,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    pins: PinConfig,
    sensors: SensorConfig,
    positioning: PositioningConfig,
    homing: HomingConfig,
    pusher: PusherConfig,
    gate: GateConfig,
    orchestrator: OrchestratorConfig,
    points: PointsTable,
    ledger: LedgerConfig,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    simulation: SimulationConfig,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            site_id: toml_config.site.id,
            pins: toml_config.pins,
            sensors: toml_config.sensors,
            positioning: toml_config.positioning,
            homing: toml_config.homing,
            pusher: toml_config.pusher,
            gate: toml_config.gate,
            orchestrator: toml_config.orchestrator,
            points: toml_config.points,
            ledger: toml_config.ledger,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            simulation: toml_config.simulation,
            config_file,
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        // Check for --config argument
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        // Check CONFIG_FILE environment variable
        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    /// Load configuration from an explicit path, falling back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn pins(&self) -> &PinConfig {
        &self.pins
    }

    pub fn sensors(&self) -> &SensorConfig {
        &self.sensors
    }

    pub fn positioning(&self) -> &PositioningConfig {
        &self.positioning
    }

    pub fn homing(&self) -> &HomingConfig {
        &self.homing
    }

    pub fn pusher(&self) -> &PusherConfig {
        &self.pusher
    }

    pub fn gate(&self) -> &GateConfig {
        &self.gate
    }

    pub fn orchestrator(&self) -> &OrchestratorConfig {
        &self.orchestrator
    }

    pub fn points(&self) -> &PointsTable {
        &self.points
    }

    pub fn ledger(&self) -> &LedgerConfig {
        &self.ledger
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn simulation(&self) -> &SimulationConfig {
        &self.simulation
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to shorten positioning timings
    pub fn with_positioning(mut self, positioning: PositioningConfig) -> Self {
        self.positioning = positioning;
        self
    }

    /// Builder method for tests to adjust the simulated rig
    pub fn with_simulation(mut self, simulation: SimulationConfig) -> Self {
        self.simulation = simulation;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Slot;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "sorter");
        assert_eq!(config.pins().limit_end, 7);
        assert_eq!(config.pins().conveyor_forward, 23);
        assert_eq!(config.positioning().max_attempts, 3);
        assert_eq!(config.positioning().attempt_timeout(), Duration::from_secs(12));
        assert_eq!(config.homing().timeout(), Duration::from_secs(15));
        assert_eq!(config.pusher().down(), Duration::from_millis(1100));
        assert_eq!(config.pusher().up(), Duration::from_millis(1900));
        assert_eq!(config.gate().presence_threshold_cm, 3.0);
        assert_eq!(config.points().points(Slot::Glass), 5);
        assert_eq!(config.prometheus_port(), 9100);
    }

    #[test]
    fn test_sensor_pins_match_wiring() {
        let pins = PinConfig::default();
        assert_eq!(pins.sensor_pin(Sensor::Glass), 17);
        assert_eq!(pins.sensor_pin(Sensor::Plastic), 13);
        assert_eq!(pins.sensor_pin(Sensor::Can), 19);
        assert_eq!(pins.sensor_pin(Sensor::HomeLimit), 25);
        assert_eq!(pins.sensor_pin(Sensor::EndLimit), 7);
        assert_eq!(pins.sensor_pin(Sensor::Door), 22);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[positioning]
max_attempts = 5

[points]
can = 4
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());

        assert_eq!(config.positioning().max_attempts, 5);
        assert_eq!(config.positioning().min_dwell_ms, 300);
        assert_eq!(config.points().can, 4);
        assert_eq!(config.points().glass, 5);
        assert_eq!(config.pins(), &PinConfig::default());
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> =
            vec!["sorter".to_string(), "--config".to_string(), "config/kiosk.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/kiosk.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> = vec!["sorter".to_string(), "--config=config/bench.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/bench.toml");
    }
}
