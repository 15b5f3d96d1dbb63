//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `monitor.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - BulkConfig: controller base url, poll cadence and request timeout.
//!     - WirelessConfig: BLE service/characteristic uuids and session deadlines.
//!     - DashboardConfig: where the json api listens.
//!     - SensorEntry: one row per physical sensor (the registry source).
//!
//! ==============================================================================

use anyhow::{anyhow, bail, Context};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default)]
    pub bulk: BulkConfig,
    #[serde(default)]
    pub wireless: WirelessConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default = "default_sensors")]
    pub sensors: Vec<SensorEntry>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BulkConfig {
    pub base_url: String,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
    /// how often reachability is re-checked in the background
    pub probe_interval_ms: u64,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            base_url: "http://192.168.4.1/api".to_string(),
            poll_interval_ms: 1000,
            request_timeout_ms: 2000,
            probe_interval_ms: 5000,
        }
    }
}

impl BulkConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WirelessConfig {
    pub enabled: bool,
    pub service_uuid: String,
    pub distance_uuid: String,
    pub zero_uuid: String,
    pub threshold_uuid: String,
    pub scan_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub session_timeout_ms: u64,
}

impl Default for WirelessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_uuid: "19b10000-e8f2-537e-4f6c-d104768a1214".to_string(),
            distance_uuid: "19b10001-e8f2-537e-4f6c-d104768a1214".to_string(),
            zero_uuid: "19b10002-e8f2-537e-4f6c-d104768a1214".to_string(),
            threshold_uuid: "19b10003-e8f2-537e-4f6c-d104768a1214".to_string(),
            scan_timeout_ms: 5000,
            connect_timeout_ms: 3000,
            session_timeout_ms: 15000,
        }
    }
}

/// parsed gatt layout of a sensor node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GattLayout {
    pub service: Uuid,
    pub distance: Uuid,
    pub zero: Uuid,
    pub threshold: Uuid,
}

impl WirelessConfig {
    pub fn gatt_layout(&self) -> anyhow::Result<GattLayout> {
        let parse = |field: &str, value: &str| {
            Uuid::parse_str(value).with_context(|| format!("wireless.{field} is not a uuid: {value}"))
        };
        Ok(GattLayout {
            service: parse("service_uuid", &self.service_uuid)?,
            distance: parse("distance_uuid", &self.distance_uuid)?,
            zero: parse("zero_uuid", &self.zero_uuid)?,
            threshold: parse("threshold_uuid", &self.threshold_uuid)?,
        })
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub bind: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:3000".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EventsConfig {
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: crate::events::DEFAULT_EVENT_CAPACITY }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct SensorEntry {
    pub name: String,
    pub wireless_device_id: String,
    pub address_index: u32,
}

/// the reference deployment: eight sensors per side, right then left
pub fn default_sensors() -> Vec<SensorEntry> {
    const LAYOUT: [(&str, u32); 16] = [
        ("R1", 23), ("R2", 25), ("R3", 27), ("R4", 29),
        ("R5", 31), ("R6", 33), ("R7", 35), ("R8", 37),
        ("L8", 39), ("L7", 41), ("L6", 43), ("L5", 45),
        ("L4", 47), ("L3", 49), ("L2", 51), ("L1", 53),
    ];
    LAYOUT
        .iter()
        .map(|(name, pin)| SensorEntry {
            name: name.to_string(),
            wireless_device_id: format!("NanoTFluna-{name}"),
            address_index: *pin,
        })
        .collect()
}

impl MonitorConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow!("Failed to read config file: {}", e))?;

        let config: MonitorConfig = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            std::path::PathBuf::from("config").join("monitor.toml"),
            std::path::PathBuf::from("..").join("config").join("monitor.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        tracing::info!(path = %path.display(), "loaded configuration");
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), "failed to load config: {:#}", e);
                    }
                }
            }
        }

        tracing::warn!("no config file found - using defaults");
        Self::default()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sensors.is_empty() {
            bail!("at least one [[sensors]] entry is required");
        }
        let mut seen = HashSet::new();
        for sensor in &self.sensors {
            if !seen.insert(sensor.name.as_str()) {
                bail!("duplicate sensor name {}", sensor.name);
            }
        }
        if self.bulk.poll_interval_ms == 0 || self.bulk.probe_interval_ms == 0 {
            bail!("bulk.poll_interval_ms and bulk.probe_interval_ms must be greater than zero");
        }
        self.wireless.gatt_layout()?;
        Ok(())
    }

    /// Log configuration summary
    pub fn print_summary(&self) {
        tracing::info!(
            base_url = %self.bulk.base_url,
            poll_interval_ms = self.bulk.poll_interval_ms,
            wireless = self.wireless.enabled,
            sensors = self.sensors.len(),
            dashboard = %self.dashboard.bind,
            log_level = %self.logging.level,
            "monitor configuration"
        );
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            bulk: BulkConfig::default(),
            wireless: WirelessConfig::default(),
            dashboard: DashboardConfig::default(),
            logging: LoggingConfig::default(),
            events: EventsConfig::default(),
            sensors: default_sensors(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MonitorConfig::default();
        config.validate().unwrap();
        assert_eq!(config.bulk.poll_interval_ms, 1000);
        assert_eq!(config.events.capacity, 50);
        assert_eq!(config.sensors.len(), 16);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: MonitorConfig = toml::from_str(
            r#"
[bulk]
base_url = "http://localhost:8080/api"

[[sensors]]
name = "F1"
wireless_device_id = "NanoTFluna-F1"
address_index = 2
"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.bulk.base_url, "http://localhost:8080/api");
        assert_eq!(config.bulk.poll_interval_ms, 1000);
        assert_eq!(config.sensors.len(), 1);
        assert!(config.wireless.enabled);
    }

    #[test]
    fn test_duplicate_sensor_rejected() {
        let mut config = MonitorConfig::default();
        config.sensors.push(config.sensors[0].clone());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_uuid_rejected() {
        let mut config = MonitorConfig::default();
        config.wireless.zero_uuid = "not-a-uuid".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shipped_config_parses() {
        let config: MonitorConfig = toml::from_str(include_str!("../config/monitor.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.bulk.probe_interval_ms, 5000);
        assert_eq!(config.sensors, default_sensors());
    }
}
