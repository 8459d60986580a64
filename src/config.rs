use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::{MapperError, MapperResult};
use crate::telemetry::TopicConfig;
use crate::turn_detector::TurnThresholds;

/// Anchor point of the simulated drive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub base_latitude: f64,
    pub base_longitude: f64,
    /// One simulated fix per this many milliseconds
    pub fix_interval_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            base_latitude: -31.4201,
            base_longitude: -64.1888,
            fix_interval_ms: 1_000,
        }
    }
}

/// Device configuration. Every field has a default matching the deployed
/// firmware, so a config file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub device_id: String,
    /// Transport client id; falls back to `device_id` when empty
    pub client_id: String,
    pub topics: TopicConfig,

    pub buffer_capacity: usize,
    pub turn: TurnThresholds,
    /// Satellites needed to ingest a fix, start mapping, or average a slot
    pub min_satellites: u32,

    pub point_interval_ms: u64,
    pub location_interval_ms: u64,
    pub diagnostic_interval_ms: u64,
    pub reconnect_interval_ms: u64,
    /// Consecutive failed reconnects before a persistent failure is reported
    pub max_reconnect_attempts: u32,
    pub status_interval_ms: u64,
    pub loop_yield_ms: u64,

    pub simulation: SimulationConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            device_id: "ESP-32-CAMION_01".to_string(),
            client_id: String::new(),
            topics: TopicConfig::default(),
            buffer_capacity: 30,
            turn: TurnThresholds::default(),
            min_satellites: 3,
            point_interval_ms: 10_000,
            location_interval_ms: 5_000,
            diagnostic_interval_ms: 15_000,
            reconnect_interval_ms: 5_000,
            max_reconnect_attempts: 5,
            status_interval_ms: 1_000,
            loop_yield_ms: 10,
            simulation: SimulationConfig::default(),
        }
    }
}

impl DeviceConfig {
    /// Read a JSON config file and validate it
    pub fn load<P: AsRef<Path>>(path: P) -> MapperResult<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config: DeviceConfig = serde_json::from_str(&text)
            .map_err(|e| MapperError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn client_id(&self) -> &str {
        if self.client_id.is_empty() {
            &self.device_id
        } else {
            &self.client_id
        }
    }

    pub fn validate(&self) -> MapperResult<()> {
        if self.device_id.trim().is_empty() {
            return Err(MapperError::Config("device_id must not be empty".into()));
        }
        if self.buffer_capacity < 2 {
            return Err(MapperError::Config(format!(
                "buffer_capacity must be at least 2 (got {})",
                self.buffer_capacity
            )));
        }
        if self.turn.window_len < 2 || self.turn.window_len > self.buffer_capacity {
            return Err(MapperError::Config(format!(
                "turn.window_len must be between 2 and buffer_capacity {} (got {})",
                self.buffer_capacity, self.turn.window_len
            )));
        }
        if self.turn.confirmation_windows == 0 {
            return Err(MapperError::Config("turn.confirmation_windows must be at least 1".into()));
        }
        if self.turn.min_distance_m < 0.0
            || self.turn.min_speed_kmh < 0.0
            || self.turn.heading_change_deg < 0.0
        {
            return Err(MapperError::Config("turn thresholds must not be negative".into()));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(MapperError::Config("max_reconnect_attempts must be at least 1".into()));
        }
        let intervals = [
            ("point_interval_ms", self.point_interval_ms),
            ("location_interval_ms", self.location_interval_ms),
            ("diagnostic_interval_ms", self.diagnostic_interval_ms),
            ("reconnect_interval_ms", self.reconnect_interval_ms),
            ("status_interval_ms", self.status_interval_ms),
            ("simulation.fix_interval_ms", self.simulation.fix_interval_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, ms)| *ms == 0) {
            return Err(MapperError::Config(format!("{} must be greater than zero", name)));
        }
        for topic in [&self.topics.location_prefix, &self.topics.routes, &self.topics.info_prefix] {
            if topic.is_empty() || topic.contains('+') || topic.contains('#') {
                return Err(MapperError::Config(format!("invalid topic '{}'", topic)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = DeviceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.client_id(), "ESP-32-CAMION_01");
        assert_eq!(config.turn.confirmation_windows, 8);
        assert_eq!(config.diagnostic_interval_ms, 15_000);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"device_id": "truck-7", "turn": {{"confirmation_windows": 4}}}}"#
        )
        .unwrap();

        let config = DeviceConfig::load(file.path()).unwrap();
        assert_eq!(config.device_id, "truck-7");
        assert_eq!(config.turn.confirmation_windows, 4);
        assert_eq!(config.turn.window_len, 15);
        assert_eq!(config.buffer_capacity, 30);
    }

    #[test]
    fn test_window_longer_than_buffer_rejected() {
        let mut config = DeviceConfig::default();
        config.turn.window_len = 31;
        assert!(matches!(config.validate(), Err(MapperError::Config(_))));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = DeviceConfig {
            reconnect_interval_ms: 0,
            ..DeviceConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("reconnect_interval_ms"));
    }

    #[test]
    fn test_wildcard_topic_rejected() {
        let mut config = DeviceConfig::default();
        config.topics.routes = "routes/#".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(DeviceConfig::load(file.path()), Err(MapperError::Config(_))));
    }
}
