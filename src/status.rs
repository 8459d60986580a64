use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::connection::PublishStats;

/// Operator dashboard snapshot, refreshed by the control loop and written
/// out as pretty JSON
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct OperatorStatus {
    /// Wall-clock time of the snapshot (RFC 3339)
    pub updated_at: String,
    pub uptime_ms: u64,
    pub device_id: String,
    pub source: String,
    // Mapping
    pub mapping_active: bool,
    pub current_segment: Option<String>,
    pub segments_opened: u32,
    pub turn_state: String,
    pub buffer_full: bool,
    pub samples_ingested: u64,
    pub samples_dropped: u64,
    // GPS
    pub gps_status: String,
    pub satellites: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f64,
    pub heading_deg: f64,
    // Connectivity
    pub link_up: bool,
    pub transport_connected: bool,
    pub failed_reconnects: u32,
    pub persistent_failure: bool,
    pub publish: PublishStats,
    /// Most recent operator-facing message
    pub last_event: String,
}

impl OperatorStatus {
    pub fn new(device_id: &str, source: &str) -> Self {
        Self {
            updated_at: Utc::now().to_rfc3339(),
            uptime_ms: 0,
            device_id: device_id.to_string(),
            source: source.to_string(),
            mapping_active: false,
            current_segment: None,
            segments_opened: 0,
            turn_state: "Normal".to_string(),
            buffer_full: false,
            samples_ingested: 0,
            samples_dropped: 0,
            gps_status: String::new(),
            satellites: 0,
            latitude: 0.0,
            longitude: 0.0,
            speed_kmh: 0.0,
            heading_deg: 0.0,
            link_up: false,
            transport_connected: false,
            failed_reconnects: 0,
            persistent_failure: false,
            publish: PublishStats::default(),
            last_event: "Starting".to_string(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now().to_rfc3339();
    }

    /// One-line summary for the log
    pub fn summary(&self) -> String {
        format!(
            "{} | {} | sats={} | {} | sent={} skipped={} failed={}",
            self.current_segment.as_deref().unwrap_or("idle"),
            self.gps_status,
            self.satellites,
            if self.transport_connected { "online" } else { "offline" },
            self.publish.sent,
            self.publish.skipped,
            self.publish.failed
        )
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}
