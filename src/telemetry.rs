//! Outbound message schemas and the publish policy.
//!
//! Field names are part of the wire contract with existing consumers and must
//! not change. Every message is a flat JSON object.

use serde::{Deserialize, Serialize};

use crate::connection::{ConnectionManager, PublishOutcome};
use crate::error::MapperResult;
use crate::events::EventBus;
use crate::types::PositionSample;

/// Segment boundary / point kind, serialized as the `tipo` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentEventKind {
    #[serde(rename = "inicio")]
    Start,
    #[serde(rename = "punto")]
    Point,
    #[serde(rename = "fin")]
    End,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentStart {
    pub id: String,
    pub tipo: SegmentEventKind,
    pub lat: f64,
    pub lon: f64,
    pub satelites: u32,
    pub tiempo: u64,
    pub device_id: String,
    pub precision_baja: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentPoint {
    pub id: String,
    pub tipo: SegmentEventKind,
    pub lat: f64,
    pub lon: f64,
    pub velocidad: f64,
    pub satelites: u32,
    pub tiempo: u64,
    pub rumbo: f64,
    pub device_id: String,
    pub precision_baja: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentEnd {
    pub id: String,
    pub tipo: SegmentEventKind,
    pub device_id: String,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationReport {
    pub device_id: String,
    pub latitud: f64,
    pub longitud: f64,
    pub satelites: u32,
    pub velocidad_kmh: f64,
    pub precision_baja: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub device_id: String,
    pub estado_wifi: String,
    pub estado_mqtt: String,
    pub estado_gps: String,
    pub satelites_gps: u32,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryMessage {
    Start(SegmentStart),
    Point(SegmentPoint),
    End(SegmentEnd),
    Location(LocationReport),
    Diagnostic(DiagnosticReport),
}

/// Topic layout for one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
    /// Per-device location topic prefix (`<prefix>/<device_id>`)
    pub location_prefix: String,
    /// Shared topic for segment start/point/end
    pub routes: String,
    /// Per-device diagnostic topic prefix (`<prefix>/<device_id>`)
    pub info_prefix: String,
}

impl Default for TopicConfig {
    fn default() -> Self {
        TopicConfig {
            location_prefix: "location".to_string(),
            routes: "routes".to_string(),
            info_prefix: "info".to_string(),
        }
    }
}

impl TopicConfig {
    pub fn location(&self, device_id: &str) -> String {
        format!("{}/{}", self.location_prefix, device_id)
    }

    pub fn info(&self, device_id: &str) -> String {
        format!("{}/{}", self.info_prefix, device_id)
    }
}

impl TelemetryMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryMessage::Start(_) => "start",
            TelemetryMessage::Point(_) => "point",
            TelemetryMessage::End(_) => "end",
            TelemetryMessage::Location(_) => "location",
            TelemetryMessage::Diagnostic(_) => "diagnostic",
        }
    }

    pub fn topic(&self, topics: &TopicConfig) -> String {
        match self {
            TelemetryMessage::Start(_) | TelemetryMessage::Point(_) | TelemetryMessage::End(_) => {
                topics.routes.clone()
            }
            TelemetryMessage::Location(m) => topics.location(&m.device_id),
            TelemetryMessage::Diagnostic(m) => topics.info(&m.device_id),
        }
    }

    pub fn to_json(&self) -> MapperResult<String> {
        let json = match self {
            TelemetryMessage::Start(m) => serde_json::to_string(m)?,
            TelemetryMessage::Point(m) => serde_json::to_string(m)?,
            TelemetryMessage::End(m) => serde_json::to_string(m)?,
            TelemetryMessage::Location(m) => serde_json::to_string(m)?,
            TelemetryMessage::Diagnostic(m) => serde_json::to_string(m)?,
        };
        Ok(json)
    }
}

/// Builds messages for one device and sends them through the connection
/// manager. Messages are never retained.
#[derive(Debug, Clone)]
pub struct TelemetryPublisher {
    device_id: String,
    topics: TopicConfig,
}

impl TelemetryPublisher {
    pub fn new(device_id: &str, topics: TopicConfig) -> Self {
        TelemetryPublisher {
            device_id: device_id.to_string(),
            topics,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn topics(&self) -> &TopicConfig {
        &self.topics
    }

    /// Segment opened; position fields come from the latest fix, zeroed when
    /// there is none
    pub fn start_message(
        &self,
        segment_id: &str,
        fix: Option<&PositionSample>,
        now_ms: u64,
    ) -> TelemetryMessage {
        let fix = fix.copied().unwrap_or_default();
        TelemetryMessage::Start(SegmentStart {
            id: segment_id.to_string(),
            tipo: SegmentEventKind::Start,
            lat: fix.latitude,
            lon: fix.longitude,
            satelites: fix.satellites,
            tiempo: fix.timestamp,
            device_id: self.device_id.clone(),
            precision_baja: fix.is_low_precision(),
            timestamp: now_ms,
        })
    }

    pub fn point_message(
        &self,
        segment_id: &str,
        point: &PositionSample,
        now_ms: u64,
    ) -> TelemetryMessage {
        TelemetryMessage::Point(SegmentPoint {
            id: segment_id.to_string(),
            tipo: SegmentEventKind::Point,
            lat: point.latitude,
            lon: point.longitude,
            velocidad: point.speed,
            satelites: point.satellites,
            tiempo: point.timestamp,
            rumbo: point.heading,
            device_id: self.device_id.clone(),
            precision_baja: point.is_low_precision(),
            timestamp: now_ms,
        })
    }

    pub fn end_message(&self, segment_id: &str, now_ms: u64) -> TelemetryMessage {
        TelemetryMessage::End(SegmentEnd {
            id: segment_id.to_string(),
            tipo: SegmentEventKind::End,
            device_id: self.device_id.clone(),
            timestamp: now_ms,
        })
    }

    pub fn location_message(&self, fix: &PositionSample, now_ms: u64) -> TelemetryMessage {
        TelemetryMessage::Location(LocationReport {
            device_id: self.device_id.clone(),
            latitud: fix.latitude,
            longitud: fix.longitude,
            satelites: fix.satellites,
            velocidad_kmh: fix.speed,
            precision_baja: fix.is_low_precision(),
            timestamp: now_ms,
        })
    }

    pub fn diagnostic_message(
        &self,
        link_up: bool,
        transport_connected: bool,
        gps_status: &str,
        satellites: u32,
        now_ms: u64,
    ) -> TelemetryMessage {
        let label = |up: bool| if up { "Conectado" } else { "Desconectado" };
        TelemetryMessage::Diagnostic(DiagnosticReport {
            device_id: self.device_id.clone(),
            estado_wifi: label(link_up).to_string(),
            estado_mqtt: label(transport_connected).to_string(),
            estado_gps: gps_status.to_string(),
            satelites_gps: satellites,
            timestamp: now_ms,
        })
    }

    /// Encode and publish synchronously; failures are reported, not retried
    pub fn publish(
        &self,
        message: &TelemetryMessage,
        connection: &mut ConnectionManager,
        events: &mut EventBus,
    ) -> PublishOutcome {
        let topic = message.topic(&self.topics);
        match message.to_json() {
            Ok(payload) => {
                let outcome = connection.publish(&topic, &payload, events);
                if outcome == PublishOutcome::Sent {
                    log::info!("Published {} to {}", message.kind(), topic);
                }
                outcome
            }
            Err(e) => {
                log::error!("Could not encode {} message: {}", message.kind(), e);
                PublishOutcome::Failed(e.to_string())
            }
        }
    }
}
