//! End-to-end tests of the device loop.
//!
//! The device runs against a replayed drive, a hand-driven clock and an
//! in-memory transport, one `tick()` per simulated second.
//!
//! Run with: `cargo test --test mapping_integration`

use street_mapper_rs::clock::ManualClock;
use street_mapper_rs::events::DeviceEvent;
use street_mapper_rs::position_source::ReplaySource;
use street_mapper_rs::status::OperatorStatus;
use street_mapper_rs::transport::MemoryTransport;
use street_mapper_rs::{DeviceConfig, DeviceContext, PositionSample};

// ============================================================================
// Helper Functions
// ============================================================================

const DEVICE: &str = "ESP-32-CAMION_01";

/// A fix that turns 30° per second while moving north at 20 km/h
fn turning(i: u32) -> PositionSample {
    PositionSample::new(
        -31.42 + i as f64 * 1e-4,
        -64.18,
        (i * 30 % 360) as f64,
        20.0,
        8,
        i as u64,
    )
}

fn device_with(samples: Vec<PositionSample>) -> (DeviceContext, MemoryTransport, ManualClock) {
    let transport = MemoryTransport::new();
    let clock = ManualClock::new(0);
    let device = DeviceContext::new(
        DeviceConfig::default(),
        Box::new(ReplaySource::new(samples, 1_000)),
        Box::new(transport.clone()),
        Box::new(clock.clone()),
    )
    .unwrap();
    (device, transport, clock)
}

fn tipos(transport: &MemoryTransport) -> Vec<String> {
    transport
        .published_to("routes")
        .iter()
        .map(|m| m.json()["tipo"].as_str().unwrap_or_default().to_string())
        .collect()
}

// ============================================================================
// Integration Tests
// ============================================================================

#[test]
fn test_drive_with_one_turn() {
    let (mut device, transport, clock) = device_with((0..=37).map(turning).collect());
    let events = device.subscribe();

    device.tick().unwrap();
    assert_eq!(device.start_mapping().unwrap(), "CALLE_1");

    for second in 1..=37u64 {
        clock.set(second * 1_000);
        device.tick().unwrap();
    }
    assert!(device.source_finished());
    assert_eq!(tipos(&transport), vec!["inicio", "fin", "inicio"]);

    device.stop_mapping().unwrap();
    assert_eq!(tipos(&transport), vec!["inicio", "fin", "inicio", "fin"]);

    let ids: Vec<String> = transport
        .published_to("routes")
        .iter()
        .map(|m| m.json()["id"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(ids, vec!["CALLE_1", "CALLE_1", "CALLE_2", "CALLE_2"]);

    // Location every 5 s while mapping, diagnostics every 15 s
    assert_eq!(transport.published_to(&format!("location/{}", DEVICE)).len(), 7);
    assert_eq!(transport.published_to(&format!("info/{}", DEVICE)).len(), 2);

    let changes: Vec<DeviceEvent> = events
        .try_iter()
        .filter(|e| matches!(e, DeviceEvent::SegmentChanged { .. }))
        .collect();
    assert_eq!(
        changes,
        vec![DeviceEvent::SegmentChanged {
            closed: "CALLE_1".to_string(),
            opened: "CALLE_2".to_string()
        }]
    );
}

#[test]
fn test_reconnect_after_persistent_failure() {
    let fixes = (0..40).map(turning).collect();
    let (mut device, transport, clock) = device_with(fixes);
    transport.script_connects(&[false; 6]);
    let events = device.subscribe();

    for second in 0..30u64 {
        clock.set(second * 1_000);
        device.tick().unwrap();
    }
    assert!(!device.connection().is_connected());
    assert_eq!(device.connection().failed_attempts(), 5);
    assert_eq!(transport.connect_attempts(), 6);
    // The 15 s diagnostic had nowhere to go
    assert!(transport.published().is_empty());
    assert_eq!(device.connection().stats().skipped, 1);

    clock.set(30_000);
    device.tick().unwrap();
    assert!(device.connection().is_connected());
    let diagnostics = transport.published_to(&format!("info/{}", DEVICE));
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0].json()["estado_mqtt"], "Conectado");
    assert_eq!(diagnostics[0].json()["timestamp"], 30_000);

    let received: Vec<DeviceEvent> = events.try_iter().collect();
    let persistent = received
        .iter()
        .filter(|e| matches!(e, DeviceEvent::PersistentConnectionFailure { .. }))
        .count();
    assert_eq!(persistent, 1);
    assert!(received.contains(&DeviceEvent::ConnectionRestored { after_attempts: 5 }));
}

#[test]
fn test_status_file_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("status.json");
    let (device, _transport, clock) = device_with(vec![turning(0)]);
    let mut device = device.with_status_file(path.clone());

    device.tick().unwrap();
    device.start_mapping().unwrap();
    clock.set(1_000);
    device.tick().unwrap();

    let status: OperatorStatus =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert!(status.mapping_active);
    assert_eq!(status.current_segment.as_deref(), Some("CALLE_1"));
    assert_eq!(status.satellites, 8);
    assert_eq!(status.source, "replay");
}
