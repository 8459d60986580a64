//! State-change notifications for the operator display and other listeners.
//!
//! Listeners subscribe and drain their receiver on their own schedule; the
//! control loop never waits on them.

use crossbeam::channel::{unbounded, Receiver, Sender};

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    MappingStarted { segment_id: String },
    SegmentChanged { closed: String, opened: String },
    MappingStopped { segment_id: String },
    /// Start refused for lack of a fix
    StartRejected { satellites: u32 },
    FixLost { satellites: u32 },
    FixAcquired { satellites: u32 },
    ConnectionLost,
    ConnectionRestored { after_attempts: u32 },
    /// Reconnection has failed the configured number of times in a row
    PersistentConnectionFailure { attempts: u32 },
    PublishSkipped { topic: String },
    PublishFailed { topic: String, reason: String },
}

impl DeviceEvent {
    /// Short text for a status line
    pub fn label(&self) -> String {
        match self {
            DeviceEvent::MappingStarted { segment_id } => format!("Mapping {}", segment_id),
            DeviceEvent::SegmentChanged { opened, .. } => format!("Street {}", opened),
            DeviceEvent::MappingStopped { .. } => "Mapping stopped".to_string(),
            DeviceEvent::StartRejected { .. } => "No GPS fix".to_string(),
            DeviceEvent::FixLost { .. } => "GPS lost".to_string(),
            DeviceEvent::FixAcquired { .. } => "GPS OK".to_string(),
            DeviceEvent::ConnectionLost => "Reconnecting...".to_string(),
            DeviceEvent::ConnectionRestored { .. } => "Connected".to_string(),
            DeviceEvent::PersistentConnectionFailure { .. } => {
                "Connection error, check config".to_string()
            }
            DeviceEvent::PublishSkipped { .. } => "Offline".to_string(),
            DeviceEvent::PublishFailed { .. } => "Publish failed".to_string(),
        }
    }
}

/// Fan-out of device events to any number of subscribers
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Vec<Sender<DeviceEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            subscribers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> Receiver<DeviceEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Deliver to every live subscriber; dropped receivers are pruned
    pub fn emit(&mut self, event: DeviceEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
