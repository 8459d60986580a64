use serde::{Deserialize, Serialize};

use crate::clock::PeriodicTimer;
use crate::error::MapperError;
use crate::events::{DeviceEvent, EventBus};
use crate::transport::Transport;

/// Transport connectivity as tracked by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connected,
    Disconnected { failed_attempts: u32 },
}

impl ConnectionState {
    /// Status wording used on the diagnostic channel
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Connected => "Conectado",
            ConnectionState::Disconnected { .. } => "Desconectado",
        }
    }
}

/// Result of one reconnect check
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectOutcome {
    Connected { after_attempts: u32 },
    Failed { failed_attempts: u32, persistent: bool },
}

/// Result of one publish call
#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Sent,
    /// Transport disconnected; nothing was sent and nothing is queued
    Skipped,
    Failed(String),
}

/// Counters for the operator status view
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishStats {
    pub sent: u64,
    pub skipped: u64,
    pub failed: u64,
    pub connect_attempts: u64,
}

/// Tracks transport connectivity and runs bounded reconnection.
///
/// Reconnection is checked on a fixed interval, only while disconnected.
/// After `max_failed_attempts` consecutive failures the manager keeps
/// retrying but reports a persistent failure, once per outage.
pub struct ConnectionManager {
    transport: Box<dyn Transport>,
    client_id: String,
    state: ConnectionState,
    max_failed_attempts: u32,
    persistent_reported: bool,
    reconnect_timer: PeriodicTimer,
    stats: PublishStats,
}

impl ConnectionManager {
    pub fn new(
        transport: Box<dyn Transport>,
        client_id: &str,
        reconnect_interval_ms: u64,
        max_failed_attempts: u32,
    ) -> Self {
        ConnectionManager {
            transport,
            client_id: client_id.to_string(),
            state: ConnectionState::Disconnected { failed_attempts: 0 },
            max_failed_attempts,
            persistent_reported: false,
            reconnect_timer: PeriodicTimer::immediate(reconnect_interval_ms),
            stats: PublishStats::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn link_up(&self) -> bool {
        self.transport.link_up()
    }

    pub fn failed_attempts(&self) -> u32 {
        match self.state {
            ConnectionState::Connected => 0,
            ConnectionState::Disconnected { failed_attempts } => failed_attempts,
        }
    }

    pub fn is_persistently_failing(&self) -> bool {
        self.failed_attempts() >= self.max_failed_attempts
    }

    pub fn stats(&self) -> PublishStats {
        self.stats
    }

    /// Notice a session the transport dropped on its own
    fn sync(&mut self, events: &mut EventBus) {
        if self.state == ConnectionState::Connected && !self.transport.is_connected() {
            log::warn!("Transport connection lost");
            self.state = ConnectionState::Disconnected { failed_attempts: 0 };
            self.persistent_reported = false;
            events.emit(DeviceEvent::ConnectionLost);
        }
    }

    /// Run a reconnect attempt if one is due and the transport is down
    pub fn poll_reconnect(
        &mut self,
        now_ms: u64,
        events: &mut EventBus,
    ) -> Option<ReconnectOutcome> {
        self.sync(events);
        if !self.reconnect_timer.fire(now_ms) {
            return None;
        }
        let failed = match self.state {
            ConnectionState::Connected => return None,
            ConnectionState::Disconnected { failed_attempts } => failed_attempts,
        };

        self.stats.connect_attempts += 1;
        log::info!("Connecting transport as {}...", self.client_id);
        match self.transport.connect(&self.client_id) {
            Ok(()) => {
                log::info!("Transport connected");
                self.state = ConnectionState::Connected;
                self.persistent_reported = false;
                events.emit(DeviceEvent::ConnectionRestored {
                    after_attempts: failed,
                });
                Some(ReconnectOutcome::Connected {
                    after_attempts: failed,
                })
            }
            Err(e) => {
                let failed_attempts = (failed + 1).min(self.max_failed_attempts);
                self.state = ConnectionState::Disconnected { failed_attempts };
                log::warn!("Transport connect failed: {}", e);

                let persistent = failed_attempts >= self.max_failed_attempts;
                if persistent && !self.persistent_reported {
                    self.persistent_reported = true;
                    let err = MapperError::ReconnectFailure {
                        attempts: failed_attempts,
                    };
                    log::error!("{}; still retrying, check configuration", err);
                    events.emit(DeviceEvent::PersistentConnectionFailure {
                        attempts: failed_attempts,
                    });
                }
                Some(ReconnectOutcome::Failed {
                    failed_attempts,
                    persistent,
                })
            }
        }
    }

    /// Publish once. Never queues and never retries.
    pub fn publish(&mut self, topic: &str, payload: &str, events: &mut EventBus) -> PublishOutcome {
        self.sync(events);
        if !self.is_connected() {
            self.stats.skipped += 1;
            log::warn!("Not publishing to {}: transport disconnected", topic);
            events.emit(DeviceEvent::PublishSkipped {
                topic: topic.to_string(),
            });
            return PublishOutcome::Skipped;
        }

        match self.transport.publish(topic, payload) {
            Ok(()) => {
                self.stats.sent += 1;
                log::debug!("Published to {} -> {}", topic, payload);
                PublishOutcome::Sent
            }
            Err(e) => {
                self.stats.failed += 1;
                log::warn!("Publish to {} failed: {}", topic, e);
                events.emit(DeviceEvent::PublishFailed {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                });
                self.sync(events);
                PublishOutcome::Failed(e.to_string())
            }
        }
    }
}
