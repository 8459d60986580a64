//! The device context and its control loop tick.
//!
//! All mutable device state lives in one [`DeviceContext`]. The binary's loop
//! calls [`DeviceContext::tick`] on every iteration; commands from the
//! operator arrive through [`DeviceContext::handle_command`]. Nothing here
//! blocks: every periodic action is an elapsed-time check against the clock.

use crossbeam::channel::Receiver;
use std::path::PathBuf;
use std::str::FromStr;

use crate::averaging::average_point;
use crate::clock::{Clock, PeriodicTimer};
use crate::config::DeviceConfig;
use crate::connection::{ConnectionManager, PublishOutcome};
use crate::error::{MapperError, MapperResult};
use crate::events::{DeviceEvent, EventBus};
use crate::position_source::PositionSource;
use crate::sample_buffer::SampleBuffer;
use crate::segment_tracker::{SegmentTracker, SegmentTransition};
use crate::status::OperatorStatus;
use crate::telemetry::TelemetryPublisher;
use crate::transport::Transport;
use crate::turn_detector::{TurnDecision, TurnDetector};
use crate::types::PositionSample;

/// Operator commands (the physical buttons on the device, stdin lines here)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Status,
    Quit,
}

impl FromStr for Command {
    type Err = MapperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Command::Start),
            "stop" => Ok(Command::Stop),
            "status" => Ok(Command::Status),
            "quit" | "exit" => Ok(Command::Quit),
            other => Err(MapperError::UnknownCommand(other.to_string())),
        }
    }
}

/// What one ingested fix did
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Mapping idle; the fix only updated the latest position
    Idle,
    /// Buffered but the buffer has not wrapped yet
    Buffered,
    /// Window evaluated
    Evaluated { decision: TurnDecision, point_sent: bool },
}

pub struct DeviceContext {
    config: DeviceConfig,
    buffer: SampleBuffer,
    detector: TurnDetector,
    tracker: SegmentTracker,
    connection: ConnectionManager,
    publisher: TelemetryPublisher,
    source: Box<dyn PositionSource>,
    clock: Box<dyn Clock>,
    events: EventBus,
    status_rx: Receiver<DeviceEvent>,

    latest_fix: Option<PositionSample>,
    fix_ok: Option<bool>,
    samples_ingested: u64,
    samples_dropped: u64,

    location_timer: PeriodicTimer,
    diagnostic_timer: PeriodicTimer,
    status_timer: PeriodicTimer,
    status: OperatorStatus,
    status_path: Option<PathBuf>,
}

impl DeviceContext {
    pub fn new(
        config: DeviceConfig,
        source: Box<dyn PositionSource>,
        transport: Box<dyn Transport>,
        clock: Box<dyn Clock>,
    ) -> MapperResult<Self> {
        config.validate()?;

        let mut events = EventBus::new();
        let status_rx = events.subscribe();
        let connection = ConnectionManager::new(
            transport,
            config.client_id(),
            config.reconnect_interval_ms,
            config.max_reconnect_attempts,
        );
        let publisher = TelemetryPublisher::new(&config.device_id, config.topics.clone());
        let status = OperatorStatus::new(&config.device_id, source.name());

        Ok(DeviceContext {
            buffer: SampleBuffer::new(config.buffer_capacity),
            detector: TurnDetector::new(config.turn),
            tracker: SegmentTracker::new(config.min_satellites, config.point_interval_ms),
            connection,
            publisher,
            source,
            clock,
            events,
            status_rx,
            latest_fix: None,
            fix_ok: None,
            samples_ingested: 0,
            samples_dropped: 0,
            location_timer: PeriodicTimer::new(config.location_interval_ms),
            diagnostic_timer: PeriodicTimer::new(config.diagnostic_interval_ms),
            status_timer: PeriodicTimer::new(config.status_interval_ms),
            status,
            status_path: None,
            config,
        })
    }

    /// Write the operator status to `path` on every status refresh
    pub fn with_status_file(mut self, path: PathBuf) -> Self {
        self.status_path = Some(path);
        self
    }

    pub fn subscribe(&mut self) -> Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn tracker(&self) -> &SegmentTracker {
        &self.tracker
    }

    pub fn detector(&self) -> &TurnDetector {
        &self.detector
    }

    pub fn buffer(&self) -> &SampleBuffer {
        &self.buffer
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn latest_fix(&self) -> Option<&PositionSample> {
        self.latest_fix.as_ref()
    }

    pub fn source_finished(&self) -> bool {
        self.source.finished()
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    pub fn handle_command(&mut self, command: Command) -> MapperResult<()> {
        match command {
            Command::Start => self.start_mapping().map(|_| ()),
            Command::Stop => self.stop_mapping().map(|_| ()),
            Command::Status => {
                log::info!("Status: {}", self.refresh_status().summary());
                Ok(())
            }
            Command::Quit => {
                if self.tracker.is_active() {
                    self.stop_mapping()?;
                }
                Ok(())
            }
        }
    }

    /// Idle → Active. Refused without a fix on the latest sample.
    pub fn start_mapping(&mut self) -> MapperResult<String> {
        let transition = match self.tracker.start(self.latest_fix.as_ref()) {
            Ok(t) => t,
            Err(MapperError::NoFix { satellites }) => {
                self.events.emit(DeviceEvent::StartRejected { satellites });
                return Err(MapperError::NoFix { satellites });
            }
            Err(e) => return Err(e),
        };
        self.detector.reset();
        if self.latest_fix.is_some_and(|f| f.is_low_precision()) {
            log::warn!("Mapping started with low GPS precision");
        }

        let now = self.clock.now_ms();
        self.apply_transition(&transition, now);
        match transition {
            SegmentTransition::Started { segment_id } => Ok(segment_id),
            _ => Err(MapperError::AlreadyMapping),
        }
    }

    /// Active → Idle; any turn under suspicion is discarded
    pub fn stop_mapping(&mut self) -> MapperResult<String> {
        let transition = self.tracker.stop()?;
        self.detector.reset();

        let now = self.clock.now_ms();
        self.apply_transition(&transition, now);
        match transition {
            SegmentTransition::Stopped { segment_id } => Ok(segment_id),
            _ => Err(MapperError::NotMapping),
        }
    }

    /// Publish the boundary messages for a tracker transition
    fn apply_transition(&mut self, transition: &SegmentTransition, now_ms: u64) {
        match transition {
            SegmentTransition::Started { segment_id } => {
                let msg = self
                    .publisher
                    .start_message(segment_id, self.latest_fix.as_ref(), now_ms);
                self.publisher.publish(&msg, &mut self.connection, &mut self.events);
                self.events.emit(DeviceEvent::MappingStarted {
                    segment_id: segment_id.clone(),
                });
            }
            SegmentTransition::Switched { closed, opened } => {
                let end = self.publisher.end_message(closed, now_ms);
                self.publisher.publish(&end, &mut self.connection, &mut self.events);
                let start = self.publisher.start_message(opened, self.latest_fix.as_ref(), now_ms);
                self.publisher.publish(&start, &mut self.connection, &mut self.events);
                self.events.emit(DeviceEvent::SegmentChanged {
                    closed: closed.clone(),
                    opened: opened.clone(),
                });
            }
            SegmentTransition::Stopped { segment_id } => {
                let msg = self.publisher.end_message(segment_id, now_ms);
                self.publisher.publish(&msg, &mut self.connection, &mut self.events);
                self.events.emit(DeviceEvent::MappingStopped {
                    segment_id: segment_id.clone(),
                });
            }
        }
    }

    // ------------------------------------------------------------------
    // Segmentation pipeline
    // ------------------------------------------------------------------

    fn note_fix_quality(&mut self, sample: &PositionSample) {
        let ok = sample.has_fix(self.config.min_satellites);
        if self.fix_ok == Some(ok) {
            return;
        }
        self.fix_ok = Some(ok);
        let satellites = sample.satellites;
        if ok {
            log::info!("GPS fix acquired (satellites={})", satellites);
            self.events.emit(DeviceEvent::FixAcquired { satellites });
        } else {
            log::warn!("GPS fix lost (satellites={})", satellites);
            self.events.emit(DeviceEvent::FixLost { satellites });
        }
    }

    /// Feed one fix through buffer, turn detector and segment tracker.
    ///
    /// Fixes are only buffered while mapping and only when usable; a fix
    /// without enough satellites returns `NoFix` and leaves the buffer as is.
    pub fn ingest(&mut self, sample: PositionSample, now_ms: u64) -> MapperResult<IngestOutcome> {
        self.latest_fix = Some(sample);
        self.note_fix_quality(&sample);

        if !self.tracker.is_active() {
            return Ok(IngestOutcome::Idle);
        }
        if !sample.has_fix(self.config.min_satellites) {
            self.samples_dropped += 1;
            log::warn!("GPS without fix (satellites={})", sample.satellites);
            return Err(MapperError::NoFix {
                satellites: sample.satellites,
            });
        }

        self.buffer.push(sample);
        self.samples_ingested += 1;

        let decision = match self.detector.evaluate_buffer(&self.buffer) {
            Ok(decision) => decision,
            Err(MapperError::InsufficientWindowData { have, need }) => {
                log::debug!("Buffering fixes ({}/{})", have, need);
                return Ok(IngestOutcome::Buffered);
            }
            Err(e) => return Err(e),
        };

        let mut point_sent = false;
        match decision {
            TurnDecision::Rejected { .. } => {}
            TurnDecision::Confirmed => {
                let transition = self.tracker.on_turn_confirmed()?;
                self.apply_transition(&transition, now_ms);
            }
            _ => {
                point_sent = self.maybe_publish_point(sample.speed, now_ms);
            }
        }

        Ok(IngestOutcome::Evaluated { decision, point_sent })
    }

    fn maybe_publish_point(&mut self, speed_kmh: f64, now_ms: u64) -> bool {
        let due = self.tracker.point_due(
            now_ms,
            speed_kmh,
            self.detector.is_suspected(),
            self.config.turn.min_speed_kmh,
        );
        if !due {
            return false;
        }
        let Some(segment_id) = self.tracker.current_segment().map(str::to_string) else {
            return false;
        };

        let point = average_point(&self.buffer, self.config.min_satellites);
        if !point.has_fix(self.config.min_satellites) {
            log::warn!("Averaged point has no fix; skipping");
            return false;
        }
        let msg = self.publisher.point_message(&segment_id, &point, now_ms);
        self.publisher.publish(&msg, &mut self.connection, &mut self.events);
        self.tracker.mark_point_sent(now_ms);
        true
    }

    // ------------------------------------------------------------------
    // Periodic work
    // ------------------------------------------------------------------

    /// Reconnect, diagnostic, location and status checks
    pub fn run_periodic(&mut self, now_ms: u64) {
        self.connection.poll_reconnect(now_ms, &mut self.events);

        if self.diagnostic_timer.fire(now_ms) {
            self.publish_diagnostic(now_ms);
        }

        if self.tracker.is_active() && self.location_timer.fire(now_ms) {
            self.publish_location(now_ms);
        }

        if self.status_timer.fire(now_ms) {
            self.refresh_status();
            if let Some(path) = &self.status_path {
                if let Err(e) = self.status.save(path) {
                    log::warn!("Could not write status file {}: {}", path.display(), e);
                }
            }
        }
    }

    pub fn publish_diagnostic(&mut self, now_ms: u64) -> PublishOutcome {
        let latest = self.latest_fix.as_ref();
        let gps_status = self.source.status_label(latest, self.config.min_satellites);
        let msg = self.publisher.diagnostic_message(
            self.connection.link_up(),
            self.connection.is_connected(),
            gps_status,
            latest.map(|f| f.satellites).unwrap_or(0),
            now_ms,
        );
        self.publisher.publish(&msg, &mut self.connection, &mut self.events)
    }

    /// Location report; skipped when the latest fix is not usable
    pub fn publish_location(&mut self, now_ms: u64) -> PublishOutcome {
        let fix = match self.latest_fix {
            Some(fix) if fix.has_fix(self.config.min_satellites) => fix,
            other => {
                log::info!(
                    "Not publishing location: transport={}, sats={}",
                    self.connection.state().label(),
                    other.map(|f| f.satellites).unwrap_or(0)
                );
                return PublishOutcome::Skipped;
            }
        };
        let msg = self.publisher.location_message(&fix, now_ms);
        self.publisher.publish(&msg, &mut self.connection, &mut self.events)
    }

    /// One control loop iteration: poll the source, run the pipeline, run
    /// periodic checks. Only non-recoverable errors are returned.
    pub fn tick(&mut self) -> MapperResult<()> {
        let now = self.clock.now_ms();

        if let Some(sample) = self.source.poll(now) {
            match self.ingest(sample, now) {
                Ok(_) => {}
                Err(e) if e.is_recoverable() => log::debug!("Tick: {}", e),
                Err(e) => return Err(e),
            }
        }

        self.run_periodic(now);
        Ok(())
    }

    /// Rebuild the operator status from current state
    pub fn refresh_status(&mut self) -> &OperatorStatus {
        while let Ok(event) = self.status_rx.try_recv() {
            self.status.last_event = event.label();
        }

        let fix = self.latest_fix.unwrap_or_default();
        let s = &mut self.status;
        s.touch();
        s.uptime_ms = self.clock.now_ms();
        s.mapping_active = self.tracker.is_active();
        s.current_segment = self.tracker.current_segment().map(str::to_string);
        s.segments_opened = self.tracker.segments_opened();
        s.turn_state = self.detector.state().to_string();
        s.buffer_full = self.buffer.is_full();
        s.samples_ingested = self.samples_ingested;
        s.samples_dropped = self.samples_dropped;
        s.gps_status = self
            .source
            .status_label(self.latest_fix.as_ref(), self.config.min_satellites)
            .to_string();
        s.satellites = fix.satellites;
        s.latitude = fix.latitude;
        s.longitude = fix.longitude;
        s.speed_kmh = fix.speed;
        s.heading_deg = fix.heading;
        s.link_up = self.connection.link_up();
        s.transport_connected = self.connection.is_connected();
        s.failed_reconnects = self.connection.failed_attempts();
        s.persistent_failure = self.connection.is_persistently_failing();
        s.publish = self.connection.stats();
        &self.status
    }
}
