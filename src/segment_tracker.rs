use serde::{Deserialize, Serialize};

use crate::error::{MapperError, MapperResult};
use crate::types::PositionSample;

/// Prefix of every human-readable segment id
pub const SEGMENT_ID_PREFIX: &str = "CALLE_";

/// Mapping state machine states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappingState {
    /// Not mapping; no segment open
    Idle,
    /// Mapping; exactly one segment open
    Active { segment_id: String },
}

/// Segment boundary produced by a tracker operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentTransition {
    Started { segment_id: String },
    Switched { closed: String, opened: String },
    Stopped { segment_id: String },
}

/// Owns segment identity and the Idle/Active lifecycle.
///
/// The segment counter is never reset, so a second mapping run continues the
/// numbering of the first.
#[derive(Debug)]
pub struct SegmentTracker {
    state: MappingState,
    segment_counter: u32,
    min_satellites: u32,
    point_interval_ms: u64,
    last_point_ms: u64,
}

impl SegmentTracker {
    pub fn new(min_satellites: u32, point_interval_ms: u64) -> Self {
        SegmentTracker {
            state: MappingState::Idle,
            segment_counter: 0,
            min_satellites,
            point_interval_ms,
            last_point_ms: 0,
        }
    }

    pub fn state(&self) -> &MappingState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, MappingState::Active { .. })
    }

    pub fn current_segment(&self) -> Option<&str> {
        match &self.state {
            MappingState::Active { segment_id } => Some(segment_id),
            MappingState::Idle => None,
        }
    }

    pub fn segments_opened(&self) -> u32 {
        self.segment_counter
    }

    fn next_segment_id(&mut self) -> String {
        self.segment_counter += 1;
        format!("{}{}", SEGMENT_ID_PREFIX, self.segment_counter)
    }

    /// Transition Idle → Active.
    ///
    /// The latest fix must carry at least `min_satellites`; no fix at all
    /// counts as zero satellites.
    pub fn start(
        &mut self,
        latest_fix: Option<&PositionSample>,
    ) -> MapperResult<SegmentTransition> {
        if self.is_active() {
            return Err(MapperError::AlreadyMapping);
        }

        let satellites = latest_fix.map(|f| f.satellites).unwrap_or(0);
        if satellites < self.min_satellites {
            log::warn!("Cannot start mapping: GPS without fix (satellites={})", satellites);
            return Err(MapperError::NoFix { satellites });
        }

        let segment_id = self.next_segment_id();
        self.state = MappingState::Active {
            segment_id: segment_id.clone(),
        };
        log::info!("Mapping ACTIVE - segment {}", segment_id);
        Ok(SegmentTransition::Started { segment_id })
    }

    /// Close the open segment and open the next one (Active only)
    pub fn on_turn_confirmed(&mut self) -> MapperResult<SegmentTransition> {
        let closed = match &self.state {
            MappingState::Active { segment_id } => segment_id.clone(),
            MappingState::Idle => return Err(MapperError::NotMapping),
        };
        let opened = self.next_segment_id();
        self.state = MappingState::Active {
            segment_id: opened.clone(),
        };
        log::info!("Turn confirmed, street changed: {} -> {}", closed, opened);
        Ok(SegmentTransition::Switched { closed, opened })
    }

    /// Transition Active → Idle
    pub fn stop(&mut self) -> MapperResult<SegmentTransition> {
        match std::mem::replace(&mut self.state, MappingState::Idle) {
            MappingState::Active { segment_id } => {
                log::info!("Mapping STOPPED - segment {} closed", segment_id);
                Ok(SegmentTransition::Stopped { segment_id })
            }
            MappingState::Idle => Err(MapperError::NotMapping),
        }
    }

    /// Whether an averaged point is due on this tick.
    ///
    /// Requires an active segment, no turn under suspicion, more than the
    /// point interval since the last point, and the vehicle moving at
    /// `min_speed_kmh` or faster.
    pub fn point_due(
        &self,
        now_ms: u64,
        speed_kmh: f64,
        turn_suspected: bool,
        min_speed_kmh: f64,
    ) -> bool {
        self.is_active()
            && !turn_suspected
            && now_ms.saturating_sub(self.last_point_ms) > self.point_interval_ms
            && speed_kmh >= min_speed_kmh
    }

    pub fn mark_point_sent(&mut self, now_ms: u64) {
        self.last_point_ms = now_ms;
    }
}
