//! Debounced turn detection over buffered position windows.
//!
//! A window compares its oldest and newest fix. The heading change between
//! them must exceed the turn threshold for `confirmation_windows` consecutive
//! evaluations before a turn is accepted, so one noisy fix cannot split a
//! street.
//!
//! ```text
//! Normal --[qualifying window]--> Suspected{1}
//! Suspected{n} --[qualifying window]--> Suspected{n+1}
//! Suspected{K-1} --[qualifying window]--> Confirmed (event) --> Normal
//! Suspected{n} --[non-qualifying window]--> Normal
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{MapperError, MapperResult};
use crate::geo_math::{distance_meters, heading_delta};
use crate::sample_buffer::SampleBuffer;
use crate::types::PositionSample;

/// Thresholds for one turn evaluation
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnThresholds {
    /// Samples per evaluation window
    pub window_len: usize,
    /// Minimum distance between window endpoints (meters)
    pub min_distance_m: f64,
    /// Minimum speed of the newest fix (km/h)
    pub min_speed_kmh: f64,
    /// Heading change that makes a window qualify (degrees)
    pub heading_change_deg: f64,
    /// Consecutive qualifying windows needed to confirm (K)
    pub confirmation_windows: u32,
}

impl Default for TurnThresholds {
    fn default() -> Self {
        TurnThresholds {
            window_len: 15,
            min_distance_m: 3.0,
            min_speed_kmh: 2.5,
            heading_change_deg: 20.0,
            confirmation_windows: 8,
        }
    }
}

/// Resting state of the confirmation machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnState {
    Normal,
    Suspected { count: u32 },
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnState::Normal => "Normal",
            TurnState::Suspected { .. } => "Suspected",
        }
    }
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TurnState::Normal => write!(f, "Normal"),
            TurnState::Suspected { count } => write!(f, "Suspected({})", count),
        }
    }
}

/// Outcome of one evaluation tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TurnDecision {
    /// Not enough movement to judge; state untouched
    Rejected { distance_m: f64, speed_kmh: f64 },
    /// Non-qualifying window while already Normal
    Steady,
    /// Non-qualifying window discarded a suspicion
    Cleared { count: u32 },
    /// Qualifying window, not yet confirmed
    Suspected { count: u32 },
    /// Turn accepted; the detector is back to Normal
    Confirmed,
}

#[derive(Debug, Clone)]
pub struct TurnDetector {
    thresholds: TurnThresholds,
    state: TurnState,
}

impl TurnDetector {
    pub fn new(thresholds: TurnThresholds) -> Self {
        TurnDetector {
            thresholds,
            state: TurnState::Normal,
        }
    }

    pub fn thresholds(&self) -> &TurnThresholds {
        &self.thresholds
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn is_suspected(&self) -> bool {
        matches!(self.state, TurnState::Suspected { .. })
    }

    /// Discard any in-progress suspicion
    pub fn reset(&mut self) {
        self.state = TurnState::Normal;
    }

    /// Evaluate the newest window of a buffer.
    ///
    /// Until the buffer has wrapped once its windows can hold zero-valued
    /// slots, so evaluation is skipped rather than read as "no turn".
    pub fn evaluate_buffer(&mut self, buffer: &SampleBuffer) -> MapperResult<TurnDecision> {
        if !buffer.is_full() {
            return Err(MapperError::InsufficientWindowData {
                have: buffer.len(),
                need: buffer.capacity(),
            });
        }
        let window = buffer.window(self.thresholds.window_len);
        match (window.first(), window.last()) {
            (Some(first), Some(last)) if window.len() >= 2 => Ok(self.evaluate(first, last)),
            _ => Err(MapperError::InsufficientWindowData {
                have: window.len(),
                need: 2,
            }),
        }
    }

    /// Run one tick of the confirmation machine on a window's endpoints
    pub fn evaluate(&mut self, first: &PositionSample, last: &PositionSample) -> TurnDecision {
        let t = &self.thresholds;
        let distance = distance_meters(first, last);

        if distance < t.min_distance_m || last.speed < t.min_speed_kmh {
            log::debug!(
                "Turn check skipped (dist={:.1}m, speed={:.2}km/h, sats={})",
                distance,
                last.speed,
                last.satellites
            );
            return TurnDecision::Rejected {
                distance_m: distance,
                speed_kmh: last.speed,
            };
        }

        let change = heading_delta(first.heading, last.heading);
        let qualifying = change > t.heading_change_deg && last.speed > t.min_speed_kmh;
        log::debug!(
            "Turn check: heading change={:.1}°, speed={:.2}km/h, dist={:.1}m",
            change,
            last.speed,
            distance
        );

        if !qualifying {
            return match self.state {
                TurnState::Normal => TurnDecision::Steady,
                TurnState::Suspected { count } => {
                    log::debug!("Turn discarded after {} window(s)", count);
                    self.state = TurnState::Normal;
                    TurnDecision::Cleared { count }
                }
            };
        }

        let count = match self.state {
            TurnState::Normal => 1,
            TurnState::Suspected { count } => count + 1,
        };

        if count >= t.confirmation_windows {
            log::info!("Turn confirmed after {} windows", count);
            self.state = TurnState::Normal;
            TurnDecision::Confirmed
        } else {
            log::debug!("Turn suspected ({}/{})", count, t.confirmation_windows);
            self.state = TurnState::Suspected { count };
            TurnDecision::Suspected { count }
        }
    }
}

impl Default for TurnDetector {
    fn default() -> Self {
        Self::new(TurnThresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ~111 m apart, heading swung by 45 degrees
    fn qualifying_pair() -> (PositionSample, PositionSample) {
        (
            PositionSample::new(-31.4200, -64.1880, 0.0, 20.0, 8, 0),
            PositionSample::new(-31.4190, -64.1880, 45.0, 20.0, 8, 1),
        )
    }

    fn straight_pair() -> (PositionSample, PositionSample) {
        (
            PositionSample::new(-31.4200, -64.1880, 0.0, 20.0, 8, 0),
            PositionSample::new(-31.4190, -64.1880, 5.0, 20.0, 8, 1),
        )
    }

    #[test]
    fn test_confirms_on_eighth_window() {
        let mut detector = TurnDetector::default();
        let (first, last) = qualifying_pair();

        for n in 1..8 {
            assert_eq!(detector.evaluate(&first, &last), TurnDecision::Suspected { count: n });
        }
        assert_eq!(detector.evaluate(&first, &last), TurnDecision::Confirmed);
        assert_eq!(detector.state(), TurnState::Normal);

        // Fresh count after confirmation
        assert_eq!(detector.evaluate(&first, &last), TurnDecision::Suspected { count: 1 });
    }

    #[test]
    fn test_non_qualifying_window_resets_count() {
        let mut detector = TurnDetector::default();
        let (first, last) = qualifying_pair();
        let (s_first, s_last) = straight_pair();

        for _ in 0..5 {
            detector.evaluate(&first, &last);
        }
        assert_eq!(detector.evaluate(&s_first, &s_last), TurnDecision::Cleared { count: 5 });
        assert_eq!(detector.state(), TurnState::Normal);

        let mut confirmations = 0;
        for _ in 0..8 {
            if detector.evaluate(&first, &last) == TurnDecision::Confirmed {
                confirmations += 1;
            }
        }
        assert_eq!(confirmations, 1);
    }

    #[test]
    fn test_rejected_window_leaves_state() {
        let mut detector = TurnDetector::default();
        let (first, last) = qualifying_pair();
        detector.evaluate(&first, &last);
        detector.evaluate(&first, &last);

        // Too slow
        let slow = PositionSample { speed: 1.0, ..last };
        assert!(matches!(detector.evaluate(&first, &slow), TurnDecision::Rejected { .. }));

        // Too close
        let near = PositionSample { latitude: first.latitude, longitude: first.longitude, ..last };
        assert!(matches!(detector.evaluate(&first, &near), TurnDecision::Rejected { .. }));

        assert_eq!(detector.state(), TurnState::Suspected { count: 2 });
    }

    #[test]
    fn test_heading_change_across_north() {
        let mut detector = TurnDetector::default();
        let first = PositionSample::new(-31.4200, -64.1880, 350.0, 20.0, 8, 0);
        let last = PositionSample::new(-31.4190, -64.1880, 5.0, 20.0, 8, 1);
        // 15 degrees across north is not a turn
        assert_eq!(detector.evaluate(&first, &last), TurnDecision::Steady);
    }

    #[test]
    fn test_buffer_must_be_full() {
        let mut detector = TurnDetector::default();
        let mut buffer = SampleBuffer::new(30);
        for n in 0..29 {
            buffer.push(PositionSample::new(-31.42 + n as f64 * 1e-4, -64.18, 0.0, 20.0, 8, n));
        }
        let err = detector.evaluate_buffer(&buffer).unwrap_err();
        assert!(matches!(err, MapperError::InsufficientWindowData { have: 29, need: 30 }));

        buffer.push(PositionSample::new(-31.417, -64.18, 0.0, 20.0, 8, 29));
        assert_eq!(detector.evaluate_buffer(&buffer).unwrap(), TurnDecision::Steady);
    }

    #[test]
    fn test_reset_discards_suspicion() {
        let mut detector = TurnDetector::default();
        let (first, last) = qualifying_pair();
        detector.evaluate(&first, &last);
        assert!(detector.is_suspected());
        detector.reset();
        assert!(!detector.is_suspected());
    }
}
