//! Street segment mapping for a vehicle tracking device.
//!
//! Position fixes are buffered and checked for turns; each confirmed turn
//! closes the current street segment and opens the next. Segment boundaries,
//! averaged points, location and device health go out as JSON messages over a
//! publish/subscribe transport with bounded reconnection.

pub mod averaging;
pub mod clock;
pub mod config;
pub mod connection;
pub mod device;
pub mod error;
pub mod events;
pub mod geo_math;
pub mod position_source;
pub mod sample_buffer;
pub mod segment_tracker;
pub mod status;
pub mod telemetry;
pub mod transport;
pub mod turn_detector;
pub mod types;

pub use config::DeviceConfig;
pub use device::{Command, DeviceContext, IngestOutcome};
pub use error::{MapperError, MapperResult};
pub use types::PositionSample;
