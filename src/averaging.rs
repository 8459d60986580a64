use crate::sample_buffer::SampleBuffer;
use crate::types::PositionSample;

/// Satellite floor for a slot to contribute to the average
pub const DEFAULT_MIN_SATELLITES: u32 = 3;

/// Smooth the whole buffer into one sample.
///
/// Slots below `min_satellites` are ignored. Satellites average by integer
/// division. The timestamp is always the newest slot's, so with no
/// qualifying slot the result is a zero position carrying that timestamp;
/// callers check [`PositionSample::has_fix`] before publishing it.
pub fn average_point(buffer: &SampleBuffer, min_satellites: u32) -> PositionSample {
    let mut average = PositionSample::default();
    let mut valid = 0u32;
    let mut satellites_sum = 0u64;

    for slot in buffer.all().iter().filter(|s| s.satellites >= min_satellites) {
        average.latitude += slot.latitude;
        average.longitude += slot.longitude;
        average.heading += slot.heading;
        average.speed += slot.speed;
        satellites_sum += u64::from(slot.satellites);
        valid += 1;
    }

    if valid > 0 {
        let n = valid as f64;
        average.latitude /= n;
        average.longitude /= n;
        average.heading /= n;
        average.speed /= n;
        average.satellites = (satellites_sum / u64::from(valid)) as u32;
    }

    average.timestamp = buffer.latest().timestamp;
    average
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_ignores_low_satellite_slots() {
        let mut buffer = SampleBuffer::new(30);
        buffer.push(PositionSample::new(99.0, 0.0, 0.0, 0.0, 2, 1));
        buffer.push(PositionSample::new(10.0, 0.0, 0.0, 0.0, 5, 2));
        buffer.push(PositionSample::new(20.0, 0.0, 0.0, 0.0, 5, 3));

        let avg = average_point(&buffer, DEFAULT_MIN_SATELLITES);
        assert_relative_eq!(avg.latitude, 15.0);
        assert_eq!(avg.satellites, 5);
        assert_eq!(avg.timestamp, 3);
    }

    #[test]
    fn test_means_all_fields() {
        let mut buffer = SampleBuffer::new(4);
        buffer.push(PositionSample::new(-31.0, -64.0, 80.0, 10.0, 4, 10));
        buffer.push(PositionSample::new(-32.0, -65.0, 100.0, 30.0, 7, 20));

        let avg = average_point(&buffer, DEFAULT_MIN_SATELLITES);
        assert_relative_eq!(avg.latitude, -31.5);
        assert_relative_eq!(avg.longitude, -64.5);
        assert_relative_eq!(avg.heading, 90.0);
        assert_relative_eq!(avg.speed, 20.0);
        // (4 + 7) / 2 truncates
        assert_eq!(avg.satellites, 5);
    }

    #[test]
    fn test_no_qualifying_slots_gives_zero_position() {
        let mut buffer = SampleBuffer::new(4);
        buffer.push(PositionSample::new(-31.0, -64.0, 80.0, 10.0, 1, 42));

        let avg = average_point(&buffer, DEFAULT_MIN_SATELLITES);
        assert_eq!(avg.latitude, 0.0);
        assert_eq!(avg.satellites, 0);
        assert_eq!(avg.timestamp, 42);
        assert!(!avg.has_fix(DEFAULT_MIN_SATELLITES));
    }

    #[test]
    fn test_huge_satellite_counts_do_not_overflow() {
        let mut buffer = SampleBuffer::new(4);
        for _ in 0..4 {
            buffer.push(PositionSample::new(1.0, 1.0, 0.0, 0.0, u32::MAX, 0));
        }

        let avg = average_point(&buffer, DEFAULT_MIN_SATELLITES);
        assert_eq!(avg.satellites, u32::MAX);
    }
}
