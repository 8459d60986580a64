//! Position fix providers.
//!
//! The device polls its source once per loop tick. Sources never block the
//! loop: the simulated and replay sources compute fixes on demand, and the
//! NMEA source parses on a background thread and hands fixes over a channel.

use crossbeam::channel::{unbounded, Receiver, TryRecvError};
use flate2::read::GzDecoder;
use nmea0183::{ParseResult, Parser};
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::config::SimulationConfig;
use crate::error::{MapperError, MapperResult};
use crate::types::PositionSample;

pub const GPS_STATUS_OK: &str = "Señal OK";
pub const GPS_STATUS_NO_SIGNAL: &str = "Sin señal";
pub const GPS_STATUS_SIMULATED: &str = "Simulado";

const KNOTS_TO_KMH: f64 = 1.852;

pub trait PositionSource {
    /// Next fix, if one is available at `now_ms`
    fn poll(&mut self, now_ms: u64) -> Option<PositionSample>;

    /// Receiver status wording for the diagnostic channel
    fn status_label(&self, latest: Option<&PositionSample>, min_satellites: u32) -> &'static str {
        match latest {
            Some(fix) if fix.satellites >= min_satellites => GPS_STATUS_OK,
            _ => GPS_STATUS_NO_SIGNAL,
        }
    }

    /// True once the source will never produce another fix
    fn finished(&self) -> bool {
        false
    }

    fn name(&self) -> &str;
}

// ============================================================================
// Simulated
// ============================================================================

/// Spiral drive around a base point, for bench testing without a receiver.
///
/// Heading sweeps 2°/s, speed oscillates between 5 and 25 km/h and the
/// satellite count wobbles between 6 and 10.
pub struct SimulatedSource {
    config: SimulationConfig,
    started_ms: Option<u64>,
    last_fix_ms: Option<u64>,
}

impl SimulatedSource {
    pub fn new(config: SimulationConfig) -> Self {
        SimulatedSource {
            config,
            started_ms: None,
            last_fix_ms: None,
        }
    }

    /// Fix at `elapsed_ms` into the drive; `now_ms` is stamped on it
    pub fn sample_at(&self, elapsed_ms: u64, now_ms: u64) -> PositionSample {
        let t = elapsed_ms as f64;
        let heading = ((t / 1000.0) * 2.0) % 360.0;
        let speed = 15.0 + 10.0 * (t / 5000.0).sin();
        let radius = 0.001 + t / 100_000.0;
        let satellites = (8 + (3.0 * (t / 3000.0).sin()) as i64).max(0) as u32;

        PositionSample {
            latitude: self.config.base_latitude + radius * heading.to_radians().cos(),
            longitude: self.config.base_longitude + radius * heading.to_radians().sin(),
            heading,
            speed,
            satellites,
            timestamp: now_ms,
        }
    }
}

impl PositionSource for SimulatedSource {
    fn poll(&mut self, now_ms: u64) -> Option<PositionSample> {
        let started = *self.started_ms.get_or_insert(now_ms);
        if let Some(last) = self.last_fix_ms {
            if now_ms.saturating_sub(last) < self.config.fix_interval_ms {
                return None;
            }
        }
        self.last_fix_ms = Some(now_ms);

        let fix = self.sample_at(now_ms - started, now_ms);
        log::debug!(
            "Simulated GPS: lat={:.6}, lon={:.6}, heading={:.1}, speed={:.1} km/h, sats={}",
            fix.latitude,
            fix.longitude,
            fix.heading,
            fix.speed,
            fix.satellites
        );
        Some(fix)
    }

    fn status_label(&self, _latest: Option<&PositionSample>, _min_satellites: u32) -> &'static str {
        GPS_STATUS_SIMULATED
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

// ============================================================================
// Replay
// ============================================================================

/// Recorded fixes played back at a fixed interval
pub struct ReplaySource {
    samples: Vec<PositionSample>,
    next: usize,
    interval_ms: u64,
    last_fix_ms: Option<u64>,
}

impl ReplaySource {
    pub fn new(samples: Vec<PositionSample>, interval_ms: u64) -> Self {
        ReplaySource {
            samples,
            next: 0,
            interval_ms,
            last_fix_ms: None,
        }
    }

    /// Load a recording: a JSON array or one JSON sample per line, gzipped
    /// when the file name ends in `.gz`
    pub fn load<P: AsRef<Path>>(path: P, interval_ms: u64) -> MapperResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut text = String::new();
        if path.extension().is_some_and(|ext| ext == "gz") {
            GzDecoder::new(file).read_to_string(&mut text)?;
        } else {
            BufReader::new(file).read_to_string(&mut text)?;
        }

        let samples = parse_recording(&text)?;
        log::info!("Loaded {} recorded fixes from {}", samples.len(), path.display());
        Ok(Self::new(samples, interval_ms))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.samples.len() - self.next
    }
}

fn parse_recording(text: &str) -> MapperResult<Vec<PositionSample>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    trimmed
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .map_err(|e| MapperError::Source(format!("recording line {}: {}", n + 1, e)))
        })
        .collect()
}

impl PositionSource for ReplaySource {
    fn poll(&mut self, now_ms: u64) -> Option<PositionSample> {
        if let Some(last) = self.last_fix_ms {
            if now_ms.saturating_sub(last) < self.interval_ms {
                return None;
            }
        }
        let sample = *self.samples.get(self.next)?;
        self.next += 1;
        self.last_fix_ms = Some(now_ms);
        Some(sample)
    }

    fn finished(&self) -> bool {
        self.next >= self.samples.len()
    }

    fn name(&self) -> &str {
        "replay"
    }
}

// ============================================================================
// NMEA
// ============================================================================

/// Merges GGA and RMC sentences into fixes.
///
/// GGA carries the satellite count; each RMC completes a fix with position,
/// speed and course. A void RMC (status `V`) yields a zero-satellite fix so
/// the device sees the signal loss. Malformed sentences are skipped.
pub struct NmeaParser {
    parser: Parser,
    satellites: u32,
}

impl NmeaParser {
    pub fn new() -> Self {
        NmeaParser {
            parser: Parser::new(),
            satellites: 0,
        }
    }

    /// Feed one raw line (terminator optional). Returns the fix an RMC
    /// sentence completed, if any.
    pub fn parse_line(&mut self, line: &[u8]) -> Option<PositionSample> {
        let end = line
            .iter()
            .rposition(|b| *b != b'\r' && *b != b'\n')
            .map_or(0, |i| i + 1);

        let mut fix = None;
        for &byte in line[..end].iter().chain(b"\r\n") {
            match self.parser.parse_from_byte(byte) {
                Some(Ok(ParseResult::GGA(Some(gga)))) => {
                    self.satellites = u32::from(gga.sat_in_use);
                }
                Some(Ok(ParseResult::GGA(None))) => self.satellites = 0,
                Some(Ok(ParseResult::RMC(Some(rmc)))) => fix = Some(self.fix_from_rmc(&rmc)),
                Some(Ok(ParseResult::RMC(None))) => fix = Some(PositionSample::default()),
                Some(Ok(_)) | None => {}
                Some(Err(e)) => log::debug!("Skipping NMEA sentence: {}", e),
            }
        }
        fix
    }

    fn fix_from_rmc(&self, rmc: &nmea0183::RMC) -> PositionSample {
        let time = &rmc.datetime.time;
        PositionSample {
            latitude: rmc.latitude.as_f64(),
            longitude: rmc.longitude.as_f64(),
            heading: rmc.course.as_ref().map_or(0.0, |c| f64::from(c.degrees)),
            speed: f64::from(rmc.speed.as_knots()) * KNOTS_TO_KMH,
            satellites: self.satellites,
            timestamp: time_value(time.hours, time.minutes, time.seconds),
        }
    }
}

impl Default for NmeaParser {
    fn default() -> Self {
        Self::new()
    }
}

/// UTC time as the receiver's `hhmmsscc` time value
fn time_value(hours: u8, minutes: u8, seconds: f32) -> u64 {
    let centis = (f64::from(seconds) * 100.0).round() as u64;
    (u64::from(hours) * 100 + u64::from(minutes)) * 10_000 + centis
}

/// NMEA receiver read on a background thread
pub struct NmeaSource {
    rx: Receiver<PositionSample>,
    disconnected: bool,
}

impl NmeaSource {
    /// Read NMEA from any byte stream. With `pace` set, the reader thread
    /// waits that long after each fix (for recorded files).
    ///
    /// Lines are handled as raw bytes, so line noise only costs the line it
    /// is on. The thread ends at end of input or on an I/O error.
    pub fn from_reader<R: BufRead + Send + 'static>(mut reader: R, pace: Option<Duration>) -> Self {
        let (tx, rx) = unbounded();

        thread::spawn(move || {
            let mut parser = NmeaParser::new();
            let mut line = Vec::with_capacity(128);
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => {
                        log::warn!("NMEA read error: {}", e);
                        break;
                    }
                }
                if let Some(fix) = parser.parse_line(&line) {
                    if tx.send(fix).is_err() {
                        break;
                    }
                    if let Some(pace) = pace {
                        thread::sleep(pace);
                    }
                }
            }
            log::info!("NMEA input ended");
        });

        NmeaSource {
            rx,
            disconnected: false,
        }
    }

    /// Open a serial device or a recorded NMEA file. Regular files are paced
    /// at `fix_interval_ms` per fix; devices are read as fast as they talk.
    pub fn open<P: AsRef<Path>>(path: P, fix_interval_ms: u64) -> MapperResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| MapperError::Source(format!("cannot open {}: {}", path.display(), e)))?;
        let pace = if file.metadata()?.is_file() {
            Some(Duration::from_millis(fix_interval_ms))
        } else {
            None
        };
        log::info!("Reading NMEA from {}", path.display());
        Ok(Self::from_reader(BufReader::new(file), pace))
    }
}

impl PositionSource for NmeaSource {
    fn poll(&mut self, _now_ms: u64) -> Option<PositionSample> {
        match self.rx.try_recv() {
            Ok(fix) => Some(fix),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.disconnected = true;
                None
            }
        }
    }

    fn finished(&self) -> bool {
        self.disconnected
    }

    fn name(&self) -> &str {
        "nmea"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::{Cursor, Write};

    const GGA: &[u8] =
        b"$GPGGA,123519.00,3123.2060,S,06411.3280,W,1,08,0.9,545.4,M,46.9,M,,*68\r\n";
    const RMC: &[u8] =
        b"$GPRMC,123519.50,A,3123.2060,S,06411.3280,W,10.0,84.4,230394,003.1,W,A*28\r\n";

    fn wait_for_fix(source: &mut NmeaSource) -> Option<PositionSample> {
        for _ in 0..400 {
            if let Some(fix) = source.poll(0) {
                return Some(fix);
            }
            thread::sleep(Duration::from_millis(5));
        }
        None
    }

    #[test]
    fn test_gga_then_rmc_makes_fix() {
        let mut parser = NmeaParser::new();
        assert!(parser.parse_line(GGA).is_none());
        let fix = parser.parse_line(RMC).unwrap();

        assert_eq!(fix.satellites, 8);
        assert_relative_eq!(fix.latitude, -31.38677, epsilon = 1e-5);
        assert_relative_eq!(fix.longitude, -64.18880, epsilon = 1e-5);
        assert_relative_eq!(fix.speed, 18.52, epsilon = 1e-4);
        assert_relative_eq!(fix.heading, 84.4, epsilon = 1e-4);
        assert_eq!(fix.timestamp, 12351950);
    }

    #[test]
    fn test_line_terminator_optional() {
        let mut parser = NmeaParser::new();
        parser.parse_line(&GGA[..GGA.len() - 2]);
        assert_eq!(parser.parse_line(&RMC[..RMC.len() - 1]).unwrap().satellites, 8);
    }

    #[test]
    fn test_void_rmc_has_no_satellites() {
        let mut parser = NmeaParser::new();
        parser.parse_line(GGA);
        let fix = parser
            .parse_line(b"$GPRMC,123520.00,V,,,,,,,230394,,,N*75\r\n")
            .unwrap();
        assert_eq!(fix.satellites, 0);
        assert!(!fix.has_fix(3));
    }

    #[test]
    fn test_bad_checksum_ignored() {
        let mut parser = NmeaParser::new();
        let corrupted =
            b"$GPRMC,123519.50,A,3123.2060,S,06411.3280,W,10.0,84.4,230394,003.1,W,A*00\r\n";
        assert!(parser.parse_line(corrupted).is_none());
        assert!(parser.parse_line(RMC).is_some());
    }

    #[test]
    fn test_non_ascii_time_field_skipped() {
        let mut parser = NmeaParser::new();
        let line =
            "$GPRMC,1\u{e9}3519.50,A,3123.2060,S,06411.3280,W,10.0,84.4,230394,003.1,W,A*70\r\n";
        assert!(parser.parse_line(line.as_bytes()).is_none());

        parser.parse_line(GGA);
        assert_eq!(parser.parse_line(RMC).unwrap().satellites, 8);
    }

    #[test]
    fn test_truncated_sentence_skipped() {
        let mut parser = NmeaParser::new();
        assert!(parser.parse_line(b"$GPRMC,123519.50,A,3123.2\r\n").is_none());
        assert!(parser.parse_line(b"$GPGGA,1235").is_none());

        parser.parse_line(GGA);
        assert_eq!(parser.parse_line(RMC).unwrap().satellites, 8);
    }

    #[test]
    fn test_nmea_source_drains_channel() {
        let input = [GGA, RMC].concat();
        let mut source = NmeaSource::from_reader(Cursor::new(input), None);
        assert_eq!(wait_for_fix(&mut source).unwrap().satellites, 8);
    }

    #[test]
    fn test_nmea_source_survives_line_noise() {
        let mut input = b"$GPGGA,\xff\xfe garbage\n".to_vec();
        input.extend_from_slice(b"\x00\x81\x82\r\n");
        input.extend_from_slice(GGA);
        input.extend_from_slice(RMC);
        let mut source = NmeaSource::from_reader(Cursor::new(input), None);

        let fix = wait_for_fix(&mut source);
        assert_eq!(fix.map(|f| f.satellites), Some(8));
    }

    #[test]
    fn test_simulated_drive() {
        let mut source = SimulatedSource::new(SimulationConfig::default());
        let first = source.poll(0).unwrap();
        assert_relative_eq!(first.latitude, -31.4201 + 0.001, epsilon = 1e-12);
        assert_relative_eq!(first.speed, 15.0);
        assert_eq!(first.satellites, 8);

        assert!(source.poll(999).is_none());
        let next = source.poll(1_000).unwrap();
        assert_relative_eq!(next.heading, 2.0);
        assert_eq!(source.status_label(Some(&next), 3), GPS_STATUS_SIMULATED);
    }

    #[test]
    fn test_replay_json_lines_and_gz() {
        let dir = tempfile::tempdir().unwrap();
        let lines = concat!(
            "{\"latitude\":1.0,\"longitude\":2.0,\"satellites\":5}\n",
            "\n",
            "{\"latitude\":1.5,\"longitude\":2.5}\n"
        );

        let plain = dir.path().join("drive.jsonl");
        std::fs::write(&plain, lines).unwrap();
        let mut source = ReplaySource::load(&plain, 1_000).unwrap();
        assert_eq!(source.len(), 2);
        assert_eq!(source.poll(0).unwrap().satellites, 5);
        assert!(source.poll(500).is_none());
        assert_eq!(source.poll(1_000).unwrap().satellites, 0);
        assert!(source.finished());

        let gz = dir.path().join("drive.json.gz");
        let mut encoder = flate2::write::GzEncoder::new(
            File::create(&gz).unwrap(),
            flate2::Compression::default(),
        );
        encoder
            .write_all(br#"[{"latitude":1.0,"longitude":2.0,"speed":12.5}]"#)
            .unwrap();
        encoder.finish().unwrap();
        let mut source = ReplaySource::load(&gz, 1_000).unwrap();
        assert_relative_eq!(source.poll(0).unwrap().speed, 12.5);
    }

    #[test]
    fn test_default_status_label() {
        let source = ReplaySource::new(Vec::new(), 1_000);
        let fix = PositionSample::new(0.0, 0.0, 0.0, 0.0, 3, 0);
        assert_eq!(source.status_label(Some(&fix), 3), GPS_STATUS_OK);
        assert_eq!(source.status_label(None, 3), GPS_STATUS_NO_SIGNAL);
    }
}
