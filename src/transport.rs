//! Publish/subscribe transport seam.
//!
//! The secure messaging link itself (MQTT over TLS, credentials, link
//! bring-up) lives outside this crate. The device only needs to connect,
//! publish a payload to a topic, and ask whether it is still connected.

use serde::Serialize;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::error::{MapperError, MapperResult};

pub trait Transport {
    /// One connection attempt, bounded by the transport's own timeout
    fn connect(&mut self, client_id: &str) -> MapperResult<()>;

    fn is_connected(&self) -> bool;

    /// Publish one payload; errors are reported by the caller, never retried
    fn publish(&mut self, topic: &str, payload: &str) -> MapperResult<()>;

    /// Whether the underlying network link is up
    fn link_up(&self) -> bool {
        true
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    topic: &'a str,
    payload: serde_json::Value,
}

/// Where a [`JsonLinesTransport`] writes
#[derive(Debug, Clone)]
pub enum JsonLinesTarget {
    Stdout,
    File(PathBuf),
}

/// Writes every publish as one `{"topic": ..., "payload": {...}}` line.
pub struct JsonLinesTransport {
    target: JsonLinesTarget,
    writer: Option<Box<dyn Write + Send>>,
}

impl JsonLinesTransport {
    pub fn new(target: JsonLinesTarget) -> Self {
        JsonLinesTransport {
            target,
            writer: None,
        }
    }

    fn open(&self) -> io::Result<Box<dyn Write + Send>> {
        match &self.target {
            JsonLinesTarget::Stdout => Ok(Box::new(io::stdout())),
            JsonLinesTarget::File(path) => {
                let file: File = OpenOptions::new().create(true).append(true).open(path)?;
                Ok(Box::new(file))
            }
        }
    }
}

impl Transport for JsonLinesTransport {
    fn connect(&mut self, client_id: &str) -> MapperResult<()> {
        let writer = self.open()?;
        log::info!("Transport ready for client {} ({:?})", client_id, self.target);
        self.writer = Some(writer);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    fn publish(&mut self, topic: &str, payload: &str) -> MapperResult<()> {
        let writer = self.writer.as_mut().ok_or(MapperError::TransportDisconnected)?;
        let envelope = Envelope {
            topic,
            payload: serde_json::from_str(payload)?,
        };
        let line = serde_json::to_string(&envelope)?;
        let written = writeln!(writer, "{}", line).and_then(|_| writer.flush());
        if let Err(e) = written {
            // A broken sink is a lost connection
            self.writer = None;
            return Err(MapperError::Transport(e.to_string()));
        }
        Ok(())
    }
}

/// A message as seen by [`MemoryTransport`]
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: String,
}

impl PublishedMessage {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    connected: bool,
    link_up: bool,
    connect_attempts: u32,
    connect_script: VecDeque<bool>,
    fail_publishes: u32,
    published: Vec<PublishedMessage>,
}

/// In-memory transport with scripted failures.
///
/// Clones share state, so a test can keep a handle after handing one to the
/// device. Connect attempts succeed unless the script says otherwise.
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        MemoryTransport {
            inner: Arc::new(Mutex::new(MemoryInner {
                link_up: true,
                ..MemoryInner::default()
            })),
        }
    }

    /// Queue outcomes for the next connect attempts (true = success)
    pub fn script_connects(&self, outcomes: &[bool]) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.connect_script.extend(outcomes.iter().copied());
        }
    }

    /// Fail the next `count` publishes
    pub fn fail_next_publishes(&self, count: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_publishes = count;
        }
    }

    /// Simulate the broker dropping the session
    pub fn drop_connection(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.connected = false;
        }
    }

    pub fn set_link_up(&self, up: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.link_up = up;
        }
    }

    pub fn connect_attempts(&self) -> u32 {
        self.inner.lock().map(|i| i.connect_attempts).unwrap_or(0)
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        self.inner
            .lock()
            .map(|i| i.published.clone())
            .unwrap_or_default()
    }

    pub fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.topic == topic)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.published.clear();
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self, client_id: &str) -> MapperResult<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| MapperError::Transport("memory transport lock poisoned".to_string()))?;
        inner.connect_attempts += 1;
        let ok = inner.link_up && inner.connect_script.pop_front().unwrap_or(true);
        inner.connected = ok;
        if ok {
            Ok(())
        } else {
            Err(MapperError::Transport(format!("connect refused for {}", client_id)))
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().map(|i| i.connected).unwrap_or(false)
    }

    fn publish(&mut self, topic: &str, payload: &str) -> MapperResult<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| MapperError::Transport("memory transport lock poisoned".to_string()))?;
        if !inner.connected {
            return Err(MapperError::TransportDisconnected);
        }
        if inner.fail_publishes > 0 {
            inner.fail_publishes -= 1;
            return Err(MapperError::Transport("publish rejected".to_string()));
        }
        inner.published.push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    fn link_up(&self) -> bool {
        self.inner.lock().map(|i| i.link_up).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_memory_transport_scripted_connects() {
        let mut transport = MemoryTransport::new();
        transport.script_connects(&[false, true]);

        assert!(transport.connect("dev").is_err());
        assert!(!transport.is_connected());
        assert!(transport.connect("dev").is_ok());
        assert!(transport.is_connected());
        assert_eq!(transport.connect_attempts(), 2);
    }

    #[test]
    fn test_memory_transport_records() {
        let mut transport = MemoryTransport::new();
        let handle = transport.clone();
        assert!(matches!(
            transport.publish("routes", "{}"),
            Err(MapperError::TransportDisconnected)
        ));

        transport.connect("dev").unwrap();
        transport.publish("routes", r#"{"tipo":"inicio"}"#).unwrap();
        transport.fail_next_publishes(1);
        assert!(transport.publish("routes", "{}").is_err());

        let published = handle.published_to("routes");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].json()["tipo"], "inicio");
    }

    #[test]
    fn test_json_lines_transport_writes_envelopes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let mut transport = JsonLinesTransport::new(JsonLinesTarget::File(path.clone()));

        assert!(!transport.is_connected());
        transport.connect("dev").unwrap();
        transport.publish("info/dev", r#"{"satelites_gps":7}"#).unwrap();

        let mut contents = String::new();
        File::open(&path).unwrap().read_to_string(&mut contents).unwrap();
        let line: serde_json::Value = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(line["topic"], "info/dev");
        assert_eq!(line["payload"]["satelites_gps"], 7);
    }
}
