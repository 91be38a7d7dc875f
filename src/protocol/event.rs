//! # Event Framing
//!
//! Reads and writes Wyoming events on any async byte stream.
//!
//! ## Frame Layout:
//! 1. One JSON header line terminated by `\n`:
//!    `{"type": "audio-chunk", "version": "1.5.4", "data_length": 52, "payload_length": 2048}`
//! 2. `data_length` bytes holding a JSON object (the event data)
//! 3. `payload_length` bytes of binary payload (raw PCM for audio events)
//!
//! Older peers put the data object inline in the header as `"data"`. Both
//! forms are accepted; keys from the separate data block win.
//!
//! Header lines and the two length-prefixed blocks are bounded by
//! [`FrameLimits`]. A frame over either limit is a protocol error and nothing
//! is allocated for it.

use crate::error::{WyomingError, WyomingResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Protocol version written into every outgoing header.
pub const PROTOCOL_VERSION: &str = "1.5.4";

/// Upper bounds on what one inbound frame may claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    /// Longest accepted header line, newline excluded
    pub max_header_bytes: usize,
    /// Largest accepted `data_length` or `payload_length`
    pub max_block_bytes: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_header_bytes: 64 * 1024,
            max_block_bytes: 64 * 1024 * 1024,
        }
    }
}

/// One protocol event: a type tag, a JSON data object and an optional binary payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Event {
    pub event_type: String,
    pub data: Map<String, Value>,
    pub payload: Option<Vec<u8>>,
}

impl Event {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: Map::new(),
            payload: None,
        }
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Payload length, 0 when absent.
    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, Vec::len)
    }
}

/// Header line as it appears on the wire.
#[derive(Debug, Serialize, Deserialize)]
struct EventHeader {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payload_length: Option<usize>,
}

/// Read the next event from the stream.
///
/// ## Returns:
/// - **Ok(Some(event))**: a complete frame was read
/// - **Ok(None)**: the peer closed the stream between frames
/// - **Err(Protocol)**: oversized header or block, bad JSON or a frame cut short
pub async fn read_event<R>(reader: &mut R, limits: FrameLimits) -> WyomingResult<Option<Event>>
where
    R: AsyncBufRead + Unpin,
{
    let max_header_bytes = limits.max_header_bytes;
    let mut line = Vec::new();
    let read = (&mut *reader)
        .take(max_header_bytes as u64 + 1)
        .read_until(b'\n', &mut line)
        .await?;

    if read == 0 {
        return Ok(None);
    }
    if line.last() != Some(&b'\n') {
        if line.len() > max_header_bytes {
            return Err(WyomingError::Protocol(format!(
                "header line exceeds {} bytes",
                max_header_bytes
            )));
        }
        return Err(WyomingError::Protocol("stream ended inside a header line".to_string()));
    }

    let header: EventHeader = serde_json::from_slice(&line)?;
    for (what, length) in [("data", header.data_length), ("payload", header.payload_length)] {
        if let Some(length) = length.filter(|&n| n > limits.max_block_bytes) {
            return Err(WyomingError::Protocol(format!(
                "event {} of {} bytes exceeds {} bytes",
                what, length, limits.max_block_bytes
            )));
        }
    }
    let mut data = header.data.unwrap_or_default();

    if let Some(length) = header.data_length.filter(|&n| n > 0) {
        let block = read_block(reader, length, "data").await?;
        match serde_json::from_slice::<Value>(&block)? {
            Value::Object(extra) => data.extend(extra),
            other => {
                return Err(WyomingError::Protocol(format!(
                    "event data must be a JSON object, got {}",
                    other
                )))
            }
        }
    }

    let payload = match header.payload_length.filter(|&n| n > 0) {
        Some(length) => Some(read_block(reader, length, "payload").await?),
        None => None,
    };

    Ok(Some(Event {
        event_type: header.event_type,
        data,
        payload,
    }))
}

async fn read_block<R>(reader: &mut R, length: usize, what: &str) -> WyomingResult<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut block = vec![0u8; length];
    reader.read_exact(&mut block).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            WyomingError::Protocol(format!(
                "stream ended inside event {} ({} bytes expected)",
                what, length
            ))
        } else {
            WyomingError::Io(e)
        }
    })?;
    Ok(block)
}

/// Write one event and flush it.
pub async fn write_event<W>(writer: &mut W, event: &Event) -> WyomingResult<()>
where
    W: AsyncWrite + Unpin,
{
    let data = if event.data.is_empty() {
        None
    } else {
        Some(serde_json::to_vec(&event.data)?)
    };

    let header = EventHeader {
        event_type: event.event_type.clone(),
        version: Some(PROTOCOL_VERSION.to_string()),
        data: None,
        data_length: data.as_ref().map(Vec::len),
        payload_length: event.payload.as_ref().map(Vec::len).filter(|&n| n > 0),
    };

    let mut line = serde_json::to_vec(&header)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    if let Some(data) = &data {
        writer.write_all(data).await?;
    }
    if let Some(payload) = event.payload.as_ref().filter(|p| !p.is_empty()) {
        writer.write_all(payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    fn limits(max_header_bytes: usize) -> FrameLimits {
        FrameLimits {
            max_header_bytes,
            max_block_bytes: 4096,
        }
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn test_write_then_read_chunk() {
        let event = Event::new("audio-chunk")
            .with_data(object(json!({"rate": 16000, "width": 2, "channels": 1})))
            .with_payload(vec![1, 2, 3, 4]);

        let mut wire = Vec::new();
        write_event(&mut wire, &event).await.unwrap();

        let mut reader = BufReader::new(wire.as_slice());
        let decoded = read_event(&mut reader, limits(1024)).await.unwrap().unwrap();
        assert_eq!(decoded, event);
        assert!(read_event(&mut reader, limits(1024)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_header_advertises_lengths() {
        let event = Event::new("transcript").with_data(object(json!({"text": "hi"})));
        let mut wire = Vec::new();
        write_event(&mut wire, &event).await.unwrap();

        let newline = wire.iter().position(|&b| b == b'\n').unwrap();
        let header: Value = serde_json::from_slice(&wire[..newline]).unwrap();
        assert_eq!(header["type"], "transcript");
        assert_eq!(header["version"], PROTOCOL_VERSION);
        assert_eq!(header["data_length"], 13);
        assert!(header.get("payload_length").is_none());
    }

    #[tokio::test]
    async fn test_inline_data_is_merged() {
        let wire = concat!(
            "{\"type\":\"audio-start\",\"data\":{\"rate\":8000,\"width\":2},\"data_length\":14}\n",
            "{\"rate\":22050}"
        )
        .as_bytes();
        let mut reader = BufReader::new(&wire[..]);
        let event = read_event(&mut reader, limits(1024)).await.unwrap().unwrap();
        assert_eq!(event.event_type, "audio-start");
        assert_eq!(event.data["rate"], 22050);
        assert_eq!(event.data["width"], 2);
        assert!(event.payload.is_none());
    }

    #[tokio::test]
    async fn test_bare_event_without_data() {
        let mut reader = BufReader::new(&b"{\"type\":\"describe\"}\n"[..]);
        let event = read_event(&mut reader, limits(1024)).await.unwrap().unwrap();
        assert_eq!(event, Event::new("describe"));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_protocol_error() {
        let wire = b"{\"type\":\"audio-chunk\",\"payload_length\":10}\n\x01\x02";
        let mut reader = BufReader::new(&wire[..]);
        let err = read_event(&mut reader, limits(1024)).await.unwrap_err();
        assert!(matches!(err, WyomingError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_oversized_header_rejected() {
        let mut wire = b"{\"type\":\"".to_vec();
        wire.extend(std::iter::repeat(b'x').take(200));
        wire.extend_from_slice(b"\"}\n");
        let mut reader = BufReader::new(wire.as_slice());
        let err = read_event(&mut reader, limits(64)).await.unwrap_err();
        assert!(err.to_string().contains("exceeds 64 bytes"));
    }

    #[tokio::test]
    async fn test_huge_payload_length_rejected_before_reading() {
        let wire = b"{\"type\":\"audio-chunk\",\"payload_length\":1099511627776}\n\x01\x02";
        let mut reader = BufReader::new(&wire[..]);
        let err = read_event(&mut reader, limits(1024)).await.unwrap_err();
        assert!(
            matches!(err, WyomingError::Protocol(ref msg) if msg.contains("exceeds 4096 bytes"))
        );

        let wire = format!("{{\"type\":\"transcribe\",\"data_length\":{}}}\n", usize::MAX);
        let mut reader = BufReader::new(wire.as_bytes());
        let err = read_event(&mut reader, limits(1024)).await.unwrap_err();
        assert!(matches!(err, WyomingError::Protocol(ref msg) if msg.contains("event data")));
    }

    #[tokio::test]
    async fn test_payload_at_limit_accepted() {
        let event = Event::new("audio-chunk").with_payload(vec![7; 4096]);
        let mut wire = Vec::new();
        write_event(&mut wire, &event).await.unwrap();

        let mut reader = BufReader::new(wire.as_slice());
        let decoded = read_event(&mut reader, limits(1024)).await.unwrap().unwrap();
        assert_eq!(decoded.payload_len(), 4096);
    }

    #[tokio::test]
    async fn test_garbage_header_rejected() {
        let mut reader = BufReader::new(&b"not json\n"[..]);
        assert!(matches!(
            read_event(&mut reader, limits(1024)).await,
            Err(WyomingError::Protocol(_))
        ));
    }
}
