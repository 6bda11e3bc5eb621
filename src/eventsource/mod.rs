use async_stream::try_stream;
use futures::{Stream, StreamExt};
use log::warn;
use std::pin::Pin;
use std::{
    fmt::{self, Display, Formatter},
    time::Duration,
};
use thiserror::Error;

const FIELD_SEPARATOR: char = ':';
/// Blank-line terminators, longest first so `\r\n\r\n` wins over `\n\r\n`.
const FRAME_DELIMITERS: [&[u8]; 4] = [b"\r\n\r\n", b"\n\r\n", b"\n\n", b"\r\r"];
const MAX_DELIMITER_LEN: usize = 4;

/// Possible errors that can occur while parsing SSE events
#[derive(Error, Debug)]
pub enum EventError {
    #[error("failed to parse retry value: {0}")]
    RetryParse(std::num::ParseIntError),
    #[error("invalid event format: event contains no data")]
    InvalidFormat,
}

impl From<std::num::ParseIntError> for EventError {
    fn from(err: std::num::ParseIntError) -> Self {
        Self::RetryParse(err)
    }
}

/// Represents a Server-Sent Event (SSE) with its associated fields.
///
/// Each event can contain:
/// - An optional ID
/// - An optional event type
/// - The event data (required)
/// - An optional retry timeout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Unique identifier for the event
    pub id: Option<String>,
    /// Type of the event (defaults to "message" when absent)
    pub event_type: Option<String>,
    /// The event payload
    pub data: String,
    /// Reconnection time in case of connection failure
    pub retry: Option<Duration>,
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event {{ id: {:?}, event_type: {:?}, data: {}, retry: {:?} }}",
            self.id, self.event_type, self.data, self.retry
        )
    }
}

impl Event {
    /// Creates a new empty Event.
    pub const fn new() -> Self {
        Self {
            id: None,
            event_type: None,
            data: String::new(),
            retry: None,
        }
    }

    /// Creates an unnamed event carrying `data`.
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::new()
        }
    }

    /// Sets the event type.
    #[must_use]
    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Parses an SSE event from a string slice.
    ///
    /// # Arguments
    ///
    /// * `input` - The string slice containing the event data
    ///
    /// # Returns
    ///
    /// Returns `Ok(Event)` if parsing succeeds and the event contains data,
    /// or `Err(EventError)` if parsing fails or the event is empty.
    pub fn parse(input: &str) -> Result<Self, EventError> {
        let mut event = Self::new();
        let mut data_lines = Vec::new();

        for line in input.lines() {
            if line.is_empty() {
                continue;
            }

            let (field, value) = line.split_once(FIELD_SEPARATOR).unwrap_or((line, ""));
            // Only a single leading space belongs to the framing.
            let value = value.strip_prefix(' ').unwrap_or(value);
            match field {
                "id" => event.id = Some(value.to_string()),
                "event" => event.event_type = Some(value.to_string()),
                "data" => data_lines.push(value),
                "retry" => {
                    let ms = value.parse::<u64>()?;
                    event.retry = Some(Duration::from_millis(ms));
                }
                _ => {} // Comments and unknown fields are ignored
            }
        }

        if data_lines.is_empty() {
            return Err(EventError::InvalidFormat);
        }

        event.data = data_lines.join("\n");
        Ok(event)
    }

    /// Serializes the event into its wire form, terminated by a blank line.
    ///
    /// Multi-line data is split into one `data:` line per `\n`; the payload
    /// must not contain bare `\r`.
    pub fn to_wire(&self) -> String {
        let mut out = String::with_capacity(self.data.len() + 16);
        if let Some(id) = &self.id {
            out.push_str(&format!("id: {id}\n"));
        }
        if let Some(event_type) = &self.event_type {
            out.push_str(&format!("event: {event_type}\n"));
        }
        if let Some(retry) = self.retry {
            out.push_str(&format!("retry: {}\n", retry.as_millis()));
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// Incremental frame splitter over raw bytes.
///
/// Bytes are kept until a blank line completes a frame, so multi-byte UTF-8
/// sequences split across network chunks decode correctly.
#[derive(Debug, Default)]
pub struct EventDecoder {
    buffer: Vec<u8>,
    /// Bytes already searched for a delimiter without success
    scanned: usize,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes to the pending buffer.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Removes and returns the next complete frame, if any.
    pub fn next_frame(&mut self) -> Option<String> {
        // A delimiter may straddle the old end of the buffer.
        let from = self.scanned.saturating_sub(MAX_DELIMITER_LEN - 1);
        let Some((end, delimiter_len)) = find_frame_end(&self.buffer, from) else {
            self.scanned = self.buffer.len();
            return None;
        };
        let frame = String::from_utf8_lossy(&self.buffer[..end]).into_owned();
        self.buffer.drain(..end + delimiter_len);
        self.scanned = 0;
        Some(frame)
    }

    /// Returns whatever is left once the input has ended.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.iter().all(u8::is_ascii_whitespace) {
            self.buffer.clear();
            self.scanned = 0;
            return None;
        }
        let rest = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        self.scanned = 0;
        Some(rest)
    }
}

fn find_frame_end(buffer: &[u8], from: usize) -> Option<(usize, usize)> {
    (from..buffer.len()).find_map(|i| {
        FRAME_DELIMITERS
            .iter()
            .find(|delimiter| buffer[i..].starts_with(delimiter))
            .map(|delimiter| (i, delimiter.len()))
    })
}

fn decode_frame(frame: &str) -> Option<Event> {
    match Event::parse(frame) {
        Ok(event) => Some(event),
        // Comment-only frames (keep-alives) carry no data.
        Err(EventError::InvalidFormat) => None,
        Err(e) => {
            warn!("[EventSource] Skipping frame: {e}");
            None
        }
    }
}

pub type EventStream<E> = Pin<Box<dyn Stream<Item = Result<Event, E>> + Send>>;

/// Extension trait for converting a byte stream into a Stream of SSE Events.
pub trait EventSourceExt<E> {
    /// Converts the byte stream into a Stream of Events.
    ///
    /// # Returns
    ///
    /// Returns a pinned Stream that yields `Result<Event, E>`, where `E` is the
    /// transport error of the underlying byte stream.
    fn events(self) -> EventStream<E>;
}

impl<S, B, E> EventSourceExt<E> for S
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Send + 'static,
{
    fn events(self) -> EventStream<E> {
        Box::pin(try_stream! {
            let mut stream = Box::pin(self);
            let mut decoder = EventDecoder::new();

            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                decoder.push(chunk.as_ref());

                while let Some(frame) = decoder.next_frame() {
                    if let Some(event) = decode_frame(&frame) {
                        yield event;
                    }
                }
            }

            // Process any remaining data in the buffer
            if let Some(frame) = decoder.finish() {
                if let Some(event) = decode_frame(&frame) {
                    yield event;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    async fn collect(chunks: Vec<&'static [u8]>) -> Vec<Event> {
        stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>))
            .events()
            .map(|e| e.unwrap())
            .collect()
            .await
    }

    #[test]
    fn test_event_parse_empty() {
        assert!(matches!(Event::parse(""), Err(EventError::InvalidFormat)));
    }

    #[test]
    fn test_event_parse_no_data() {
        assert!(matches!(
            Event::parse("id: 123\nevent: test\n"),
            Err(EventError::InvalidFormat)
        ));
    }

    #[test]
    fn test_event_parse_simple() {
        let input = "data: hello\n\n";
        let event = Event::parse(input).unwrap();
        assert_eq!(event.data, "hello");
        assert!(event.id.is_none());
        assert!(event.event_type.is_none());
    }

    #[test]
    fn test_event_parse_complex() {
        let input = "id: 123\nevent: update\ndata: line1\ndata: line2\nretry: 5000\n\n";
        let event = Event::parse(input).unwrap();
        assert_eq!(event.id, Some("123".to_string()));
        assert_eq!(event.event_type, Some("update".to_string()));
        assert_eq!(event.data, "line1\nline2");
        assert_eq!(event.retry, Some(Duration::from_millis(5000)));
    }

    #[test]
    fn test_event_parse_keeps_extra_spaces() {
        let event = Event::parse("data:   indented").unwrap();
        assert_eq!(event.data, "  indented");
    }

    #[test]
    fn test_event_parse_invalid_retry() {
        let input = "retry: invalid\ndata: test\n\n";
        assert!(matches!(
            Event::parse(input),
            Err(EventError::RetryParse(_))
        ));
    }

    #[test]
    fn test_wire_form_parses_back() {
        let event = Event::message("first\nsecond").with_type("error");
        let wire = event.to_wire();
        assert_eq!(wire, "event: error\ndata: first\ndata: second\n\n");
        assert_eq!(Event::parse(&wire).unwrap(), event);
    }

    #[test]
    fn test_decoder_handles_crlf_frames() {
        let mut decoder = EventDecoder::new();
        decoder.push(b"data: a\r\n\r\ndata: b\r\n");
        assert_eq!(decoder.next_frame().as_deref(), Some("data: a"));
        assert_eq!(decoder.next_frame(), None);
        decoder.push(b"\r\n");
        assert_eq!(decoder.next_frame().as_deref(), Some("data: b"));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_decoder_fed_byte_by_byte() {
        let large = "x".repeat(10_000);
        let input = format!("data: {large}\r\n\r\ndata: second\n\r\ndata: third\n\n");
        let mut decoder = EventDecoder::new();
        let mut frames = Vec::new();
        for byte in input.as_bytes() {
            decoder.push(std::slice::from_ref(byte));
            while let Some(frame) = decoder.next_frame() {
                frames.push(frame);
            }
        }
        assert_eq!(
            frames,
            vec![
                format!("data: {large}"),
                "data: second".to_string(),
                "data: third".to_string()
            ]
        );
        assert_eq!(decoder.finish(), None);
    }

    #[tokio::test]
    async fn test_events_across_chunk_boundaries() {
        let events = collect(vec![b"data: hel", b"lo\n", b"\ndata: wor", b"ld\n\n"]).await;
        let data: Vec<_> = events.iter().map(|e| e.data.as_str()).collect();
        assert_eq!(data, vec!["hello", "world"]);
    }

    #[tokio::test]
    async fn test_split_multibyte_character() {
        // "é" is 0xC3 0xA9; split it between chunks.
        let events = collect(vec![b"data: caf\xC3", b"\xA9\n\n"]).await;
        assert_eq!(events[0].data, "café");
    }

    #[tokio::test]
    async fn test_comment_frames_are_skipped() {
        let events = collect(vec![b": keep-alive\n\ndata: x\n\n"]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[tokio::test]
    async fn test_trailing_frame_without_blank_line() {
        let events = collect(vec![b"data: one\n\ndata: two"]).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].data, "two");
    }
}
