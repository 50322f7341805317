//! Turns the raw body of a streaming chat response into ordered content increments.
//!
//! The body is a sequence of newline-terminated lines. Lines starting with `data: `
//! carry either a content chunk or an in-band `[ERROR] <message>` failure; every
//! other line (keep-alives, comments, blank separators) is dropped.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use tracing::{debug, trace, warn};

use crate::error::{AppError, Result};

pub const EVENT_PREFIX: &str = "data: ";
pub const ERROR_MARKER: &str = "[ERROR]";

/// Stateful UTF-8 decoder. Bytes of a character split across chunks are held
/// until the rest arrives; already decoded text is never looked at again.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>, // At most the first 3 bytes of one character
}

impl Utf8Decoder {
    pub fn decode(&mut self, chunk: &[u8]) -> Result<String> {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        match String::from_utf8(bytes) {
            Ok(text) => Ok(text),
            Err(err) => {
                let utf8_error = err.utf8_error();
                if utf8_error.error_len().is_some() {
                    return Err(AppError::StreamProtocol(format!(
                        "invalid UTF-8 in response body after {} bytes",
                        utf8_error.valid_up_to()
                    )));
                }
                // Incomplete sequence at the end: keep it for the next chunk
                let mut bytes = err.into_bytes();
                self.pending = bytes.split_off(utf8_error.valid_up_to());
                String::from_utf8(bytes).map_err(|e| AppError::StreamProtocol(e.to_string()))
            }
        }
    }

    /// Called once the body is exhausted.
    pub fn finish(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            let dangling = std::mem::take(&mut self.pending);
            Err(AppError::StreamProtocol(format!(
                "response body ended inside a UTF-8 sequence ({} dangling bytes)",
                dangling.len()
            )))
        }
    }
}

/// Splits decoded text into complete lines, holding back the unterminated tail.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: String,
}

impl LineBuffer {
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);

        let mut lines = Vec::new();
        while let Some(newline_pos) = self.buffer.find('\n') {
            let mut line: String = self.buffer.drain(..=newline_pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    pub fn remainder(&self) -> &str {
        &self.buffer
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Content(String),
    Failure(String),
}

/// Classifies one complete line. `None` means the line carries nothing.
pub fn parse_event_line(line: &str) -> Option<StreamEvent> {
    let payload = line.strip_prefix(EVENT_PREFIX)?;

    if let Some(message) = payload.strip_prefix(ERROR_MARKER) {
        return Some(StreamEvent::Failure(message.trim_start().to_string()));
    }
    if payload.trim().is_empty() {
        return None;
    }
    Some(StreamEvent::Content(payload.to_string()))
}

pub struct StreamAssembler<S> {
    source: S,
    decoder: Utf8Decoder,
    lines: LineBuffer,
    ready: VecDeque<String>,
    done: bool,
}

impl<S> StreamAssembler<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    pub fn new(source: S) -> Self {
        Self {
            source,
            decoder: Utf8Decoder::default(),
            lines: LineBuffer::default(),
            ready: VecDeque::new(),
            done: false,
        }
    }

    /// Next content increment in arrival order; `Ok(None)` once the body ended cleanly.
    ///
    /// The first error ends the stream: later calls return `Ok(None)`.
    pub async fn next_increment(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(increment) = self.ready.pop_front() {
                return Ok(Some(increment));
            }
            if self.done {
                return Ok(None);
            }

            match self.source.next().await {
                Some(Ok(chunk)) => {
                    if let Err(err) = self.absorb(&chunk) {
                        self.done = true;
                        self.ready.clear();
                        return Err(err);
                    }
                }
                Some(Err(err)) => {
                    warn!(error = %err, "stream read failed");
                    self.done = true;
                    self.ready.clear();
                    return Err(err);
                }
                None => {
                    self.done = true;
                    self.decoder.finish()?;
                    if !self.lines.remainder().is_empty() {
                        debug!(fragment = %self.lines.remainder(), "discarding unterminated line at end of stream");
                    }
                }
            }
        }
    }

    /// Drains the whole stream into one string.
    pub async fn collect(mut self) -> Result<String> {
        let mut content = String::new();
        while let Some(increment) = self.next_increment().await? {
            content.push_str(&increment);
        }
        Ok(content)
    }

    fn absorb(&mut self, chunk: &[u8]) -> Result<()> {
        let text = self.decoder.decode(chunk)?;
        for line in self.lines.push(&text) {
            match parse_event_line(&line) {
                Some(StreamEvent::Content(content)) => self.ready.push_back(content),
                Some(StreamEvent::Failure(message)) => {
                    warn!(%message, "server reported an error mid-stream");
                    let message = if message.is_empty() { "server reported an error".to_string() } else { message };
                    return Err(AppError::StreamProtocol(message));
                }
                None => trace!(%line, "ignoring non-event line"),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn source(chunks: Vec<Vec<u8>>) -> impl Stream<Item = Result<Bytes>> + Unpin {
        stream::iter(chunks.into_iter().map(|chunk| Ok(Bytes::from(chunk))))
    }

    async fn increments(chunks: Vec<Vec<u8>>) -> Result<Vec<String>> {
        let mut assembler = StreamAssembler::new(source(chunks));
        let mut out = Vec::new();
        while let Some(increment) = assembler.next_increment().await? {
            out.push(increment);
        }
        Ok(out)
    }

    const BODY: &str = "data: Hola\n\ndata:  señor 🌍\n\n: keep-alive\n\ndata: ¿qué tal?\n\n";

    #[tokio::test]
    async fn emits_data_lines_in_order() {
        let out = increments(vec![BODY.as_bytes().to_vec()]).await.unwrap();
        assert_eq!(out, vec!["Hola", " señor 🌍", "¿qué tal?"]);
    }

    #[tokio::test]
    async fn any_two_split_points_give_the_same_content() {
        let bytes = BODY.as_bytes();
        let whole = increments(vec![bytes.to_vec()]).await.unwrap();

        for first in 0..=bytes.len() {
            for second in first..=bytes.len() {
                let chunks = vec![
                    bytes[..first].to_vec(),
                    bytes[first..second].to_vec(),
                    bytes[second..].to_vec(),
                ];
                let split = increments(chunks).await.unwrap();
                assert_eq!(split, whole, "split at {} and {}", first, second);
            }
        }
    }

    #[tokio::test]
    async fn byte_at_a_time_delivery() {
        let chunks = BODY.as_bytes().iter().map(|b| vec![*b]).collect();
        let content = StreamAssembler::new(source(chunks)).collect().await.unwrap();
        assert_eq!(content, "Hola señor 🌍¿qué tal?");
    }

    #[tokio::test]
    async fn error_marker_fails_the_stream() {
        let body = b"data: partial\n\ndata: [ERROR] boom\n\ndata: never\n\n".to_vec();
        let mut assembler = StreamAssembler::new(source(vec![body]));

        match assembler.next_increment().await {
            Err(AppError::StreamProtocol(message)) => assert_eq!(message, "boom"),
            other => panic!("expected stream error, got {:?}", other),
        }
        assert!(assembler.next_increment().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn increments_before_the_error_chunk_are_still_delivered() {
        let chunks = vec![b"data: one\n".to_vec(), b"data: [ERROR] model crashed\n".to_vec()];
        let mut assembler = StreamAssembler::new(source(chunks));

        assert_eq!(assembler.next_increment().await.unwrap().as_deref(), Some("one"));
        assert!(matches!(assembler.next_increment().await, Err(AppError::StreamProtocol(_))));
    }

    #[tokio::test]
    async fn read_errors_surface_unchanged() {
        let items: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: fine\n")),
            Err(AppError::Network("connection reset".to_string())),
        ];
        let mut assembler = StreamAssembler::new(stream::iter(items));

        assert_eq!(assembler.next_increment().await.unwrap().as_deref(), Some("fine"));
        assert!(matches!(assembler.next_increment().await, Err(AppError::Network(_))));
    }

    #[tokio::test]
    async fn unterminated_tail_is_dropped() {
        let out = increments(vec![b"data: done\ndata: cut off".to_vec()]).await.unwrap();
        assert_eq!(out, vec!["done"]);
    }

    #[tokio::test]
    async fn invalid_utf8_is_a_protocol_error() {
        let result = increments(vec![b"data: \xff\xfe\n".to_vec()]).await;
        assert!(matches!(result, Err(AppError::StreamProtocol(_))));
    }

    #[tokio::test]
    async fn body_ending_mid_character_is_a_protocol_error() {
        let mut body = b"data: ok\n".to_vec();
        body.extend_from_slice(&"é".as_bytes()[..1]);
        let result = increments(vec![body]).await;
        assert!(matches!(result, Err(AppError::StreamProtocol(_))));
    }

    #[test]
    fn line_classification() {
        assert_eq!(parse_event_line("data: hi"), Some(StreamEvent::Content("hi".into())));
        assert_eq!(parse_event_line("data:    "), None);
        assert_eq!(parse_event_line("event: ping"), None);
        assert_eq!(parse_event_line("data:no-space"), None);
        assert_eq!(parse_event_line("data: [ERROR] bad"), Some(StreamEvent::Failure("bad".into())));
    }

    #[test]
    fn crlf_lines_are_trimmed() {
        let mut lines = LineBuffer::default();
        assert_eq!(lines.push("data: a\r\ndata: b"), vec!["data: a"]);
        assert_eq!(lines.remainder(), "data: b");
    }
}
