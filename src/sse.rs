//! Server-Sent Events (SSE) frame decoding.
//!
//! This module turns the completion endpoint's chunked response body into a
//! sequence of content deltas, independent of how the transport splits or
//! coalesces frames.
//!
//! SSE format:
//! ```text
//! data: {"content": "Hello"}
//!
//! data: {"content": " world"}
//!
//! data: [DONE]
//! ```

use std::collections::VecDeque;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::client::ClientError;
use crate::model::DeltaPayload;
use crate::stream::DeltaStream;

const DATA_PREFIX: &str = "data: ";
const DONE_MARKER: &str = "[DONE]";

/// Incremental decoder from raw body bytes to content deltas.
///
/// Bytes are buffered until a full line is available, and lines are split on
/// `\n` before UTF-8 decoding, so a multi-byte character split across two
/// chunks is decoded intact. Frames whose payload is not a valid delta record
/// are dropped without failing the stream.
///
/// Once the `[DONE]` sentinel has been seen (or [`finish`](Self::finish) has
/// been called) the decoder is exhausted and yields nothing further.
///
/// # Example
/// ```
/// use chatrelay::sse::FrameDecoder;
///
/// let mut decoder = FrameDecoder::new();
/// assert_eq!(decoder.feed(b"data: {\"content\":\"Hel"), Vec::<String>::new());
/// assert_eq!(decoder.feed(b"lo\"}\n\ndata: [DONE]\n\n"), vec!["Hello".to_string()]);
/// assert!(decoder.is_finished());
/// ```
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the sentinel has been seen or the input has ended.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed the next chunk and return the deltas completed by it, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut deltas = Vec::new();
        if self.finished {
            return deltas;
        }

        self.buffer.extend_from_slice(chunk);
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.decode_line(&line[..pos], &mut deltas);
            if self.finished {
                break;
            }
        }

        deltas
    }

    /// Signal end of input, decoding a final unterminated line if present.
    pub fn finish(&mut self) -> Vec<String> {
        let mut deltas = Vec::new();
        if !self.finished && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.decode_line(&line, &mut deltas);
        }
        self.finished = true;
        self.buffer.clear();
        deltas
    }

    fn decode_line(&mut self, raw: &[u8], deltas: &mut Vec<String>) {
        let text = String::from_utf8_lossy(raw);
        let line = text.strip_suffix('\r').unwrap_or(&text);

        let Some(payload) = parse_sse_line(line) else {
            return;
        };

        if is_done_marker(payload) {
            self.finished = true;
            self.buffer.clear();
            return;
        }

        match serde_json::from_str::<DeltaPayload>(payload) {
            Ok(DeltaPayload {
                content: Some(content),
            }) if !content.is_empty() => deltas.push(content),
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, payload = %payload, "Dropping malformed frame");
            }
        }
    }
}

/// Extension trait turning a byte stream into a stream of content deltas.
///
/// The resulting stream ends after the `[DONE]` sentinel, or when the byte
/// stream ends without one. A read error is yielded once and ends the stream.
///
/// # Example
/// ```ignore
/// use chatrelay::sse::SseStreamExt;
///
/// let mut deltas = response.body.unwrap().sse_deltas();
/// while let Some(delta) = deltas.next().await {
///     print!("{}", delta?);
/// }
/// ```
pub trait SseStreamExt {
    /// Decode the byte stream into content deltas.
    fn sse_deltas(self) -> DeltaStream;
}

struct DecodeState {
    bytes: stream::BoxStream<'static, Result<Bytes, ClientError>>,
    decoder: FrameDecoder,
    pending: VecDeque<String>,
    ended: bool,
}

impl<S> SseStreamExt for S
where
    S: Stream<Item = Result<Bytes, ClientError>> + Send + 'static,
{
    fn sse_deltas(self) -> DeltaStream {
        let state = DecodeState {
            bytes: self.boxed(),
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            ended: false,
        };

        stream::unfold(state, |mut state| async move {
            loop {
                if let Some(delta) = state.pending.pop_front() {
                    return Some((Ok(delta), state));
                }

                if state.ended || state.decoder.is_finished() {
                    return None;
                }

                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        let deltas = state.decoder.feed(&chunk);
                        state.pending.extend(deltas);
                    }
                    Some(Err(e)) => {
                        state.ended = true;
                        return Some((Err(e), state));
                    }
                    None => {
                        // Natural end without the sentinel counts as completion.
                        state.ended = true;
                        let deltas = state.decoder.finish();
                        state.pending.extend(deltas);
                    }
                }
            }
        })
        .boxed()
    }
}

/// Parse an SSE line to extract the data portion.
///
/// SSE lines are in the format: `data: <content>`
///
/// # Example
/// ```
/// use chatrelay::sse::parse_sse_line;
///
/// let line = "data: {\"content\": \"hi\"}";
/// assert_eq!(parse_sse_line(line), Some("{\"content\": \"hi\"}"));
///
/// let line = "event: ping";
/// assert_eq!(parse_sse_line(line), None);
/// ```
pub fn parse_sse_line(line: &str) -> Option<&str> {
    line.strip_prefix(DATA_PREFIX)
}

/// Check if an SSE data payload is the end-of-stream sentinel.
///
/// The comparison is exact and case-sensitive.
///
/// # Example
/// ```
/// use chatrelay::sse::is_done_marker;
///
/// assert!(is_done_marker("[DONE]"));
/// assert!(!is_done_marker("[done]"));
/// assert!(!is_done_marker("{\"content\": \"value\"}"));
/// ```
pub fn is_done_marker(data: &str) -> bool {
    data == DONE_MARKER
}
