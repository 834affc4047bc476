//! SSE stream framing
//!
//! Turns raw response body chunks into `data:` payloads. Chunks may split an
//! event, a line, or a multi-byte UTF-8 sequence anywhere; the framer buffers
//! whatever is incomplete until the next chunk arrives.

use std::collections::VecDeque;
use std::time::Instant;

use bytes::Bytes;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ChatError, FrameError};
use crate::transport::ByteStream;

/// Separator between two events
const EVENT_SEPARATOR: &str = "\n\n";

/// Prefix of payload lines
const DATA_PREFIX: &str = "data: ";

/// Terminal payload marking the end of the answer
pub const DONE_SENTINEL: &str = "[DONE]";

/// A payload extracted from one `data:` line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Percent-decoded answer text
    Data(String),
    /// The terminal sentinel, as sent (not decoded)
    Done(String),
}

/// Incremental UTF-8 decoder.
///
/// Holds back a trailing partial sequence until the bytes completing it
/// arrive. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, chunk: &[u8], out: &mut String) {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    return;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match err.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            // Incomplete sequence at the end of the chunk
                            self.pending = after.to_vec();
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Synchronous SSE framer
///
/// Feed chunks with [`SseFramer::push_chunk`] and drain payloads with
/// [`SseFramer::next_frame`]. After the terminal sentinel nothing more is
/// produced.
#[derive(Debug, Default)]
pub struct SseFramer {
    decoder: Utf8Decoder,
    /// Decoded text not yet forming a complete event
    buffer: String,
    /// Complete events split off the buffer, not yet drained
    events: VecDeque<String>,
    /// Raw payloads of the event currently being drained
    payloads: VecDeque<String>,
    event_count: usize,
    done: bool,
}

impl SseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a chunk and append it to the frame buffer
    pub fn push_chunk(&mut self, chunk: &[u8]) {
        if self.done {
            return;
        }
        self.decoder.decode(chunk, &mut self.buffer);
        if !self.buffer.contains(EVENT_SEPARATOR) {
            return;
        }

        // The last fragment may be an incomplete event and stays buffered
        let mut fragments: Vec<&str> = self.buffer.split(EVENT_SEPARATOR).collect();
        let rest = fragments.pop().unwrap_or_default().to_string();
        self.event_count += fragments.len();
        self.events.extend(fragments.into_iter().map(str::to_string));
        self.buffer = rest;
    }

    /// Next payload from the complete events buffered so far
    pub fn next_frame(&mut self) -> Option<Result<Frame, FrameError>> {
        while !self.done {
            if let Some(payload) = self.payloads.pop_front() {
                return Some(self.frame_payload(payload));
            }
            let event = self.events.pop_front()?;
            self.payloads = event
                .trim()
                .split('\n')
                .filter_map(|line| line.strip_prefix(DATA_PREFIX))
                .map(str::to_string)
                .collect();
        }
        None
    }

    /// Whether the terminal sentinel has been seen
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of complete events split off the buffer
    pub fn event_count(&self) -> usize {
        self.event_count
    }

    fn frame_payload(&mut self, payload: String) -> Result<Frame, FrameError> {
        if payload.trim() == DONE_SENTINEL {
            // Remaining lines of this event are dropped along with the stream
            self.done = true;
            self.payloads.clear();
            self.events.clear();
            return Ok(Frame::Done(payload));
        }

        if !has_valid_escapes(&payload) {
            return Err(FrameError::InvalidPercentEncoding { payload });
        }
        match urlencoding::decode(&payload) {
            Ok(decoded) => Ok(Frame::Data(decoded.into_owned())),
            Err(_) => Err(FrameError::InvalidPercentEncoding { payload }),
        }
    }
}

/// Every `%` must start a `%XX` escape with two hex digits
fn has_valid_escapes(payload: &str) -> bool {
    payload.split('%').skip(1).all(|part| {
        part.as_bytes()
            .get(..2)
            .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit))
    })
}

/// How a read loop ended without error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The body ended
    Finished,
    /// The terminal sentinel arrived, carrying its raw text
    Done(String),
    /// The session was cancelled
    Cancelled,
}

/// Owns the response body for the duration of one read loop.
///
/// The body is released when the reader drops, on every exit path.
struct BodyReader {
    body: ByteStream,
    bytes_received: usize,
}

impl BodyReader {
    fn new(body: ByteStream) -> Self {
        Self {
            body,
            bytes_received: 0,
        }
    }

    async fn next_chunk(&mut self) -> Option<Result<Bytes, ChatError>> {
        let chunk = self.body.next().await;
        if let Some(Ok(bytes)) = &chunk {
            self.bytes_received += bytes.len();
            debug!(
                "SSE chunk received: {} bytes (total: {} bytes)",
                bytes.len(),
                self.bytes_received
            );
        }
        chunk
    }
}

impl Drop for BodyReader {
    fn drop(&mut self) {
        debug!(
            "Stream reader released after {} bytes",
            self.bytes_received
        );
    }
}

/// Read the body until it ends, the sentinel arrives, or `token` is cancelled.
///
/// `on_payload` receives every decoded non-terminal payload in order. Once
/// cancellation is observed it is not called again, and read or decode
/// failures are swallowed.
pub async fn read_stream<F>(
    body: ByteStream,
    token: &CancellationToken,
    mut on_payload: F,
) -> Result<StreamEnd, ChatError>
where
    F: FnMut(String),
{
    let stream_start = Instant::now();
    let mut reader = BodyReader::new(body);
    let mut framer = SseFramer::new();

    loop {
        let chunk = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("SSE read loop cancelled after {:?}", stream_start.elapsed());
                return Ok(StreamEnd::Cancelled);
            }
            chunk = reader.next_chunk() => chunk,
        };

        let bytes = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) if token.is_cancelled() => {
                debug!("Ignoring stream error after cancellation: {}", e);
                return Ok(StreamEnd::Cancelled);
            }
            Some(Err(e)) => return Err(e),
            None => {
                info!(
                    "SSE stream ended after {:?}, {} events, {} bytes",
                    stream_start.elapsed(),
                    framer.event_count(),
                    reader.bytes_received
                );
                return Ok(StreamEnd::Finished);
            }
        };

        framer.push_chunk(&bytes);
        while let Some(frame) = framer.next_frame() {
            if token.is_cancelled() {
                return Ok(StreamEnd::Cancelled);
            }
            match frame? {
                Frame::Data(payload) => {
                    debug!("  -> payload: {} chars", payload.len());
                    on_payload(payload);
                }
                Frame::Done(raw) => {
                    info!(
                        "SSE stream [DONE] marker received after {:?}, {} events, {} bytes",
                        stream_start.elapsed(),
                        framer.event_count(),
                        reader.bytes_received
                    );
                    return Ok(StreamEnd::Done(raw));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    fn drain(framer: &mut SseFramer) -> Vec<Result<Frame, FrameError>> {
        std::iter::from_fn(|| framer.next_frame()).collect()
    }

    fn body(chunks: Vec<&'static str>) -> ByteStream {
        stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes()))),
        )
        .boxed()
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut framer = SseFramer::new();
        framer.push_chunk(b"data: hel");
        assert!(drain(&mut framer).is_empty());

        framer.push_chunk(b"lo\n");
        assert!(drain(&mut framer).is_empty());

        framer.push_chunk(b"\ndata: world\n\n");
        assert_eq!(
            drain(&mut framer),
            vec![
                Ok(Frame::Data("hello".to_string())),
                Ok(Frame::Data("world".to_string()))
            ]
        );
        assert_eq!(framer.event_count(), 2);
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let encoded = "data: 你好\n\n".as_bytes();
        // "你" is three bytes starting right after the prefix
        let (first, second) = encoded.split_at(8);

        let mut framer = SseFramer::new();
        framer.push_chunk(first);
        assert!(drain(&mut framer).is_empty());
        framer.push_chunk(second);

        assert_eq!(drain(&mut framer), vec![Ok(Frame::Data("你好".to_string()))]);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut framer = SseFramer::new();
        framer.push_chunk(b"data: a\xffb\n\n");
        assert_eq!(
            drain(&mut framer),
            vec![Ok(Frame::Data("a\u{FFFD}b".to_string()))]
        );
    }

    #[test]
    fn test_payload_is_percent_decoded() {
        let mut framer = SseFramer::new();
        framer.push_chunk(b"data: line%20one%0Aline+two%E2%9C%93\n\n");
        assert_eq!(
            drain(&mut framer),
            vec![Ok(Frame::Data("line one\nline+two\u{2713}".to_string()))]
        );
    }

    #[test]
    fn test_invalid_percent_encoding() {
        let mut framer = SseFramer::new();
        framer.push_chunk(b"data: %FF\n\n");
        assert_eq!(
            drain(&mut framer),
            vec![Err(FrameError::InvalidPercentEncoding {
                payload: "%FF".to_string()
            })]
        );
    }

    #[test]
    fn test_malformed_escapes_are_rejected() {
        for payload in ["100%", "%ZZ", "a%4", "%%41"] {
            let mut framer = SseFramer::new();
            framer.push_chunk(format!("data: {}\n\n", payload).as_bytes());
            assert_eq!(
                drain(&mut framer),
                vec![Err(FrameError::InvalidPercentEncoding {
                    payload: payload.to_string()
                })],
                "payload {:?}",
                payload
            );
        }
    }

    #[test]
    fn test_many_events_in_one_chunk() {
        let chunk: String = (0..500).map(|i| format!("data: {}\n\n", i)).collect();
        let mut framer = SseFramer::new();
        framer.push_chunk(format!("{}data: tail", chunk).as_bytes());

        let frames = drain(&mut framer);
        assert_eq!(frames.len(), 500);
        assert_eq!(frames[499], Ok(Frame::Data("499".to_string())));
        assert_eq!(framer.event_count(), 500);

        framer.push_chunk(b"\n\n");
        assert_eq!(drain(&mut framer), vec![Ok(Frame::Data("tail".to_string()))]);
    }

    #[test]
    fn test_separator_split_across_chunks() {
        let mut framer = SseFramer::new();
        framer.push_chunk(b"data: a\n");
        assert!(drain(&mut framer).is_empty());
        framer.push_chunk(b"\n");
        assert_eq!(drain(&mut framer), vec![Ok(Frame::Data("a".to_string()))]);
    }

    #[tokio::test]
    async fn test_read_stream_fails_on_malformed_escape() {
        let token = CancellationToken::new();
        let mut payloads = Vec::new();

        let result = read_stream(body(vec!["data: ok\n\n", "data: 100%\n\n"]), &token, |p| {
            payloads.push(p)
        })
        .await;

        assert!(matches!(
            result,
            Err(ChatError::Decode(FrameError::InvalidPercentEncoding { .. }))
        ));
        assert_eq!(payloads, vec!["ok".to_string()]);
    }

    #[test]
    fn test_non_data_lines_ignored() {
        let mut framer = SseFramer::new();
        framer.push_chunk(b": keepalive\n\nevent: message\nid: 7\ndata: x\ndata:y\n\n");
        assert_eq!(drain(&mut framer), vec![Ok(Frame::Data("x".to_string()))]);
    }

    #[test]
    fn test_done_sentinel_stops_framing() {
        let mut framer = SseFramer::new();
        framer.push_chunk(b"data: a\n\ndata:  [DONE] \ndata: b\n\ndata: c\n\n");
        assert_eq!(
            drain(&mut framer),
            vec![
                Ok(Frame::Data("a".to_string())),
                Ok(Frame::Done(" [DONE] ".to_string()))
            ]
        );
        assert!(framer.is_done());

        framer.push_chunk(b"data: d\n\n");
        assert!(framer.next_frame().is_none());
    }

    #[test]
    fn test_encoded_sentinel_is_plain_data() {
        let mut framer = SseFramer::new();
        framer.push_chunk(b"data: %5BDONE%5D\n\n");
        assert_eq!(
            drain(&mut framer),
            vec![Ok(Frame::Data("[DONE]".to_string()))]
        );
        assert!(!framer.is_done());
    }

    #[tokio::test]
    async fn test_read_stream_until_done() {
        let token = CancellationToken::new();
        let mut payloads = Vec::new();

        let end = read_stream(
            body(vec!["data: %68ello\n\n", "data: [DONE]\n\n", "data: late\n\n"]),
            &token,
            |p| payloads.push(p),
        )
        .await
        .unwrap();

        assert_eq!(end, StreamEnd::Done("[DONE]".to_string()));
        assert_eq!(payloads, vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_read_stream_natural_end() {
        let token = CancellationToken::new();
        let mut payloads = Vec::new();

        let end = read_stream(body(vec!["data: a\n\ndata: b\n\ndata: trailing"]), &token, |p| {
            payloads.push(p)
        })
        .await
        .unwrap();

        assert_eq!(end, StreamEnd::Finished);
        assert_eq!(payloads, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_read_stream_surfaces_errors() {
        let token = CancellationToken::new();
        let chunks: Vec<Result<Bytes, ChatError>> = vec![
            Ok(Bytes::from_static(b"data: a\n\n")),
            Err(ChatError::Read("connection reset".to_string())),
        ];

        let result = read_stream(stream::iter(chunks).boxed(), &token, |_| {}).await;
        assert!(matches!(result, Err(ChatError::Read(_))));
    }

    #[tokio::test]
    async fn test_read_stream_cancelled_before_first_chunk() {
        let token = CancellationToken::new();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Result<Bytes, ChatError>>();
        token.cancel();
        tx.send(Ok(Bytes::from_static(b"data: a\n\n"))).unwrap();

        let mut called = false;
        let end = read_stream(UnboundedReceiverStream::new(rx).boxed(), &token, |_| {
            called = true
        })
        .await
        .unwrap();

        assert_eq!(end, StreamEnd::Cancelled);
        assert!(!called);
    }
}
