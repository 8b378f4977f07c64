//! Incremental SSE (Server-Sent Events) decoder for streaming model responses.
//!
//! SSE format: lines of `field: value`, events separated by a blank line.
//! Chunks from the network never line up with either, so everything that
//! is not yet a complete line (or a complete UTF-8 character) is carried
//! over to the next `feed` call.

use crate::error::FrameError;

/// A single parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, if present.
    pub event: Option<String>,
    /// The `id:` field, if present.
    pub id: Option<String>,
    /// All `data:` lines of the frame joined with `\n`.
    pub data: String,
}

/// What to do with a line that is not valid SSE field syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FramePolicy {
    /// Log and skip the line
    #[default]
    Lenient,
    /// Stop and report [`FrameError::MalformedLine`]
    Strict,
}

/// Streaming-safe UTF-8 decoding: an incomplete multi-byte sequence at the
/// end of a chunk is held back until the rest arrives.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[len..];
                        }
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let tail = rest.to_vec();
        self.pending = tail;
        out
    }

    /// End of input. A dangling partial character becomes U+FFFD.
    pub fn finish(&mut self) -> Option<char> {
        if self.pending.is_empty() {
            None
        } else {
            self.pending.clear();
            Some(char::REPLACEMENT_CHARACTER)
        }
    }
}

#[derive(Debug, Default)]
struct PendingFrame {
    event: Option<String>,
    id: Option<String>,
    data_lines: Vec<String>,
}

/// Incremental SSE parser that buffers incomplete lines across chunk boundaries.
#[derive(Debug, Default)]
pub struct SseParser {
    decoder: Utf8Decoder,
    buffer: String,
    // Bytes of `buffer` already searched for a line ending.
    scanned: usize,
    frame: PendingFrame,
    policy: FramePolicy,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: FramePolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Feed raw bytes from the HTTP response. Each completed event is handed
    /// to `on_event` before this call returns, in stream order.
    pub fn feed_with<F>(&mut self, chunk: &[u8], mut on_event: F) -> Result<(), FrameError>
    where
        F: FnMut(SseEvent),
    {
        let text = self.decoder.decode(chunk);
        self.buffer.push_str(&text);
        self.drain_lines(&mut on_event)
    }

    /// Same as [`feed_with`](Self::feed_with) but collects the events.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, FrameError> {
        let mut events = Vec::new();
        self.feed_with(chunk, |event| events.push(event))?;
        Ok(events)
    }

    /// Signal end of stream. Only a frame that was properly terminated by a
    /// blank line is ever emitted; anything still buffered is dropped.
    pub fn finish<F>(&mut self, mut on_event: F) -> Result<(), FrameError>
    where
        F: FnMut(SseEvent),
    {
        if let Some(c) = self.decoder.finish() {
            self.buffer.push(c);
        }
        // A lone trailing CR is a complete line ending.
        if self.buffer.ends_with('\r') {
            self.buffer.push('\n');
            self.drain_lines(&mut on_event)?;
        }

        if !self.buffer.is_empty() || !self.frame.data_lines.is_empty() {
            tracing::debug!(
                buffered = self.buffer.len(),
                data_lines = self.frame.data_lines.len(),
                "discarding unterminated SSE frame at end of stream"
            );
        }
        self.buffer.clear();
        self.scanned = 0;
        self.frame = PendingFrame::default();
        Ok(())
    }

    fn drain_lines(&mut self, on_event: &mut dyn FnMut(SseEvent)) -> Result<(), FrameError> {
        let mut buffer = std::mem::take(&mut self.buffer);
        let mut start = 0;
        let mut scan = self.scanned;

        let result = loop {
            let Some(offset) = buffer[scan..].find(|c: char| c == '\r' || c == '\n') else {
                scan = buffer.len();
                break Ok(());
            };
            let pos = scan + offset;
            let terminator_len = if buffer.as_bytes()[pos] == b'\r' {
                match buffer.as_bytes().get(pos + 1) {
                    Some(b'\n') => 2,
                    Some(_) => 1,
                    // A '\n' may still follow in the next chunk
                    None => {
                        scan = pos;
                        break Ok(());
                    }
                }
            } else {
                1
            };

            let line_start = start;
            start = pos + terminator_len;
            scan = start;
            if let Err(e) = self.process_line(&buffer[line_start..pos], on_event) {
                break Err(e);
            }
        };

        buffer.drain(..start);
        self.scanned = scan - start;
        self.buffer = buffer;
        result
    }

    fn process_line(
        &mut self,
        line: &str,
        on_event: &mut dyn FnMut(SseEvent),
    ) -> Result<(), FrameError> {
        if line.is_empty() {
            self.dispatch(on_event);
            return Ok(());
        }
        if line.starts_with(':') {
            return Ok(());
        }

        let (field, value, has_colon) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value), true),
            None => (line, "", false),
        };

        match field {
            "data" => self.frame.data_lines.push(value.to_string()),
            "event" => self.frame.event = Some(value.to_string()),
            "id" => self.frame.id = Some(value.to_string()),
            "retry" => {}
            // Unknown named fields are legal SSE and ignored
            _ if has_colon => {}
            _ => match self.policy {
                FramePolicy::Lenient => {
                    tracing::warn!(line = %truncate(line, 120), "skipping malformed SSE line");
                }
                FramePolicy::Strict => {
                    return Err(FrameError::MalformedLine {
                        line: line.to_string(),
                    });
                }
            },
        }
        Ok(())
    }

    fn dispatch(&mut self, on_event: &mut dyn FnMut(SseEvent)) {
        let frame = std::mem::take(&mut self.frame);
        if frame.data_lines.is_empty() {
            return;
        }
        on_event(SseEvent {
            event: frame.event,
            id: frame.id,
            data: frame.data_lines.join("\n"),
        });
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
