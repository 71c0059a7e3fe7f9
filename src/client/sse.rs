//! Incremental decoder for the chat event stream.
//!
//! Chunks arrive at arbitrary byte boundaries, including in the middle of a
//! multi-byte UTF-8 character. The decoder keeps both the undecoded byte tail
//! and the unterminated line across calls, so feeding a payload in any split
//! yields the same events as feeding it whole.

use crate::events::StreamEvent;

const DATA_PREFIX: &str = "data: ";

#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Text of the current, not yet newline-terminated line
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence
    pending: Vec<u8>,
    finished: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self {
            buffer: String::with_capacity(4096),
            pending: Vec::new(),
            finished: false,
        }
    }

    /// True once a `done` event has been emitted; all later input is ignored.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed raw bytes and get every event completed by them, in line order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        self.decode_utf8(chunk);

        // Complete lines are parsed in place; the buffer is compacted once per call.
        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..].find('\n') {
            let end = consumed + offset + 1;
            let event = parse_line(&self.buffer[consumed..end]);
            consumed = end;

            if let Some(event) = event {
                let done = event.is_done();
                events.push(event);
                if done {
                    self.finished = true;
                    break;
                }
            }
        }

        if self.finished {
            self.finish();
        } else {
            self.buffer.drain(..consumed);
        }

        events
    }

    /// Discard whatever is still buffered. Called at end of input.
    pub fn finish(&mut self) {
        if !self.finished && (!self.buffer.trim().is_empty() || !self.pending.is_empty()) {
            tracing::debug!(
                buffered = self.buffer.len() + self.pending.len(),
                "Discarding unterminated SSE data at end of stream"
            );
        }
        self.buffer = String::new();
        self.pending = Vec::new();
    }

    fn decode_utf8(&mut self, chunk: &[u8]) {
        let owned;
        let mut input: &[u8] = if self.pending.is_empty() {
            chunk
        } else {
            self.pending.extend_from_slice(chunk);
            owned = std::mem::take(&mut self.pending);
            &owned
        };

        loop {
            match std::str::from_utf8(input) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    return;
                }
                Err(e) => {
                    let (valid, rest) = input.split_at(e.valid_up_to());
                    self.buffer
                        .push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        None => {
                            self.pending.extend_from_slice(rest);
                            return;
                        }
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            input = &rest[len..];
                        }
                    }
                }
            }
        }
    }
}

/// Parse one complete line. Anything that is not a well-formed `data: <json>`
/// event is dropped.
fn parse_line(line: &str) -> Option<StreamEvent> {
    let line = line.trim();
    let data = line.strip_prefix(DATA_PREFIX)?;

    match serde_json::from_str::<StreamEvent>(data) {
        Ok(event) => Some(event),
        Err(e) => {
            tracing::debug!(
                data = %data.chars().take(200).collect::<String>(),
                error = %e,
                "Dropping malformed SSE frame"
            );
            None
        }
    }
}
