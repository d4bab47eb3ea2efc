use bytes::Bytes;

/// Payload the upstream uses to mark the end of a stream.
pub const DONE_SENTINEL: &str = "[DONE]";

pub const DONE_FRAME: &[u8] = b"data: [DONE]\n\n";
pub const HEARTBEAT_FRAME: &[u8] = b": keep-alive\n\n";

/// Longest `data:` line the decoder buffers before giving up on it.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Splits an upstream byte stream into the payloads of its `data:` lines.
///
/// Bytes are buffered across pushes so a line (or a multi-byte character)
/// split between two reads is reassembled before it is inspected. Every
/// other SSE field, comment and blank line is dropped. Each `data:` line is
/// yielded on its own; the upstream never spreads one event over several.
///
/// A line longer than the limit is discarded up to its terminating newline
/// and counted in [`DataLineDecoder::dropped_lines`].
#[derive(Debug)]
pub struct DataLineDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already known to hold no newline.
    scanned: usize,
    discarding: bool,
    dropped: usize,
    max_line_bytes: usize,
}

impl Default for DataLineDecoder {
    fn default() -> Self {
        Self::with_max_line_bytes(MAX_LINE_BYTES)
    }
}

impl DataLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            discarding: false,
            dropped: 0,
            max_line_bytes,
        }
    }

    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        let mut start = 0;

        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            if self.discarding {
                self.discarding = false;
            } else if let Some(payload) = data_payload(&self.buffer[start..end]) {
                payloads.push(payload);
            }
            start = end + 1;
            self.scanned = start;
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_line_bytes {
            if !self.discarding {
                self.dropped += 1;
            }
            self.buffer.clear();
            self.scanned = 0;
            self.discarding = true;
        }

        payloads
    }

    /// Flushes an unterminated final line, if any.
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) || line.is_empty() {
            return None;
        }
        data_payload(&line)
    }

    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Lines thrown away for exceeding the length limit.
    pub fn dropped_lines(&self) -> usize {
        self.dropped
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let text = String::from_utf8_lossy(line);
    let value = text.strip_prefix("data:")?;
    Some(value.trim().to_string())
}

/// Encodes one SSE frame carrying a JSON payload.
pub fn encode_data_frame(json: &str) -> Bytes {
    let mut frame = String::with_capacity(json.len() + 8);
    frame.push_str("data: ");
    frame.push_str(json);
    frame.push_str("\n\n");
    Bytes::from(frame)
}
