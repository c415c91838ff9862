use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";
/// Longest unterminated line kept while waiting for its newline.
pub const MAX_LINE_BYTES: usize = 1 << 20;

/// One decoded event of a persona stream.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct FramePayload {
    /// Incremental text fragment.
    #[serde(default)]
    pub content: Option<String>,
    /// Any other fields the backend attached. Carried, never interpreted.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FramePayload {
    /// The text fragment, if the frame carries a non-empty one.
    pub fn text(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.is_empty())
    }
}

/// Incremental decoder for newline-delimited `data: {json}` frames.
///
/// Bytes are buffered rather than text so multi-byte characters split across
/// network reads decode intact. Malformed frames are logged and dropped, and so
/// is any line that grows past [`MAX_LINE_BYTES`] without a terminator.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    /// Start of the first line not yet handed out.
    start: usize,
    /// Everything before this offset is known to hold no newline.
    scanned: usize,
    /// Skipping the remainder of an oversized line.
    discarding: bool,
    malformed: u64,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and iterate the frames completed by it. Unterminated
    /// trailing bytes stay buffered for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> Frames<'_> {
        if self.start > 0 {
            self.buffer.drain(..self.start);
            self.scanned -= self.start;
            self.start = 0;
        }
        self.buffer.extend_from_slice(chunk);
        Frames { decoder: self }
    }

    /// Decode whatever is left once the stream ended without a final newline.
    pub fn finish(&mut self) -> Option<FramePayload> {
        let mut rest = self.buffer.split_off(self.start);
        self.buffer.clear();
        self.start = 0;
        self.scanned = 0;
        if std::mem::take(&mut self.discarding) || rest.is_empty() {
            return None;
        }
        trim_cr(&mut rest);
        self.decode_line(&rest)
    }

    /// Bytes waiting for a line terminator.
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.start
    }

    /// Frames dropped because their payload did not parse.
    pub fn malformed_count(&self) -> u64 {
        self.malformed
    }

    fn next_line(&mut self) -> Option<Vec<u8>> {
        loop {
            let Some(offset) = self.buffer[self.scanned..].iter().position(|&b| b == b'\n') else {
                self.scanned = self.buffer.len();
                self.enforce_line_limit();
                return None;
            };
            let end = self.scanned + offset;
            let begin = self.start;
            self.start = end + 1;
            self.scanned = self.start;
            if std::mem::take(&mut self.discarding) {
                continue;
            }
            let mut line = self.buffer[begin..end].to_vec();
            trim_cr(&mut line);
            return Some(line);
        }
    }

    fn enforce_line_limit(&mut self) {
        let pending = self.buffer.len() - self.start;
        if pending <= MAX_LINE_BYTES {
            return;
        }
        if !self.discarding {
            self.malformed += 1;
            warn!(bytes = pending, "dropping oversized stream line");
        }
        self.buffer.clear();
        self.start = 0;
        self.scanned = 0;
        self.discarding = true;
    }

    fn decode_line(&mut self, line: &[u8]) -> Option<FramePayload> {
        let line = String::from_utf8_lossy(line);
        let data = line.strip_prefix(DATA_PREFIX)?;

        if data.trim() == DONE_SENTINEL {
            debug!("stream done sentinel");
            return None;
        }

        match serde_json::from_str::<FramePayload>(data) {
            Ok(payload) => Some(payload),
            Err(e) => {
                self.malformed += 1;
                warn!(error = %e, line = %data, "dropping malformed stream frame");
                None
            }
        }
    }
}

fn trim_cr(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
}

/// Lazy iterator over the frames currently decodable from a [`FrameDecoder`].
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = FramePayload;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(line) = self.decoder.next_line() {
            if let Some(payload) = self.decoder.decode_line(&line) {
                return Some(payload);
            }
        }
        None
    }
}
