//! Incremental decoder for the daemon's newline-delimited JSON stream.
//!
//! Transport chunks do not line up with JSON objects: a chunk may carry
//! several objects, one object, or a fragment of one. The decoder buffers
//! partial objects across chunks and emits the `response` field of each
//! complete object. Lines that fail to parse are dropped with a warning and
//! decoding continues.

use bytes::{Buf, BytesMut};
use serde::Deserialize;
use tracing::{debug, warn};

/// One object of the daemon's `/api/generate` stream.
#[derive(Debug, Default, Deserialize)]
pub struct GenerateChunk {
    #[serde(default)]
    pub response: String,

    #[serde(default)]
    pub done: bool,

    #[serde(default)]
    pub error: Option<String>,
}

/// Streaming NDJSON decoder.
#[derive(Debug)]
pub struct NdjsonDecoder {
    /// Bytes after the last newline seen so far.
    pending: BytesMut,

    /// Prefix of `pending` already known to hold no newline.
    scanned: usize,

    /// Upper bound on `pending` before it is discarded.
    max_line_bytes: usize,

    /// Lines dropped because they did not parse.
    dropped: usize,
}

impl NdjsonDecoder {
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            pending: BytesMut::new(),
            scanned: 0,
            max_line_bytes,
            dropped: 0,
        }
    }

    /// Number of lines dropped so far.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Feed one transport chunk, returning the fragments it completes, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut out = Vec::new();
        let mut from = self.scanned;
        while let Some(i) = self.pending[from..].iter().position(|&b| b == b'\n') {
            let pos = from + i;
            let line = self.pending.split_to(pos + 1);
            if let Some(fragment) = self.parse_line(&line[..pos]) {
                out.push(fragment);
            }
            from = 0;
        }

        let may_close = chunk.trim_ascii_end().ends_with(b"}");
        self.settle_partial(may_close, &mut out);
        self.scanned = self.pending.len();
        out
    }

    /// Flush whatever is left once the upstream has closed.
    pub fn finish(&mut self) -> Vec<String> {
        self.scanned = 0;
        let rest = self.pending.split();
        self.parse_line(&rest).into_iter().collect()
    }

    /// Decide what to do with bytes that are not yet newline-terminated.
    ///
    /// The whole-object parse is only attempted when the latest chunk ends
    /// with `}`, so a long line arriving in small pieces is parsed once.
    fn settle_partial(&mut self, may_close: bool, out: &mut Vec<String>) {
        let lead = self
            .pending
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(self.pending.len());
        self.pending.advance(lead);
        if self.pending.is_empty() {
            return;
        }

        // Only an object can start a valid line.
        if self.pending[0] != b'{' {
            let junk = self.pending.split();
            self.drop_line(&junk);
            return;
        }

        // Upstreams that flush one object per chunk may omit the newline.
        if may_close {
            if let Ok(chunk) = serde_json::from_slice::<GenerateChunk>(&self.pending) {
                self.pending.clear();
                if let Some(fragment) = self.accept(chunk) {
                    out.push(fragment);
                }
                return;
            }
        }

        if self.pending.len() > self.max_line_bytes {
            warn!(
                bytes = self.pending.len(),
                limit = self.max_line_bytes,
                "Partial JSON line exceeds limit, dropping"
            );
            self.pending.clear();
            self.dropped += 1;
        }
    }

    fn parse_line(&mut self, line: &[u8]) -> Option<String> {
        let line = line.trim_ascii();
        if line.is_empty() {
            return None;
        }
        match serde_json::from_slice::<GenerateChunk>(line) {
            Ok(chunk) => self.accept(chunk),
            Err(e) => {
                debug!(error = %e, "JSON parse failed");
                self.drop_line(line);
                None
            }
        }
    }

    fn drop_line(&mut self, line: &[u8]) {
        warn!(line = %String::from_utf8_lossy(line), "Invalid JSON from daemon, dropping");
        self.dropped += 1;
    }

    fn accept(&self, chunk: GenerateChunk) -> Option<String> {
        if let Some(err) = &chunk.error {
            warn!(error = %err, "Daemon reported an error mid-stream");
        }
        if chunk.done {
            debug!("Daemon marked generation done");
        }
        if chunk.response.is_empty() {
            None
        } else {
            Some(chunk.response)
        }
    }
}
