//! Record framing for server-push streams.
//!
//! Handles both server-sent events and newline-delimited JSON on the same
//! connection:
//!
//! - `data:` lines accumulate until a blank line, then join with `\n` into one record
//! - `event:`, `id:` and `retry:` fields and `:` comments are skipped
//! - any other non-empty line is a record on its own (NDJSON)

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};

const SKIPPED_FIELDS: [&str; 3] = ["event", "id", "retry"];

/// Longest line, and longest joined `data:` record, accepted by default.
pub const DEFAULT_MAX_RECORD_LEN: usize = 1024 * 1024;

/// [`Decoder`] yielding one raw record at a time.
///
/// Lines and joined records longer than the limit are dropped with a warning;
/// the stream keeps going and the oversized bytes are never buffered whole.
#[derive(Debug)]
pub struct FrameCodec {
    lines: LinesCodec,
    max_record_len: usize,
    data: Vec<String>,
    data_len: usize,
    /// Rest of the current SSE frame is skipped after an overflow.
    discarding: bool,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_record_len(DEFAULT_MAX_RECORD_LEN)
    }

    #[must_use]
    pub fn with_max_record_len(max_record_len: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_record_len),
            max_record_len,
            data: Vec::new(),
            data_len: 0,
            discarding: false,
        }
    }

    fn feed_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.discarding {
                self.discarding = false;
                return None;
            }
            return self.flush();
        }
        if line.starts_with(':') {
            return None;
        }

        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if name == "data" {
            if self.discarding {
                return None;
            }
            // Joined with one '\n' per extra line.
            self.data_len += value.len() + usize::from(!self.data.is_empty());
            if self.data_len > self.max_record_len {
                self.overflow();
                return None;
            }
            self.data.push(value.to_string());
            return None;
        }
        if SKIPPED_FIELDS.contains(&name) {
            return None;
        }

        let record = line.trim();
        (!record.is_empty()).then(|| record.to_string())
    }

    fn flush(&mut self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        let record = self.data.join("\n");
        self.data.clear();
        self.data_len = 0;
        Some(record)
    }

    fn overflow(&mut self) {
        tracing::warn!(
            max_record_len = self.max_record_len,
            "Dropping oversized stream record"
        );
        self.data.clear();
        self.data_len = 0;
        self.discarding = true;
    }

    /// Map a line-level error to "keep going" or a fatal I/O error.
    fn recover(&mut self, err: LinesCodecError) -> Result<(), std::io::Error> {
        match err {
            LinesCodecError::MaxLineLengthExceeded => {
                self.overflow();
                Ok(())
            }
            LinesCodecError::Io(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                tracing::warn!(error = %e, "Dropping stream line that is not UTF-8");
                Ok(())
            }
            LinesCodecError::Io(e) => Err(e),
        }
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            match self.lines.decode(src) {
                Ok(Some(line)) => {
                    if let Some(record) = self.feed_line(&line) {
                        return Ok(Some(record));
                    }
                }
                Ok(None) => return Ok(None),
                Err(e) => self.recover(e)?,
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, Self::Error> {
        loop {
            match self.lines.decode_eof(src) {
                Ok(Some(line)) => {
                    if let Some(record) = self.feed_line(&line) {
                        return Ok(Some(record));
                    }
                }
                Ok(None) => {
                    if self.discarding {
                        self.discarding = false;
                        return Ok(None);
                    }
                    return Ok(self.flush());
                }
                Err(e) => self.recover(e)?,
            }
        }
    }
}
