// src/decoder.rs

//! Incremental console byte stream decoder
//!
//! Turns the raw output of a build (colour escapes, progress bars redrawn
//! with carriage returns and backspaces, lines split across reads) into
//! display lines. Input may arrive in chunks of any size, including one
//! byte at a time; all state survives between calls to [`ByteStreamDecoder::feed`].
//!
//! Rules:
//! - `ESC` starts an escape sequence, absorbed up to and including `m`
//! - backspace drops the last accumulated character
//! - `CR` not followed by `LF` emits the current segment; the first one of
//!   a line appends, later ones overwrite the previously emitted line
//! - `LF` (or end of stream) completes the line, which is classified
//! - other bytes outside printable ASCII are dropped

use crate::classify::{Classification, LineCategory, LineClassifier};

const ESC: u8 = 27;
const BACKSPACE: u8 = 8;
const CR: u8 = 13;
const LF: u8 = 10;

/// One line produced by the decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLine {
    pub text: String,
    pub category: LineCategory,
    /// Replace the previously emitted line instead of appending
    pub overwrite: bool,
    /// Completed by a line feed (or end of stream) rather than a carriage return
    pub complete: bool,
    /// Fatal diagnostic: the enclosing job fails regardless of exit status
    pub hard_failure: bool,
}

/// Decoder state carried between chunks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderState {
    /// Printable characters of the line being accumulated
    pub line: String,
    pub in_escape: bool,
    /// A carriage return was seen and the next byte decides what it means
    pub cr_pending: bool,
    /// No carriage return has been emitted for the current line yet
    pub first_cr: bool,
    /// Segments of the current line overwrite the last emitted line
    pub overwrite_till_nl: bool,
}

impl Default for DecoderState {
    fn default() -> Self {
        Self {
            line: String::new(),
            in_escape: false,
            cr_pending: false,
            first_cr: true,
            overwrite_till_nl: false,
        }
    }
}

/// Byte stream to line decoder
#[derive(Debug, Clone, Default)]
pub struct ByteStreamDecoder {
    state: DecoderState,
    cache_marker: Option<String>,
    bytes_consumed: u64,
}

impl ByteStreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flush the accumulated line as soon as it equals `marker`
    pub fn with_cache_marker(mut self, marker: impl Into<String>) -> Self {
        self.cache_marker = Some(marker.into());
        self
    }

    pub fn state(&self) -> &DecoderState {
        &self.state
    }

    /// Total bytes handed to [`feed`](Self::feed) since the last reset
    pub fn bytes_consumed(&self) -> u64 {
        self.bytes_consumed
    }

    /// Forget any partial line and start over
    pub fn reset(&mut self) {
        self.state = DecoderState::default();
        self.bytes_consumed = 0;
    }

    /// Decode a chunk of bytes
    pub fn feed(&mut self, bytes: &[u8], classifier: &dyn LineClassifier) -> Vec<DecodedLine> {
        let mut out = Vec::new();
        self.bytes_consumed += bytes.len() as u64;

        for &b in bytes {
            if self.state.cr_pending {
                self.state.cr_pending = false;
                if b != LF {
                    out.push(self.emit_segment());
                }
            }

            if self.state.in_escape || b == ESC {
                self.state.in_escape = b != b'm';
                continue;
            }

            match b {
                BACKSPACE => {
                    self.state.line.pop();
                }
                CR => self.state.cr_pending = true,
                LF => out.push(self.complete_line(classifier)),
                32..=126 => {
                    self.state.line.push(b as char);
                    if self.at_cache_marker() {
                        out.push(self.complete_line(classifier));
                    }
                }
                _ => {}
            }
        }

        out
    }

    /// End of stream: complete whatever is still pending
    pub fn finish(&mut self, classifier: &dyn LineClassifier) -> Option<DecodedLine> {
        let pending_cr = std::mem::take(&mut self.state.cr_pending);
        self.state.in_escape = false;

        let line = if pending_cr || !self.state.line.is_empty() || self.state.overwrite_till_nl {
            Some(self.complete_line(classifier))
        } else {
            None
        };

        self.state = DecoderState::default();
        line
    }

    fn at_cache_marker(&self) -> bool {
        self.cache_marker
            .as_deref()
            .is_some_and(|marker| self.state.line == marker)
    }

    /// Carriage-return segment, emitted unclassified
    fn emit_segment(&mut self) -> DecodedLine {
        let overwrite = !self.state.first_cr;
        self.state.first_cr = false;
        self.state.overwrite_till_nl = true;

        DecodedLine {
            text: std::mem::take(&mut self.state.line),
            category: LineCategory::Plain,
            overwrite,
            complete: false,
            hard_failure: false,
        }
    }

    fn complete_line(&mut self, classifier: &dyn LineClassifier) -> DecodedLine {
        let text = std::mem::take(&mut self.state.line);
        let Classification { category, fatal } = classifier.classify(&text);
        let overwrite = self.state.overwrite_till_nl;

        self.state.overwrite_till_nl = false;
        self.state.first_cr = true;

        DecodedLine {
            text,
            category,
            overwrite,
            complete: true,
            hard_failure: fatal && category.is_diagnostic(),
        }
    }
}
