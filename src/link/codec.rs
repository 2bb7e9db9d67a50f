//! Byte-to-line decoder for the incoming serial stream.
//!
//! [`LineCodec`] is the [`Decoder`] used with
//! [`tokio_util::codec::FramedRead`]. It performs the two steps between raw
//! bytes and complete lines:
//!
//! 1. Streaming UTF-8 decoding. A multi-byte sequence split across two reads
//!    is held back until it is complete; invalid bytes become `U+FFFD`.
//! 2. Line framing through [`LineFramer`] on the `\r\n` delimiter.
//!
//! Neither step ever returns an error. Faults are queued as
//! [`LinkDiagnostic`]s and collected by the receive loop through
//! [`LineCodec::take_diagnostics`].
//!
//! A line longer than `max_line_bytes` is dropped whole: once the pending
//! fragment overflows, everything up to and including the next delimiter is
//! discarded, so how the bytes were chunked never changes which lines come
//! out.
//!
//! At end of stream the pending fragment is emitted exactly once, even when
//! it is empty.

use std::collections::VecDeque;

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::config::DEFAULT_MAX_LINE_BYTES;
use crate::diagnostics::LinkDiagnostic;
use crate::link::framer::LineFramer;
use crate::AppError;

/// Decoder turning serial bytes into `\r\n`-delimited lines.
#[derive(Debug)]
pub struct LineCodec {
    framer: LineFramer,
    ready: VecDeque<String>,
    utf8_tail: Vec<u8>,
    max_line_bytes: usize,
    /// Inside an oversized line; everything up to the next delimiter is dropped.
    discarding: bool,
    discarded: usize,
    flushed: bool,
    diagnostics: Vec<LinkDiagnostic>,
}

impl LineCodec {
    /// Create a codec that discards pending lines longer than `max_line_bytes`.
    #[must_use]
    pub fn new(max_line_bytes: usize) -> Self {
        Self {
            framer: LineFramer::new(),
            ready: VecDeque::new(),
            utf8_tail: Vec::new(),
            max_line_bytes,
            discarding: false,
            discarded: 0,
            flushed: false,
            diagnostics: Vec::new(),
        }
    }

    /// Drain diagnostics recorded since the last call.
    pub fn take_diagnostics(&mut self) -> Vec<LinkDiagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    fn push_bytes(&mut self, chunk: &[u8]) {
        let mut bytes = std::mem::take(&mut self.utf8_tail);
        bytes.extend_from_slice(chunk);

        let mut text = String::with_capacity(bytes.len());
        let mut input = bytes.as_slice();

        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    text.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, rest) = input.split_at(err.valid_up_to());
                    text.push_str(&String::from_utf8_lossy(valid));

                    if let Some(invalid) = err.error_len() {
                        text.push(char::REPLACEMENT_CHARACTER);
                        self.diagnostics
                            .push(LinkDiagnostic::InvalidUtf8 { bytes: invalid });
                        input = &rest[invalid..];
                    } else {
                        // Incomplete sequence at the end; wait for the rest.
                        self.utf8_tail = rest.to_vec();
                        break;
                    }
                }
            }
        }

        self.push_text(&text);
    }

    fn push_text(&mut self, text: &str) {
        let mut lines = self.framer.feed(text).into_iter();

        if self.discarding {
            match lines.next() {
                // First completed line is the tail of the oversized one.
                Some(tail) => self.finish_discard(tail.len()),
                None => {
                    self.discarded += self.framer.discard_pending();
                    return;
                }
            }
        }

        for line in lines {
            if line.len() > self.max_line_bytes {
                self.diagnostics.push(LinkDiagnostic::LineOverflow {
                    discarded: line.len(),
                });
            } else {
                self.ready.push_back(line);
            }
        }

        let pending = self.framer.pending();
        let pending = pending.strip_suffix('\r').unwrap_or(pending);
        if pending.len() > self.max_line_bytes {
            self.discarding = true;
            self.discarded = self.framer.discard_pending();
        }
    }

    fn finish_discard(&mut self, tail: usize) {
        self.discarding = false;
        let discarded = std::mem::take(&mut self.discarded) + tail;
        self.diagnostics
            .push(LinkDiagnostic::LineOverflow { discarded });
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LINE_BYTES)
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = AppError;

    /// Return the next complete line, or `Ok(None)` while buffering.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if !src.is_empty() {
            let chunk = src.split();
            self.push_bytes(&chunk);
        }
        Ok(self.ready.pop_front())
    }

    /// Drain remaining lines, then emit the pending fragment exactly once.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }

        if self.flushed {
            return Ok(None);
        }
        self.flushed = true;

        if !self.utf8_tail.is_empty() {
            let tail = std::mem::take(&mut self.utf8_tail);
            self.diagnostics
                .push(LinkDiagnostic::InvalidUtf8 { bytes: tail.len() });
            // A truncated sequence holds no ASCII, so it cannot complete a line.
            let text = String::from_utf8_lossy(&tail).into_owned();
            self.push_text(&text);
        }

        let last = self.framer.flush();
        if self.discarding {
            self.finish_discard(last.len());
            return Ok(Some(String::new()));
        }
        Ok(Some(last))
    }
}
