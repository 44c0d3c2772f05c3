//! Incremental SSE line decoder

use crate::frame::StreamFrame;

/// Longest line buffered while waiting for its newline
pub const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// Turns arbitrarily chunked response bytes into frames.
///
/// Bytes are buffered until a `\n` completes a line. A newline byte never
/// occurs inside a multi-byte UTF-8 sequence, so a code point split across
/// chunks is always whole again by the time its line is decoded.
///
/// A pending line that outgrows the limit is dropped along with the rest of
/// that line.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_line: usize,
    discarding: bool,
    closed: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl FrameDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a decoder with a custom pending-line limit
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line,
            discarding: false,
            closed: false,
        }
    }

    /// Feed one chunk and return every frame it completes, in wire order.
    ///
    /// After a terminal frame the decoder is closed and further input is
    /// ignored.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamFrame> {
        if self.closed {
            return Vec::new();
        }
        let chunk = if self.discarding {
            match chunk.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.discarding = false;
                    &chunk[pos + 1..]
                }
                None => return Vec::new(),
            }
        } else {
            chunk
        };
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut consumed = 0;
        while let Some(pos) = self.buffer[consumed..].iter().position(|&b| b == b'\n') {
            let end = consumed + pos;
            let frame = parse_line_bytes(&self.buffer[consumed..end]);
            consumed = end + 1;

            if let Some(frame) = frame {
                let terminal = frame.is_terminal();
                frames.push(frame);
                if terminal {
                    self.close();
                    return frames;
                }
            }
        }

        self.buffer.drain(..consumed);
        if self.buffer.len() > self.max_line {
            tracing::warn!(
                "Dropping stream line longer than {} bytes",
                self.max_line
            );
            self.buffer.clear();
            self.discarding = true;
        }
        frames
    }

    /// Flush a final line that arrived without a trailing newline
    pub fn finish(&mut self) -> Vec<StreamFrame> {
        if self.closed {
            return Vec::new();
        }
        let rest = std::mem::take(&mut self.buffer);
        self.closed = true;
        parse_line_bytes(&rest).into_iter().collect()
    }

    /// Whether a terminal frame has been seen (or input was finished)
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of bytes waiting for a newline
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn close(&mut self) {
        self.closed = true;
        self.buffer.clear();
    }
}

fn parse_line_bytes(raw: &[u8]) -> Option<StreamFrame> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    if raw.is_empty() {
        return None;
    }
    let line = String::from_utf8_lossy(raw);
    StreamFrame::parse_line(&line)
}
