//! Line framing
//!
//! Splits a byte stream into `\n`-terminated text lines. Bytes are buffered
//! until a terminator arrives, so a line (or a multi-byte character) split over
//! several reads comes out whole. Invalid UTF-8 becomes U+FFFD.

/// Accumulates bytes and yields complete lines
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    /// Create an empty framer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every line they complete, in order.
    ///
    /// The terminator and one trailing `\r` are removed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let mut frame = &self.buffer[start..end];
            if let Some(stripped) = frame.strip_suffix(b"\r") {
                frame = stripped;
            }
            lines.push(String::from_utf8_lossy(frame).into_owned());
            start = end + 1;
        }
        self.buffer.drain(..start);
        lines
    }

    /// Bytes received after the last terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial line
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
