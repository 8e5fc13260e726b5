//! Newline framing for stream transports.

/// Splits an arbitrary chunked byte stream into newline-terminated lines.
///
/// Bytes after the last newline are held until a later chunk completes the
/// line. There is no line-length cap. Splitting happens on raw bytes, which
/// is safe for UTF-8 because `\n` never occurs inside a multi-byte sequence.
#[derive(Debug, Default)]
pub struct LineFramer {
    buf: Vec<u8>,
    /// Prefix of `buf` already known to hold no newline.
    scanned: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `chunk` and return every line it completes, in order, without
    /// the terminating newline.
    ///
    /// Only the newly appended bytes are searched, so a long line arriving in
    /// many small chunks costs time linear in its length.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') {
            let end = self.scanned + offset;
            lines.push(String::from_utf8_lossy(&self.buf[start..end]).into_owned());
            start = end + 1;
            self.scanned = start;
        }

        self.buf.drain(..start);
        self.scanned = self.buf.len();
        lines
    }

    /// Bytes of the trailing partial line currently held.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}
