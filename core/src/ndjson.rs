/// Longest line accepted before it is dropped.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Splits a chunked byte stream into newline-terminated lines.
///
/// Bytes are buffered raw and only decoded once a full line is available, so a
/// chunk boundary that falls inside a line, or inside a multi-byte UTF-8
/// sequence, never produces a truncated line. A line longer than the limit is
/// dropped whole, up to and including its terminator.
#[derive(Debug)]
pub struct LineDecoder {
    buf: Vec<u8>,
    limit: usize,
    /// Inside an oversized line whose start was already dropped.
    discarding: bool,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            discarding: false,
        }
    }

    /// Feed one chunk and return every line it completed, without terminators.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut chunk = chunk;
        if self.discarding {
            match chunk.iter().position(|byte| *byte == b'\n') {
                Some(offset) => {
                    self.discarding = false;
                    chunk = &chunk[offset + 1..];
                }
                None => return Vec::new(),
            }
        }

        let scanned = self.buf.len();
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        // Bytes before `scanned` were already searched on a previous call.
        let mut cursor = scanned;
        while let Some(offset) = self.buf[cursor..].iter().position(|byte| *byte == b'\n') {
            let end = cursor + offset;
            let line = &self.buf[start..end];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.len() > self.limit {
                tracing::warn!(bytes = line.len(), limit = self.limit, "dropping oversized stream line");
            } else {
                lines.push(String::from_utf8_lossy(line).into_owned());
            }
            start = end + 1;
            cursor = start;
        }
        self.buf.drain(..start);

        if self.buf.len() > self.limit {
            tracing::warn!(bytes = self.buf.len(), limit = self.limit, "dropping oversized stream line");
            self.buf.clear();
            self.discarding = true;
        }
        lines
    }

    /// Hand back an unterminated tail left when the stream ended, if any.
    pub fn finish(&mut self) -> Option<String> {
        self.discarding = false;
        if self.buf.is_empty() {
            return None;
        }
        let tail = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        Some(tail)
    }
}
