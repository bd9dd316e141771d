// src/io/serial/framer.rs
//
// Newline framing for the inbound serial stream.

/// Longest line kept before a forced split. A 300-LED strip is ~1.8 KB per line.
pub const DEFAULT_MAX_LINE: usize = 4096;

/// Splits a byte stream into text lines on `\n` or `\r`.
///
/// slcan adapters terminate with a bare `\r`; a `\r\n` pair yields one line since empty
/// lines are dropped. Lines are trimmed.
/// A line that reaches `max_length` without a terminator is emitted as-is.
pub struct LineFramer {
    buffer: Vec<u8>,
    max_length: usize,
}

impl LineFramer {
    pub fn new(max_length: usize) -> Self {
        LineFramer {
            buffer: Vec::with_capacity(256),
            max_length: max_length.max(1),
        }
    }

    /// Feed received bytes, returning every line completed by them.
    pub fn feed(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();

        for &byte in data {
            if byte == b'\n' || byte == b'\r' {
                let raw: Vec<u8> = self.buffer.drain(..).collect();
                if let Some(line) = Self::finish(&raw) {
                    lines.push(line);
                }
                continue;
            }

            self.buffer.push(byte);

            if self.buffer.len() >= self.max_length {
                let raw: Vec<u8> = self.buffer.drain(..).collect();
                if let Some(line) = Self::finish(&raw) {
                    lines.push(line);
                }
            }
        }

        lines
    }

    /// Emit whatever is buffered as a final, unterminated line.
    pub fn flush(&mut self) -> Option<String> {
        let raw: Vec<u8> = self.buffer.drain(..).collect();
        Self::finish(&raw)
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    fn finish(raw: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim();
        if line.is_empty() {
            None
        } else {
            Some(line.to_string())
        }
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        LineFramer::new(DEFAULT_MAX_LINE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_on_newline() {
        let mut framer = LineFramer::default();
        let lines = framer.feed(b"LED:1:FF0000\r\nBoot ok\n");
        assert_eq!(lines, vec!["LED:1:FF0000", "Boot ok"]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn test_split_on_bare_carriage_return() {
        let mut framer = LineFramer::default();
        let lines = framer.feed(b"t1002AABB\rt1010\r\r");
        assert_eq!(lines, vec!["t1002AABB", "t1010"]);
    }

    #[test]
    fn test_line_split_across_reads() {
        let mut framer = LineFramer::default();
        assert!(framer.feed(b"LED:2:FF00").is_empty());
        let lines = framer.feed(b"00008000\n");
        assert_eq!(lines, vec!["LED:2:FF0000008000"]);
    }

    #[test]
    fn test_empty_lines_dropped() {
        let mut framer = LineFramer::default();
        assert!(framer.feed(b"\n\r\n  \n").is_empty());
    }

    #[test]
    fn test_force_split_at_max_length() {
        let mut framer = LineFramer::new(4);
        let lines = framer.feed(b"ABCDEF\n");
        assert_eq!(lines, vec!["ABCD", "EF"]);
    }

    #[test]
    fn test_flush_partial() {
        let mut framer = LineFramer::default();
        framer.feed(b"tail");
        assert_eq!(framer.flush(), Some("tail".to_string()));
        assert_eq!(framer.flush(), None);
    }
}
