use crate::Framer;
use core_types::Frame;

/// Default upper bound for a single line, in bytes (terminator included).
pub const DEFAULT_MAX_LINE_LEN: usize = 256;

/// Buffers input and emits a frame whenever a newline is encountered.
///
/// Frames keep their `\n` (and a preceding `\r`, if any); the decoder decides
/// what to trim. A line that grows past `max_len` without a terminator is
/// thrown away and counted, and the rest of that line up to the next `\n`
/// is skipped so the tail is not mistaken for a fresh frame.
pub struct LineFramer {
    buffer: Vec<u8>,
    max_len: usize,
    // Timestamp of the *first byte* currently in the buffer, so a completed
    // line carries the time it started arriving.
    start_timestamp_us: Option<u64>,
    skipping: bool,
    discarded: usize,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::with_max_len(DEFAULT_MAX_LINE_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        let max_len = max_len.max(1);
        Self {
            buffer: Vec::with_capacity(max_len.min(1024)),
            max_len,
            start_timestamp_us: None,
            skipping: false,
            discarded: 0,
        }
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer for LineFramer {
    fn push(&mut self, bytes: &[u8], timestamp_us: u64) -> Vec<Frame> {
        let mut frames = Vec::new();

        for &b in bytes {
            if self.skipping {
                self.discarded += 1;
                if b == b'\n' {
                    self.skipping = false;
                }
                continue;
            }

            if self.buffer.is_empty() {
                self.start_timestamp_us = Some(timestamp_us);
            }
            self.buffer.push(b);

            if b == b'\n' {
                let ts = self.start_timestamp_us.take().unwrap_or(timestamp_us);
                frames.push(Frame::new(std::mem::take(&mut self.buffer), ts));
            } else if self.buffer.len() >= self.max_len {
                // Oversized: drop what we have and resync on the next newline.
                self.discarded += self.buffer.len();
                self.buffer.clear();
                self.start_timestamp_us = None;
                self.skipping = true;
            }
        }

        frames
    }

    fn take_discarded(&mut self) -> usize {
        std::mem::take(&mut self.discarded)
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.start_timestamp_us = None;
        self.skipping = false;
        self.discarded = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_simple() {
        let mut framer = LineFramer::new();
        let frames = framer.push(b"STYLE:1\nCONFIRM\n", 100);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].bytes, b"STYLE:1\n");
        assert_eq!(frames[0].timestamp_us, 100);
        assert_eq!(frames[1].bytes, b"CONFIRM\n");
    }

    #[test]
    fn test_lines_split() {
        let mut framer = LineFramer::new();
        // Chunk 1: "STY" at T=100
        let f1 = framer.push(b"STY", 100);
        assert!(f1.is_empty());

        // Chunk 2: "LE:3\n" at T=200
        let f2 = framer.push(b"LE:3\n", 200);
        assert_eq!(f2.len(), 1);
        assert_eq!(f2[0].bytes, b"STYLE:3\n");
        // Keeps the timestamp of the START of the frame (T=100)
        assert_eq!(f2[0].timestamp_us, 100);
    }

    #[test]
    fn test_crlf_handling() {
        // Break on \n only; \r is preserved for the decoder to trim.
        let mut framer = LineFramer::new();
        let f = framer.push(b"CONFIRM\r\n", 100);
        assert_eq!(f[0].bytes, b"CONFIRM\r\n");
    }

    #[test]
    fn test_oversized_line_is_discarded_and_resyncs() {
        let mut framer = LineFramer::with_max_len(8);
        let frames = framer.push(b"0123456789ABC\nCONFIRM\n", 10);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].bytes, b"CONFIRM\n");
        // 8 buffered bytes + "89ABC\n" skipped while resyncing
        assert_eq!(framer.take_discarded(), 14);
        assert_eq!(framer.take_discarded(), 0);
    }

    #[test]
    fn test_reset_clears_partial_line() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"STYLE:", 1).is_empty());
        framer.reset();
        let frames = framer.push(b"CONFIRM\n", 2);
        assert_eq!(frames[0].bytes, b"CONFIRM\n");
        assert_eq!(frames[0].timestamp_us, 2);
    }
}
