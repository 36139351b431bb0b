//! Per-source line extraction over a fixed-size read buffer.

use error::Result;

/// One merged file's buffer state.
///
/// The buffer is split by three offsets, always ordered
/// `0 <= start <= end <= length <= capacity`:
///
/// * `[0, start)` has already been written to the output,
/// * `[start, end)` is the current line (the merge candidate),
/// * `[end, length)` has been read but not yet scanned for newlines.
///
/// A line is any byte run up to and including a newline; a terminal run
/// without one is treated as a final, possibly truncated, line. The actual
/// reading is done by the caller-supplied fill function so the same type
/// serves both the io_uring and the blocking reader.
pub struct Source {
    buffer: Vec<u8>,
    length: usize,
    start: usize,
    end: usize,
    path: String,
}

impl Source {
    /// `capacity` must be at least twice the fill granularity: a compacted
    /// unfinished line (at most one read long, since it contains no newline)
    /// plus one full read must fit.
    pub fn new(path: &str, capacity: usize) -> Source {
        Source {
            buffer: vec![0; capacity],
            length: 0,
            start: 0,
            end: 0,
            path: path.to_string(),
        }
    }

    /// The name the file was opened by, byte-for-byte as the caller gave it.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The current line: complete when it ends with `\n`, otherwise a
    /// truncated line waiting for a refill (or for the synthesised final
    /// newline).
    pub fn current_line(&self) -> &[u8] {
        &self.buffer[self.start..self.end]
    }

    /// Consume the current line and look for the next one.
    ///
    /// Returns true if another complete line was already in the buffer.
    /// Returns false when more bytes are needed; the unscanned tail (which
    /// cannot contain a newline) becomes the current, incomplete line so
    /// that a refill's compaction preserves it.
    pub fn advance(&mut self) -> bool {
        self.start = self.end;
        let newline_at = self.buffer[self.end..self.length]
            .iter()
            .position(|&byte| byte == b'\n');
        match newline_at {
            Some(at) => {
                self.end += at + 1;
                true
            }
            None => {
                self.end = self.length;
                false
            }
        }
    }

    /// Move the unfinished line to the front of the buffer and read more
    /// bytes after it.
    ///
    /// Returns false only at end of file with nothing left in the buffer.
    /// Otherwise the current line is extended to the first newline among the
    /// new bytes, or to everything read if there is none (truncated; the
    /// caller must flush and retry).
    ///
    /// Compaction moves bytes, so every previously handed-out view of this
    /// buffer must have been flushed before calling this.
    pub fn refill<F>(&mut self, mut fill: F) -> Result<bool>
    where
        F: FnMut(&mut [u8]) -> Result<usize>,
    {
        if self.start != 0 {
            let (start, end) = (self.start, self.end);
            self.buffer.copy_within(start..end, 0);
            self.end -= start;
            self.start = 0;
        }

        let more = fill(&mut self.buffer[self.end..])?;
        self.length = self.end + more;
        if self.length == 0 {
            // end of file and nothing left in the buffer
            return Ok(false);
        }

        let newline_at = self.buffer[self.end..self.length]
            .iter()
            .position(|&byte| byte == b'\n');
        self.end = match newline_at {
            Some(at) => self.end + at + 1,
            None => self.length,
        };
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use error::Result;

    /// A fill function that serves `data` in chunks of at most `chunk`
    /// bytes, like a file read with a small buffer would.
    fn feed<'a>(data: &'a [u8], chunk: usize) -> impl FnMut(&mut [u8]) -> Result<usize> + 'a {
        let mut consumed = 0;
        move |dest: &mut [u8]| {
            let mut take = data.len() - consumed;
            if take > chunk {
                take = chunk;
            }
            if take > dest.len() {
                take = dest.len();
            }
            dest[..take].copy_from_slice(&data[consumed..consumed + take]);
            consumed += take;
            Ok(take)
        }
    }

    #[test]
    fn reads_lines_in_order() {
        let mut fill = feed(b"alpha\nbeta\ngamma\n", 64);
        let mut source = Source::new("input", 32);

        assert!(source.refill(&mut fill).unwrap());
        assert_eq!(source.current_line(), b"alpha\n");
        assert!(source.advance());
        assert_eq!(source.current_line(), b"beta\n");
        assert!(source.advance());
        assert_eq!(source.current_line(), b"gamma\n");
        assert!(!source.advance());
        assert_eq!(source.current_line(), b"");
        assert!(!source.refill(&mut fill).unwrap());
    }

    #[test]
    fn empty_file_yields_nothing() {
        let mut fill = feed(b"", 8);
        let mut source = Source::new("empty", 16);
        assert!(!source.refill(&mut fill).unwrap());
    }

    #[test]
    fn truncated_line_is_completed_by_retrying_refill() {
        // chunk size 4 splits "longline\n" across three reads; retrying
        // refill without advancing grows the current line in place
        let mut fill = feed(b"longline\nx\n", 4);
        let mut source = Source::new("input", 16);

        assert!(source.refill(&mut fill).unwrap());
        // no newline yet: the whole read is a truncated current line
        assert_eq!(source.current_line(), b"long");

        assert!(source.refill(&mut fill).unwrap());
        assert_eq!(source.current_line(), b"longline");

        assert!(source.refill(&mut fill).unwrap());
        assert_eq!(source.current_line(), b"longline\n");
        assert!(source.advance());
        assert_eq!(source.current_line(), b"x\n");
    }

    #[test]
    fn tail_survives_compaction() {
        // one read gives a complete line plus the start of the next
        let mut fill = feed(b"one\ntwo three four\n", 8);
        let mut source = Source::new("input", 16);

        assert!(source.refill(&mut fill).unwrap());
        assert_eq!(source.current_line(), b"one\n");
        // "two " is buffered but has no newline yet
        assert!(!source.advance());
        assert_eq!(source.current_line(), b"two ");

        // the refill moves the tail to the front, byte for byte
        assert!(source.refill(&mut fill).unwrap());
        assert_eq!(source.current_line(), b"two three fo");
        assert!(source.refill(&mut fill).unwrap());
        assert_eq!(source.current_line(), b"two three four\n");
        assert!(!source.advance());
    }

    #[test]
    fn consumed_chunk_is_not_reread() {
        // the flushed-chunk protocol for lines longer than the buffer:
        // advance consumes the staged chunk, refill starts over at the front
        let mut fill = feed(b"0123456789abcdef!\n", 8);
        let mut source = Source::new("input", 8);

        assert!(source.refill(&mut fill).unwrap());
        assert_eq!(source.current_line(), b"01234567");
        assert!(!source.advance());
        assert!(source.refill(&mut fill).unwrap());
        assert_eq!(source.current_line(), b"89abcdef");
        assert!(!source.advance());
        assert!(source.refill(&mut fill).unwrap());
        assert_eq!(source.current_line(), b"!\n");
        assert!(!source.advance());
        assert!(!source.refill(&mut fill).unwrap());
    }

    #[test]
    fn file_without_final_newline_leaves_truncated_line() {
        let mut fill = feed(b"done\nrest", 16);
        let mut source = Source::new("input", 16);

        assert!(source.refill(&mut fill).unwrap());
        assert_eq!(source.current_line(), b"done\n");
        assert!(source.advance());
        assert_eq!(source.current_line(), b"rest");
        assert!(!source.advance());
        // end of file: refill keeps the residue as a truncated current line
        assert!(source.refill(&mut fill).unwrap());
        assert_eq!(source.current_line(), b"rest");
        assert!(!source.advance());
        assert!(!source.refill(&mut fill).unwrap());
    }
}
