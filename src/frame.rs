/// Longest line kept before the framer gives up on it.
pub const MAX_LINE: usize = 4096;

/// Splits a byte stream into `\n`-terminated lines.
///
/// Partial lines are carried across `push` calls. A line that grows past
/// `max_len` is discarded up to and including its terminator.
#[derive(Debug)]
pub struct LineFramer {
    buf: Vec<u8>,
    max_len: usize,
    overflowing: bool,
    dropped: u64,
}

impl LineFramer {
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(256),
            max_len,
            overflowing: false,
            dropped: 0,
        }
    }

    /// Feed bytes; returns every line completed by them, without the `\n`.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        for &b in bytes {
            if b == b'\n' {
                if self.overflowing {
                    self.overflowing = false;
                } else {
                    lines.push(std::mem::take(&mut self.buf));
                }
                continue;
            }
            if self.overflowing {
                continue;
            }
            if self.buf.len() == self.max_len {
                self.buf.clear();
                self.overflowing = true;
                self.dropped += 1;
                continue;
            }
            self.buf.push(b);
        }
        lines
    }

    /// Forget any partial line, e.g. after the port was reopened.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.overflowing = false;
    }

    /// Bytes currently held for an unterminated line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Number of overlong lines discarded so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new(MAX_LINE)
    }
}

/// Best-effort UTF-8: invalid sequences are dropped, trailing whitespace
/// (including `\r`) is stripped.
pub fn line_text(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        text.push_str(chunk.valid());
    }
    text.truncate(text.trim_end().len());
    text
}
