use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

pub const DEFAULT_LOG_LINES: usize = 2000;

/// Rolling text log of a session: received lines plus `> sent` and
/// `! Not connected` markers.
#[derive(Debug, Clone)]
pub struct LogBook {
    lines: VecDeque<String>,
    limit: usize,
}

impl LogBook {
    pub fn new(limit: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(limit.min(DEFAULT_LOG_LINES)),
            limit: limit.max(1),
        }
    }

    pub fn append(&mut self, line: impl Into<String>) {
        if self.lines.len() == self.limit {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn sent(&mut self, text: &str) {
        self.append(format!("> {}", text.trim()));
    }

    pub fn not_connected(&mut self) {
        self.append("! Not connected");
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn write_to(&self, mut w: impl Write) -> io::Result<()> {
        for line in &self.lines {
            writeln!(w, "{line}")?;
        }
        w.flush()
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        self.write_to(BufWriter::new(File::create(path)?))
    }
}

impl Default for LogBook {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_LINES)
    }
}
