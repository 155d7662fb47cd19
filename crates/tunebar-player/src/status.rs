//! Player status stream parsing.
//!
//! The player reports progress as text lines of the form `position duration`
//! (seconds, floating point). Lines may be split across reads, so bytes are
//! buffered per stream until a terminator (`\n` or `\r`) arrives.

/// Longest unterminated line kept before the buffer is dropped.
const MAX_PENDING_BYTES: usize = 4096;

/// Parse `"<position> <duration>"`. Trailing tokens are ignored.
pub fn parse_status_line(line: &str) -> Option<(f32, f32)> {
    let mut parts = line.split_whitespace();
    let position = parts.next()?.parse::<f32>().ok()?;
    let duration = parts.next()?.parse::<f32>().ok()?;
    if position.is_finite() && duration.is_finite() {
        Some((position, duration))
    } else {
        None
    }
}

/// Reassembles complete lines from arbitrarily split chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    /// Set after an overflow; bytes are dropped until the next terminator.
    discarding: bool,
}

impl LineBuffer {
    /// Append `chunk` and call `on_line` for every completed, non-empty line.
    pub fn push(&mut self, chunk: &[u8], mut on_line: impl FnMut(&str)) {
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                if self.discarding {
                    self.discarding = false;
                    continue;
                }
                if !self.pending.is_empty() {
                    let line = String::from_utf8_lossy(&self.pending);
                    on_line(&line);
                    self.pending.clear();
                }
                continue;
            }
            if self.discarding {
                continue;
            }
            if self.pending.len() >= MAX_PENDING_BYTES {
                tracing::debug!(bytes = self.pending.len(), "dropping oversized status line");
                self.pending.clear();
                self.discarding = true;
                continue;
            }
            self.pending.push(byte);
        }
    }

    /// Bytes of the current unterminated line.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Position and duration of the running song as last reported by the player.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Progress {
    position: f32,
    duration: f32,
    parsed_lines: u32,
    unparsed_lines: u32,
}

impl Progress {
    /// Start a song with the catalog-declared duration.
    pub fn new(duration_secs: u32) -> Self {
        Self {
            duration: duration_secs as f32,
            ..Self::default()
        }
    }

    /// Apply one status line; returns `true` when position/duration changed hands.
    pub fn feed_line(&mut self, line: &str) -> bool {
        match parse_status_line(line) {
            Some((position, duration)) => {
                self.position = position;
                self.duration = duration;
                self.parsed_lines = self.parsed_lines.saturating_add(1);
                true
            }
            None => {
                self.unparsed_lines = self.unparsed_lines.saturating_add(1);
                false
            }
        }
    }

    pub fn position(&self) -> f32 {
        self.position
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn played_secs(&self) -> u32 {
        secs(self.position)
    }

    pub fn duration_secs(&self) -> u32 {
        secs(self.duration)
    }

    pub fn parsed_lines(&self) -> u32 {
        self.parsed_lines
    }

    pub fn unparsed_lines(&self) -> u32 {
        self.unparsed_lines
    }
}

fn secs(value: f32) -> u32 {
    if value.is_finite() && value > 0.0 {
        value as u32
    } else {
        0
    }
}
