use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Rx,
    Tx,
}

#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    /// Offset from the start of the session.
    pub offset: Duration,
    pub direction: Direction,
    pub text: String,
}

/// Bounded record of a console session: lines sent and frames received,
/// tagged with their offset from session start.
pub struct Transcript {
    started: Instant,
    entries: Vec<TranscriptEntry>,
    max_entries: usize,
}

impl Transcript {
    pub fn new(max_entries: usize) -> Self {
        Self {
            started: Instant::now(),
            entries: Vec::new(),
            max_entries,
        }
    }

    /// Record one line and return it rendered for display. The oldest entry
    /// is dropped once the capacity is reached.
    pub fn record(&mut self, direction: Direction, text: impl Into<String>) -> String {
        let entry = TranscriptEntry {
            offset: self.started.elapsed(),
            direction,
            text: text.into(),
        };
        let line = Self::render(&entry);

        self.entries.push(entry);
        if self.entries.len() > self.max_entries {
            self.entries.remove(0);
        }
        line
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// The whole session, one rendered line per entry.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&Self::render(entry));
            out.push('\n');
        }
        out
    }

    pub fn render(entry: &TranscriptEntry) -> String {
        let tag = match entry.direction {
            Direction::Rx => "RX",
            Direction::Tx => "TX",
        };
        format!("[{:8.3}] {}: {}", entry.offset.as_secs_f64(), tag, entry.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_renders_direction_and_text() {
        let mut transcript = Transcript::new(8);

        let line = transcript.record(Direction::Rx, "hello");
        assert!(line.contains("RX: hello"), "got {line:?}");
        assert_eq!(transcript.entries().len(), 1);
    }

    #[test]
    fn capacity_is_bounded() {
        let mut transcript = Transcript::new(3);
        for i in 0..5 {
            transcript.record(Direction::Tx, format!("line {i}"));
        }

        assert_eq!(transcript.entries().len(), 3);
        assert_eq!(transcript.entries()[0].text, "line 2");
        assert_eq!(transcript.entries()[2].text, "line 4");
    }

    #[test]
    fn to_text_lists_every_entry() {
        let mut transcript = Transcript::new(8);
        transcript.record(Direction::Tx, "smile");
        transcript.record(Direction::Rx, "Received: smile");

        let text = transcript.to_text();
        assert!(text.contains("TX: smile"));
        assert!(text.contains("RX: Received: smile"));
        assert_eq!(text.lines().count(), 2);

        transcript.clear();
        assert!(transcript.is_empty());
    }
}
