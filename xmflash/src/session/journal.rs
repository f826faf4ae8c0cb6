//! Timestamped, directional session log.
//!
//! Every byte the host writes or the device returns during a session ends up
//! here, together with host-side status notes. The journal is handed back to
//! the caller inside the transfer/test result.

use chrono::{DateTime, Local};
use log::debug;
use std::fmt;

/// Direction of a log entry relative to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Direction {
    /// Written by (or noted on) the host side.
    Sent,
    /// Received from the device.
    Received,
}

impl Direction {
    /// Arrow marker used in rendered logs.
    pub const fn marker(self) -> &'static str {
        match self {
            Self::Sent => "SEND-->",
            Self::Received => "RECV<--",
        }
    }
}

/// One line of the session log.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LogEntry {
    /// Local wall-clock time the entry was recorded.
    pub timestamp: DateTime<Local>,
    /// Sent or received.
    pub direction: Direction,
    /// Entry text.
    pub text: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.direction.marker(),
            self.text
        )
    }
}

/// Append-only list of log entries.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Vec<LogEntry>,
}

impl Journal {
    /// Create an empty journal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn push(&mut self, direction: Direction, text: impl Into<String>) {
        let text = text.into();
        debug!("{} {text}", direction.marker());
        self.entries.push(LogEntry {
            timestamp: Local::now(),
            direction,
            text,
        });
    }

    /// Append a host-side entry.
    pub fn sent(&mut self, text: impl Into<String>) {
        self.push(Direction::Sent, text);
    }

    /// Append a device-side entry.
    pub fn received(&mut self, text: impl Into<String>) {
        self.push(Direction::Received, text);
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been logged yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the journal as newline-separated text.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Consume the journal, returning its entries.
    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_keeps_order_and_direction() {
        let mut journal = Journal::new();
        journal.sent("x 160000");
        journal.received("Receiving XModem");

        assert_eq!(journal.len(), 2);
        assert_eq!(journal.entries()[0].direction, Direction::Sent);
        assert_eq!(journal.entries()[1].direction, Direction::Received);
        assert_eq!(journal.entries()[1].text, "Receiving XModem");
    }

    #[test]
    fn test_render_uses_direction_markers() {
        let mut journal = Journal::new();
        journal.sent("hello");
        journal.received("world");

        let rendered = journal.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("SEND--> hello"));
        assert!(lines[1].ends_with("RECV<-- world"));
    }

    #[test]
    fn test_empty_journal_renders_empty() {
        let journal = Journal::new();
        assert!(journal.is_empty());
        assert_eq!(journal.render(), "");
    }
}
