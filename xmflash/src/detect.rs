//! Text markers in device output.
//!
//! Device output is accumulated into an append-only text buffer; each
//! detector is a pure function over text, so flags can be tested without a
//! live link. Scanning is incremental: only text appended since the last scan
//! is examined, plus a short overlap so a marker split across chunks is
//! still found.

use regex::Regex;
use std::sync::LazyLock;

use crate::protocol::xmodem::{control, control_name};

/// Printed by the boot monitor once XModem receive mode is active.
pub const MODE_ENTRY_PHRASE: &str = "Receiving XMod";

/// Echo of the execute command.
pub const GOTO_MARKER: &str = "Goto";

/// Appears in the MAC address line of the test firmware banner.
pub const MAC_MARKER: &str = "mac";

/// Printed when RF calibration has finished.
pub const CALIBRATION_MARKER: &str = "misc calib single end";

/// Bytes of already-scanned text re-examined on the next scan. Covers the
/// longest fixed marker and a version string split across chunks.
pub const SCAN_OVERLAP: usize = 32;

#[allow(clippy::unwrap_used)] // Static pattern
static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"v\d+\.").unwrap());

/// Mode-entry confirmation phrase present.
pub fn has_mode_entry(buffer: &str) -> bool {
    buffer.contains(MODE_ENTRY_PHRASE)
}

/// At least one ready-signal character (`C`) present.
pub fn has_ready_signal(buffer: &str) -> bool {
    buffer.bytes().any(|b| b == control::C)
}

/// Execute-command echo present.
pub fn has_goto(buffer: &str) -> bool {
    buffer.contains(GOTO_MARKER)
}

/// MAC information present.
pub fn has_mac(buffer: &str) -> bool {
    buffer.contains(MAC_MARKER)
}

/// Firmware version string (`v<digits>.`) present.
pub fn has_version(buffer: &str) -> bool {
    VERSION_RE.is_match(buffer)
}

/// Calibration-complete marker present.
pub fn has_calibration_end(buffer: &str) -> bool {
    buffer.contains(CALIBRATION_MARKER)
}

/// Markers observed during a session. Flags only ever go from false to true.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DetectionFlags {
    /// "Receiving XModem" seen.
    pub mode_entry: bool,
    /// `C` ready signal seen.
    pub ready_signal: bool,
    /// "Goto" echo seen.
    pub goto_echo: bool,
    /// MAC line seen.
    pub mac: bool,
    /// Version string seen.
    pub version: bool,
    /// Calibration finished.
    pub calibration_end: bool,
}

impl DetectionFlags {
    /// Run the detectors whose flag is still clear against `text`.
    pub fn update(&mut self, text: &str) {
        self.mode_entry = self.mode_entry || has_mode_entry(text);
        self.ready_signal = self.ready_signal || has_ready_signal(text);
        self.goto_echo = self.goto_echo || has_goto(text);
        self.mac = self.mac || has_mac(text);
        self.version = self.version || has_version(text);
        self.calibration_end = self.calibration_end || has_calibration_end(text);
    }

    /// Scan whatever `buffer` gained since the previous scan.
    pub fn scan(&mut self, buffer: &mut TextBuffer) {
        self.update(buffer.take_unscanned(SCAN_OVERLAP));
    }

    /// Fold in flags observed by another stage.
    pub fn merge(&mut self, other: Self) {
        self.mode_entry |= other.mode_entry;
        self.ready_signal |= other.ready_signal;
        self.goto_echo |= other.goto_echo;
        self.mac |= other.mac;
        self.version |= other.version;
        self.calibration_end |= other.calibration_end;
    }

    /// Markers the validator requires: MAC, version and calibration end.
    pub fn all_required(&self) -> bool {
        self.mac && self.version && self.calibration_end
    }

    /// Human-readable Yes/No summary lines.
    pub fn summary(&self) -> Vec<String> {
        let yes_no = |v: bool| if v { "Yes" } else { "No" };
        vec![
            format!("  - Goto command response: {}", yes_no(self.goto_echo)),
            format!("  - MAC address: {}", yes_no(self.mac)),
            format!("  - Firmware version: {}", yes_no(self.version)),
            format!("  - Calibration completed: {}", yes_no(self.calibration_end)),
        ]
    }
}

/// Growing text buffer fed with raw link chunks.
///
/// Invalid UTF-8 is replaced; an incomplete multi-byte suffix is held back
/// until the next chunk completes it.
#[derive(Debug, Default)]
pub struct TextBuffer {
    text: String,
    pending: Vec<u8>,
    scanned: usize,
}

impl TextBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk, returning the newly decoded text.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let decoded = drain_utf8_lossy(&mut self.pending);
        self.text.push_str(&decoded);
        decoded
    }

    /// Everything decoded so far.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Text appended since the previous call, preceded by up to `overlap`
    /// bytes of text that call already returned.
    pub fn take_unscanned(&mut self, overlap: usize) -> &str {
        let mut start = self.scanned.saturating_sub(overlap);
        while !self.text.is_char_boundary(start) {
            start -= 1;
        }
        self.scanned = self.text.len();
        &self.text[start..]
    }
}

/// Drain buffered bytes into text without stalling on invalid bytes.
///
/// - Valid UTF-8 is emitted as-is.
/// - Invalid byte sequences emit the replacement char `�` and continue.
/// - Incomplete UTF-8 suffix is kept in `buffer` for the next read.
pub fn drain_utf8_lossy(buffer: &mut Vec<u8>) -> String {
    let mut output = String::new();

    loop {
        match std::str::from_utf8(buffer) {
            Ok(valid) => {
                output.push_str(valid);
                buffer.clear();
                break;
            },
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                if valid_up_to > 0 {
                    if let Ok(valid) = std::str::from_utf8(&buffer[..valid_up_to]) {
                        output.push_str(valid);
                    }
                }

                match err.error_len() {
                    Some(invalid_len) => {
                        output.push('�');
                        let drain_to = valid_up_to.saturating_add(invalid_len).min(buffer.len());
                        buffer.drain(..drain_to);
                    },
                    None => {
                        if valid_up_to > 0 {
                            buffer.drain(..valid_up_to);
                        }
                        break;
                    },
                }
            },
        }
    }

    output
}

/// Render a received chunk for the session log.
///
/// Plain text is trimmed; chunks carrying protocol control bytes are shown
/// token by token (`ACK`, `NAK`, `0x7F`, text runs). Returns `None` when the
/// chunk is only whitespace.
pub fn describe_inbound(chunk: &[u8]) -> Option<String> {
    let is_binary = std::str::from_utf8(chunk).is_err()
        || chunk
            .iter()
            .any(|b| b.is_ascii_control() && !b.is_ascii_whitespace());

    if !is_binary {
        let text = String::from_utf8_lossy(chunk);
        let trimmed = text.trim();
        return (!trimmed.is_empty()).then(|| trimmed.to_string());
    }

    let mut tokens: Vec<String> = Vec::new();
    let mut run = String::new();
    for &b in chunk {
        if b.is_ascii_graphic() || b == b' ' {
            run.push(char::from(b));
            continue;
        }
        if !run.trim().is_empty() {
            tokens.push(run.trim().to_string());
        }
        run.clear();
        if b.is_ascii_whitespace() {
            continue;
        }
        tokens.push(control_name(b).map_or_else(|| format!("0x{b:02X}"), str::to_string));
    }
    if !run.trim().is_empty() {
        tokens.push(run.trim().to_string());
    }

    (!tokens.is_empty()).then(|| tokens.join(" "))
}
