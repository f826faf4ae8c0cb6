//! Post-transfer validation.
//!
//! After a completed transfer the device is told to jump to the new image
//! and its boot banner is scanned for the markers a healthy test firmware
//! prints. A missing marker is reported as a warning, never as an error.

use std::fmt;
use std::time::Duration;

use log::{info, warn};

use crate::detect::{DetectionFlags, TextBuffer};
use crate::error::Result;
use crate::port::Port;
use crate::session::Session;

/// Boot monitor command that executes the image at the load address.
pub const EXECUTE_COMMAND: &str = "g 160000";

/// Shortest accepted validation window, in ticks.
pub const MIN_WINDOW_TICKS: u64 = 5;

/// Longest accepted validation window, in ticks.
pub const MAX_WINDOW_TICKS: u64 = 60;

/// Validator timing.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Delay before the execute command.
    pub settle: Duration,
    /// Poll interval.
    pub tick: Duration,
    /// Number of ticks to wait; see [`ValidatorConfig::with_window`].
    pub window_ticks: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(1),
            tick: Duration::from_secs(1),
            window_ticks: MIN_WINDOW_TICKS,
        }
    }
}

impl ValidatorConfig {
    /// Set the window in ticks (seconds with the default tick), clamped to
    /// 5..=60.
    #[must_use]
    pub fn with_window(mut self, ticks: u64) -> Self {
        self.window_ticks = ticks.clamp(MIN_WINDOW_TICKS, MAX_WINDOW_TICKS);
        self
    }
}

/// Non-fatal condition attached to a successful transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Warning {
    /// Some required boot markers never appeared.
    PostValidationIncomplete {
        /// Names of the missing markers.
        missing: Vec<String>,
    },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PostValidationIncomplete { missing } => write!(
                f,
                "Not all critical information detected within timeout period (missing: {})",
                missing.join(", ")
            ),
        }
    }
}

/// Outcome of one validation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    /// Markers seen.
    pub flags: DetectionFlags,
    /// Ticks spent waiting.
    pub ticks: u64,
}

impl ValidationReport {
    /// Whether every required marker was seen.
    pub fn is_complete(&self) -> bool {
        self.flags.all_required()
    }

    /// Warning to attach to the transfer result, if any.
    pub fn warning(&self) -> Option<Warning> {
        if self.is_complete() {
            return None;
        }
        let missing = [
            (self.flags.mac, "MAC address"),
            (self.flags.version, "firmware version"),
            (self.flags.calibration_end, "calibration"),
        ]
        .into_iter()
        .filter(|(seen, _)| !seen)
        .map(|(_, name)| name.to_string())
        .collect();
        Some(Warning::PostValidationIncomplete { missing })
    }
}

/// Announcements for markers that became visible between two snapshots.
fn newly_detected(before: DetectionFlags, after: DetectionFlags) -> Vec<&'static str> {
    let mut found = Vec::new();
    if after.goto_echo && !before.goto_echo {
        found.push("Detected: Goto command response");
    }
    if after.mac && !before.mac {
        found.push("Detected: MAC address information");
    }
    if after.version && !before.version {
        found.push("Detected: Firmware version information");
    }
    if after.calibration_end && !before.calibration_end {
        found.push("Detected: Misc calibration completed");
    }
    found
}

/// Start the new image and scan its output.
pub fn validate_boot<P: Port>(
    session: &mut Session<P>,
    config: &ValidatorConfig,
) -> Result<ValidationReport> {
    session.note("Waiting for device to process firmware and reset");
    session.settle(config.settle)?;
    session.discard_input()?;
    session.note("Flushed serial port buffer before sending execute command");

    session.send_line(EXECUTE_COMMAND)?;
    session.note("Execute command sent, waiting for device response");

    let mut buffer = TextBuffer::new();
    let mut flags = DetectionFlags::default();
    let mut ticks = 0;

    while ticks < config.window_ticks {
        let before = flags;
        session.wait_for(config.tick, |chunk| {
            buffer.push(chunk);
            flags.scan(&mut buffer);
            flags.all_required().then_some(())
        })?;
        ticks += 1;

        for line in newly_detected(before, flags) {
            session.note(line);
        }
        if flags.all_required() {
            session.note("All critical information detected");
            break;
        }
        session.note(format!("Waiting... {ticks} ticks passed"));
    }

    let report = ValidationReport { flags, ticks };
    if report.is_complete() {
        info!("Device entered test mode");
        session.note("Device successfully entered test mode");
    } else {
        warn!("Boot markers incomplete after {ticks} ticks");
        session.note("Warning: Not all critical information detected within timeout period");
        session.note(
            "Firmware download may have completed, but device may not have entered test mode properly",
        );
    }
    session.note("Key information detected:");
    for line in flags.summary() {
        session.note(line);
    }

    Ok(report)
}
