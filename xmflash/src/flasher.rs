//! Download and test pipelines.
//!
//! These entry points never return `Err` for device or link failures: every
//! fatal condition is written to the session log, the link is closed, and a
//! failure result carrying the whole log is returned.

use std::path::Path;

use log::{error, info};

use crate::detect::DetectionFlags;
use crate::error::{Error, Result};
use crate::handshake::{self, HandshakeConfig};
use crate::port::Port;
use crate::protocol::transmitter::{Transmitter, TransmitterConfig};
use crate::sequencer::{self, SequencerConfig, TestCase, TestResult};
use crate::session::{LogEntry, Session};
use crate::validate::{self, ValidationReport, ValidatorConfig, Warning};

#[cfg(feature = "native")]
use crate::{
    port::{LinkConfig, NativePort},
    session::{CancelToken, Journal},
};

/// Settings for every stage of a download.
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Mode-entry handshake.
    pub handshake: HandshakeConfig,
    /// XModem transmitter.
    pub transmitter: TransmitterConfig,
    /// Post-transfer validation.
    pub validator: ValidatorConfig,
}

/// Result of a download.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TransferResult {
    /// Firmware was transferred and acknowledged.
    pub success: bool,
    /// One-line summary.
    pub outcome: String,
    /// Non-fatal conditions.
    pub warnings: Vec<Warning>,
    /// Packets acknowledged by the device.
    pub packets_sent: usize,
    /// Markers seen during handshake and validation.
    pub detection: DetectionFlags,
    /// Fatal error message, if the download failed.
    pub error: Option<String>,
    /// The download was stopped through the cancel token.
    pub interrupted: bool,
    /// Session log.
    pub log: Vec<LogEntry>,
}

impl TransferResult {
    fn failed(err: &Error, log: Vec<LogEntry>) -> Self {
        Self {
            success: false,
            outcome: format!("Firmware download failed: {err}"),
            warnings: Vec::new(),
            packets_sent: 0,
            detection: DetectionFlags::default(),
            error: Some(err.to_string()),
            interrupted: matches!(err, Error::Interrupted),
            log,
        }
    }
}

/// Read a firmware image from disk.
pub fn load_firmware(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|source| Error::FirmwareRead {
        path: path.display().to_string(),
        source,
    })
}

/// What the download got through before it stopped.
#[derive(Default)]
struct Progress {
    packets_sent: usize,
    detection: DetectionFlags,
}

fn download_steps<P, F>(
    session: &mut Session<P>,
    firmware: &[u8],
    options: &DownloadOptions,
    on_progress: F,
    progress: &mut Progress,
) -> Result<ValidationReport>
where
    P: Port,
    F: FnMut(usize, usize),
{
    session.note(format!("Firmware size: {} bytes", firmware.len()));

    let flags = handshake::enter_receive_mode(session, &options.handshake)?;
    progress.detection.merge(flags);

    let mut transmitter = Transmitter::new(firmware, options.transmitter.clone());
    let sent = transmitter.run(session, on_progress);
    progress.packets_sent = transmitter.state().acknowledged_packets();
    sent?;
    session.note("Firmware download completed successfully");

    let report = validate::validate_boot(session, &options.validator)?;
    progress.detection.merge(report.flags);
    Ok(report)
}

/// Run handshake, transfer and validation on an open session.
///
/// `on_progress` receives `(bytes_acknowledged, total_bytes)`.
pub fn download_with_session<P, F>(
    mut session: Session<P>,
    firmware: &[u8],
    options: &DownloadOptions,
    on_progress: F,
) -> TransferResult
where
    P: Port,
    F: FnMut(usize, usize),
{
    let mut progress = Progress::default();
    let steps = download_steps(&mut session, firmware, options, on_progress, &mut progress);

    let result = match steps {
        Ok(report) => {
            let warnings: Vec<Warning> = report.warning().into_iter().collect();
            let outcome = if warnings.is_empty() {
                "Firmware downloaded successfully, device entered test mode"
            } else {
                "Firmware downloaded, device test mode not confirmed"
            };
            info!("{outcome}");
            TransferResult {
                success: true,
                outcome: outcome.to_string(),
                warnings,
                packets_sent: progress.packets_sent,
                detection: progress.detection,
                error: None,
                interrupted: false,
                log: Vec::new(),
            }
        },
        Err(e) => {
            error!("Firmware download failed: {e}");
            session.note(format!("Firmware download failed: {e}"));
            TransferResult {
                packets_sent: progress.packets_sent,
                detection: progress.detection,
                ..TransferResult::failed(&e, Vec::new())
            }
        },
    };

    session.close();
    let (_, journal) = session.into_parts();
    TransferResult {
        log: journal.into_entries(),
        ..result
    }
}

/// Run a command sequence on an open session.
pub fn run_tests_with_session<P: Port>(
    mut session: Session<P>,
    cases: &[TestCase],
    config: &SequencerConfig,
) -> TestResult {
    let result = sequencer::run_sequence(&mut session, cases, config);
    session.close();
    let (_, journal) = session.into_parts();
    TestResult {
        log: journal.into_entries(),
        ..result
    }
}

#[cfg(feature = "native")]
fn open_session(
    link: &LinkConfig,
    cancel: Option<CancelToken>,
) -> std::result::Result<Session<NativePort>, (Error, Vec<LogEntry>)> {
    match NativePort::open(link) {
        Ok(port) => {
            let session = Session::new(port);
            Ok(match cancel {
                Some(token) => session.with_cancel(token),
                None => session,
            })
        },
        Err(e) => {
            error!("{e}");
            let mut journal = Journal::new();
            journal.sent(e.to_string());
            Err((e, journal.into_entries()))
        },
    }
}

/// Open the serial link described by `link` and download `firmware`.
#[cfg(feature = "native")]
pub fn download_firmware<F>(
    link: &LinkConfig,
    firmware: &[u8],
    options: &DownloadOptions,
    cancel: Option<CancelToken>,
    on_progress: F,
) -> TransferResult
where
    F: FnMut(usize, usize),
{
    match open_session(link, cancel) {
        Ok(session) => download_with_session(session, firmware, options, on_progress),
        Err((e, log)) => TransferResult::failed(&e, log),
    }
}

/// Open the serial link described by `link` and run `cases`.
#[cfg(feature = "native")]
pub fn run_test_commands(
    link: &LinkConfig,
    cases: &[TestCase],
    config: &SequencerConfig,
    cancel: Option<CancelToken>,
) -> TestResult {
    match open_session(link, cancel) {
        Ok(session) => run_tests_with_session(session, cases, config),
        Err((e, log)) => TestResult::failure(e.to_string(), log),
    }
}
