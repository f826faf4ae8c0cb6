//! # xmflash
//!
//! A library for downloading firmware to boot-monitor based devices over a
//! serial link and checking them afterwards.
//!
//! This crate provides:
//!
//! - A link abstraction ([`Port`]) with a native `serialport` backend
//! - The XModem packet codec (CRC-16/XMODEM or 8-bit checksum)
//! - An XModem transmitter written as an explicit state machine
//! - The boot monitor handshake (`x 160000`) and post-transfer validation
//!   (`g 160000`)
//! - A command sequencer that grades device responses against expectations
//! - A timestamped session log returned with every result
//!
//! ## Features
//!
//! - `native` (default): Native serial port support
//! - `serde`: Serialization support for results and log entries
//!
//! ## Example
//!
//! ```rust,no_run
//! use xmflash::{DownloadOptions, LinkConfig, load_firmware};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let firmware = load_firmware("firmware.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let link = LinkConfig::new("/dev/ttyUSB0", 115200);
//!         let result = xmflash::download_firmware(
//!             &link,
//!             &firmware,
//!             &DownloadOptions::default(),
//!             None,
//!             |done, total| println!("{done}/{total}"),
//!         );
//!         for entry in &result.log {
//!             println!("{entry}");
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod detect;
pub mod error;
pub mod flasher;
pub mod handshake;
pub mod port;
pub mod protocol;
pub mod sequencer;
pub mod session;
pub mod validate;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use flasher::{download_firmware, run_test_commands};
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    detect::DetectionFlags,
    error::{Error, Result},
    flasher::{
        DownloadOptions, TransferResult, download_with_session, load_firmware,
        run_tests_with_session,
    },
    handshake::HandshakeConfig,
    port::{
        DataBits, LinkConfig, Parity, Port, PortEnumerator, PortInfo, StopBits, available_ports,
    },
    protocol::{ChecksumMode, TransmitterConfig},
    sequencer::{
        ExpectRule, SequencerConfig, TestCase, TestOutcome, TestResult, Verdict,
        parse_command_list,
    },
    session::{CancelToken, Direction, Journal, LogEntry, Session},
    validate::{ValidatorConfig, Warning},
};
