//! Error types for xmflash.

use std::io;
use thiserror::Error;

/// Result type for xmflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for xmflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Link configuration rejected before opening the port.
    #[error("Invalid link configuration: {0}")]
    InvalidConfig(String),

    /// The link could not be opened with the requested settings.
    #[error("Failed to open {port}: {reason}")]
    LinkOpen {
        /// Port path or identifier.
        port: String,
        /// Reason reported by the backend.
        reason: String,
    },

    /// Firmware image could not be read.
    #[error("Failed to read firmware {path}: {source}")]
    FirmwareRead {
        /// Path of the image.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Device never confirmed XModem receive mode.
    #[error("Device did not respond to XModem mode entry command within {secs}s")]
    HandshakeTimeout {
        /// Handshake window in seconds.
        secs: u64,
    },

    /// Retry budget ran out while sending a packet.
    #[error("XModem transfer failed after all retries (packet {packet})")]
    RetriesExhausted {
        /// Packet number that could not be delivered.
        packet: u32,
    },

    /// Receiver sent CAN.
    #[error("Transfer cancelled by device")]
    DeviceCancelled,

    /// No acknowledgement after EOT.
    #[error("Timeout waiting for ACK after EOT")]
    EotTimeout,

    /// Overall transfer deadline exceeded.
    #[error("XModem transfer timeout after {secs} seconds")]
    SessionTimeout {
        /// Session deadline in seconds.
        secs: u64,
    },

    /// A scripted command produced no usable response line.
    #[error("Command {command} timeout with no response")]
    CommandTimeout {
        /// Command text (without line terminator).
        command: String,
    },

    /// Operation interrupted through the session cancel token.
    #[error("Operation interrupted")]
    Interrupted,
}

impl Error {
    /// Whether the error comes from the link itself rather than the device protocol.
    pub fn is_link_error(&self) -> bool {
        match self {
            Self::Io(_) | Self::InvalidConfig(_) | Self::LinkOpen { .. } => true,
            #[cfg(feature = "native")]
            Self::Serial(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::RetriesExhausted { packet: 7 };
        assert_eq!(
            err.to_string(),
            "XModem transfer failed after all retries (packet 7)"
        );

        let err = Error::CommandTimeout {
            command: "gpiob 0 0".into(),
        };
        assert_eq!(err.to_string(), "Command gpiob 0 0 timeout with no response");
    }

    #[test]
    fn test_link_error_classification() {
        let open = Error::LinkOpen {
            port: "/dev/ttyUSB0".into(),
            reason: "busy".into(),
        };
        assert!(open.is_link_error());
        assert!(!Error::DeviceCancelled.is_link_error());
        assert!(!Error::HandshakeTimeout { secs: 10 }.is_link_error());
    }
}
