//! Boot monitor handshake: put the device into XModem receive mode.

use std::time::Duration;

use log::{debug, info};

use crate::detect::{DetectionFlags, TextBuffer};
use crate::error::{Error, Result};
use crate::port::Port;
use crate::session::Session;

/// Boot monitor command that starts an XModem receive at the load address.
pub const MODE_ENTRY_COMMAND: &str = "x 160000";

/// Handshake timing.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// How long to wait for the mode-entry markers.
    pub timeout: Duration,
    /// Delay after a successful handshake before the first packet.
    pub settle: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            settle: Duration::from_secs(1),
        }
    }
}

/// Send the mode-entry command and wait for the device to confirm.
///
/// Succeeds immediately once both the "Receiving XModem" phrase and a `C`
/// ready signal were seen. If only the phrase shows up, the handshake still
/// succeeds when the timeout elapses. Returns the markers observed.
pub fn enter_receive_mode<P: Port>(
    session: &mut Session<P>,
    config: &HandshakeConfig,
) -> Result<DetectionFlags> {
    session.discard_input()?;
    session.note("Flushed serial port buffer");

    debug!("Sending XModem mode entry command");
    session.send_line(MODE_ENTRY_COMMAND)?;

    let mut buffer = TextBuffer::new();
    let mut flags = DetectionFlags::default();
    let both = session.wait_for(config.timeout, |chunk| {
        buffer.push(chunk);
        flags.scan(&mut buffer);
        (flags.mode_entry && flags.ready_signal).then_some(())
    })?;

    if flags.mode_entry {
        session.note("Received XModem confirmation");
    }
    if flags.ready_signal {
        session.note("Received NAK characters, device ready for XModem transfer");
    }

    if both.is_none() {
        if !flags.mode_entry {
            let err = Error::HandshakeTimeout {
                secs: config.timeout.as_secs(),
            };
            session.note(err.to_string());
            return Err(err);
        }
        session.note("XModem confirmation received, proceeding with transfer");
    }

    info!("Device entered XModem receive mode");

    session.settle(config.settle)?;
    session.note(format!(
        "Waited {} ms for device to fully prepare",
        config.settle.as_millis()
    ));
    session.discard_input()?;
    session.note("Flushed serial port buffer again");

    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockPort;
    use crate::session::Direction;
    use std::time::Instant;

    fn fast_config() -> HandshakeConfig {
        HandshakeConfig {
            timeout: Duration::from_millis(80),
            settle: Duration::ZERO,
        }
    }

    #[test]
    fn test_both_markers_succeed_before_timeout() {
        let port = MockPort::scripted(vec![b"x 160000\r\nReceiving XModem...\r\nCCC".to_vec()]);
        let mut session = Session::new(port);
        let config = HandshakeConfig {
            timeout: Duration::from_secs(5),
            settle: Duration::ZERO,
        };

        let start = Instant::now();
        let flags = enter_receive_mode(&mut session, &config).unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(flags.mode_entry);
        assert!(flags.ready_signal);

        let (port, journal) = session.into_parts();
        assert_eq!(port.written(), b"x 160000\r\n");
        assert_eq!(port.discards, 2);
        assert!(
            journal
                .entries()
                .iter()
                .any(|e| e.direction == Direction::Received && e.text.contains("Receiving XModem"))
        );
    }

    #[test]
    fn test_phrase_alone_succeeds_after_timeout() {
        let port = MockPort::scripted(vec![b"Receiving XModem\r\n".to_vec()]);
        let mut session = Session::new(port);

        let start = Instant::now();
        let flags = enter_receive_mode(&mut session, &fast_config()).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(80));
        assert!(flags.mode_entry);
        assert!(!flags.ready_signal);
    }

    #[test]
    fn test_no_markers_fail_with_handshake_timeout() {
        let port = MockPort::scripted(vec![b"Unknown command\r\n> ".to_vec()]);
        let mut session = Session::new(port);

        let result = enter_receive_mode(&mut session, &fast_config());
        assert!(matches!(result, Err(Error::HandshakeTimeout { .. })));
    }

    #[test]
    fn test_ready_signal_alone_is_not_enough() {
        let port = MockPort::scripted(vec![b"CCCC".to_vec()]);
        let mut session = Session::new(port);

        let result = enter_receive_mode(&mut session, &fast_config());
        assert!(matches!(result, Err(Error::HandshakeTimeout { .. })));
    }
}
