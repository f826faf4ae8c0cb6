//! XModem transmitter.
//!
//! The retry logic is an explicit state machine: [`advance`] is a pure
//! function from `(state, event)` to the next state, and [`Transmitter`]
//! performs the side effects (writes, waits, logging) that produce events.
//!
//! ```text
//! Sending(n) -> AwaitAck(n) -> Sending(n+1) | Sending(n) (retry) | Aborted
//!                           -> SendEot -> AwaitEotAck -> Complete | SendEot | Aborted
//! ```

use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::xmodem::{
    ChecksumMode, PAYLOAD_SIZE, Reply, build_packet, control, find_reply, packet_count,
    packet_data,
};
use crate::session::Session;

/// Packets logged in full detail besides the first and the last.
const DETAIL_EVERY: usize = 100;

/// Transmitter timing and retry settings.
#[derive(Debug, Clone)]
pub struct TransmitterConfig {
    /// Wait for ACK/NAK after each packet.
    pub ack_timeout: Duration,
    /// Wait for ACK after EOT.
    pub eot_timeout: Duration,
    /// Deadline for the whole transfer, counted from the first packet.
    pub session_timeout: Duration,
    /// Retry budget shared by all packets.
    pub max_retries: u32,
    /// Packet trailer.
    pub mode: ChecksumMode,
}

impl Default for TransmitterConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(5),
            eot_timeout: Duration::from_secs(5),
            session_timeout: Duration::from_secs(120),
            max_retries: 10,
            mode: ChecksumMode::Crc16,
        }
    }
}

/// Why a transfer stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Retry budget exhausted on this packet.
    RetriesExhausted {
        /// 1-based packet number.
        packet: usize,
    },
    /// Receiver sent CAN.
    DeviceCancelled,
    /// No ACK after EOT.
    EotTimeout,
    /// Overall deadline passed.
    SessionTimeout,
}

impl Failure {
    /// Convert into the public error type.
    pub fn into_error(self, config: &TransmitterConfig) -> Error {
        match self {
            Self::RetriesExhausted { packet } => Error::RetriesExhausted {
                packet: u32::try_from(packet).unwrap_or(u32::MAX),
            },
            Self::DeviceCancelled => Error::DeviceCancelled,
            Self::EotTimeout => Error::EotTimeout,
            Self::SessionTimeout => Error::SessionTimeout {
                secs: config.session_timeout.as_secs(),
            },
        }
    }
}

/// Transmitter phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Packet `TransferState::packet` is about to be written.
    Sending,
    /// Waiting for the receiver to answer the current packet.
    AwaitAck,
    /// EOT is about to be written.
    SendEot,
    /// Waiting for the receiver to acknowledge EOT.
    AwaitEotAck,
    /// EOT acknowledged.
    Complete,
    /// Transfer stopped.
    Aborted(Failure),
}

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Packet or EOT written and flushed.
    Written,
    /// Packet or EOT write failed.
    WriteFailed,
    /// ACK received.
    Ack,
    /// NAK received.
    Nak,
    /// CAN received.
    Cancel,
    /// No reply within the wait.
    Timeout,
    /// Overall deadline passed.
    SessionExpired,
}

impl From<Reply> for Event {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::Ack => Self::Ack,
            Reply::Nak => Self::Nak,
            Reply::Cancel => Self::Cancel,
        }
    }
}

/// Transfer progress. Only [`advance`] produces new states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferState {
    /// Current phase.
    pub phase: Phase,
    /// Current 1-based packet number. Advances only on ACK.
    pub packet: usize,
    /// Total packets, `ceil(len / 128)`.
    pub total_packets: usize,
    /// Firmware bytes acknowledged so far.
    pub bytes_consumed: usize,
    /// Firmware length.
    pub total_bytes: usize,
    /// Remaining retry budget.
    pub retries_left: u32,
}

impl TransferState {
    /// Initial state for an image of `total_bytes`.
    ///
    /// An empty image has no packets and starts directly at EOT.
    pub fn new(total_bytes: usize, max_retries: u32) -> Self {
        let total_packets = packet_count(total_bytes);
        Self {
            phase: if total_packets == 0 {
                Phase::SendEot
            } else {
                Phase::Sending
            },
            packet: 1,
            total_packets,
            bytes_consumed: 0,
            total_bytes,
            retries_left: max_retries,
        }
    }

    /// Whether the transfer has finished either way.
    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Complete | Phase::Aborted(_))
    }

    /// Packets the receiver has acknowledged.
    pub fn acknowledged_packets(&self) -> usize {
        self.packet.saturating_sub(1).min(self.total_packets)
    }

    fn abort(self, failure: Failure) -> Self {
        Self {
            phase: Phase::Aborted(failure),
            ..self
        }
    }

    fn retry(self) -> Self {
        if self.retries_left == 0 {
            return self.abort(Failure::RetriesExhausted {
                packet: self.packet,
            });
        }
        Self {
            phase: Phase::Sending,
            retries_left: self.retries_left - 1,
            ..self
        }
    }
}

/// Next state for `event` in `state`. Events that do not apply to the
/// current phase leave the state unchanged.
pub fn advance(state: TransferState, event: Event) -> TransferState {
    if state.is_finished() {
        return state;
    }
    if event == Event::SessionExpired {
        return state.abort(Failure::SessionTimeout);
    }

    match (state.phase, event) {
        (Phase::Sending, Event::Written) => TransferState {
            phase: Phase::AwaitAck,
            ..state
        },
        (Phase::Sending, Event::WriteFailed) => state.retry(),

        (Phase::AwaitAck, Event::Ack) => {
            let next = state.packet + 1;
            TransferState {
                phase: if next > state.total_packets {
                    Phase::SendEot
                } else {
                    Phase::Sending
                },
                packet: next,
                bytes_consumed: (state.packet * PAYLOAD_SIZE).min(state.total_bytes),
                ..state
            }
        },
        (Phase::AwaitAck, Event::Nak | Event::Timeout) => state.retry(),
        (Phase::AwaitAck, Event::Cancel) => state.abort(Failure::DeviceCancelled),

        (Phase::SendEot, Event::Written) => TransferState {
            phase: Phase::AwaitEotAck,
            ..state
        },
        (Phase::SendEot, Event::WriteFailed) => state.abort(Failure::EotTimeout),

        (Phase::AwaitEotAck, Event::Ack) => TransferState {
            phase: Phase::Complete,
            ..state
        },
        (Phase::AwaitEotAck, Event::Nak) => TransferState {
            phase: Phase::SendEot,
            ..state
        },
        (Phase::AwaitEotAck, Event::Timeout) => state.abort(Failure::EotTimeout),
        (Phase::AwaitEotAck, Event::Cancel) => state.abort(Failure::DeviceCancelled),

        _ => state,
    }
}

/// Drives [`advance`] against a live session.
pub struct Transmitter<'a> {
    firmware: &'a [u8],
    config: TransmitterConfig,
    state: TransferState,
    transmissions: usize,
}

impl<'a> Transmitter<'a> {
    /// Prepare a transfer of `firmware`.
    pub fn new(firmware: &'a [u8], config: TransmitterConfig) -> Self {
        let state = TransferState::new(firmware.len(), config.max_retries);
        Self {
            firmware,
            config,
            state,
            transmissions: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> &TransferState {
        &self.state
    }

    /// Packet writes so far, retransmissions included.
    pub fn transmissions(&self) -> usize {
        self.transmissions
    }

    /// Run the transfer to completion.
    ///
    /// `progress` is called with `(bytes_consumed, total_bytes)` after every
    /// acknowledged packet.
    pub fn run<P, F>(&mut self, session: &mut Session<P>, mut progress: F) -> Result<()>
    where
        P: Port,
        F: FnMut(usize, usize),
    {
        info!(
            "Starting XModem transfer: {} bytes, {} packets",
            self.state.total_bytes, self.state.total_packets
        );
        session.note(format!(
            "Starting XModem transfer, {} bytes in {} packets ({:?} mode)",
            self.state.total_bytes, self.state.total_packets, self.config.mode
        ));

        let deadline = Instant::now() + self.config.session_timeout;

        loop {
            match self.state.phase {
                Phase::Complete => {
                    info!("XModem transfer completed");
                    session.note("XModem transfer completed");
                    return Ok(());
                },
                Phase::Aborted(failure) => {
                    let err = failure.into_error(&self.config);
                    warn!("{err}");
                    session.note(err.to_string());
                    return Err(err);
                },
                _ => {},
            }

            let now = Instant::now();
            let event = if now >= deadline {
                Event::SessionExpired
            } else {
                let remaining = deadline - now;
                let phase = self.state.phase;
                let event = match phase {
                    Phase::Sending => self.send_packet(session)?,
                    Phase::AwaitAck => {
                        Self::await_reply(session, self.config.ack_timeout.min(remaining))?
                    },
                    Phase::SendEot => self.send_eot(session)?,
                    Phase::AwaitEotAck => {
                        Self::await_reply(session, self.config.eot_timeout.min(remaining))?
                    },
                    Phase::Complete | Phase::Aborted(_) => continue,
                };
                if event == Event::Timeout && Instant::now() >= deadline {
                    Event::SessionExpired
                } else {
                    event
                }
            };

            let before = self.state;
            self.state = advance(before, event);
            self.report(session, before, event, &mut progress);
        }
    }

    fn send_packet<P: Port>(&mut self, session: &mut Session<P>) -> Result<Event> {
        let number = self.state.packet;
        let packet = build_packet(
            number,
            packet_data(self.firmware, number),
            self.config.mode,
        );

        match session.write(&packet) {
            Ok(()) => {
                self.transmissions += 1;
                let total = self.state.total_packets;
                if number == 1 || number == total || number % DETAIL_EVERY == 0 {
                    session.note(format!(
                        "packet {number}/{total} seq=0x{:02X} {} bytes",
                        packet[1],
                        packet.len()
                    ));
                } else {
                    session.note(format!("packet {number}/{total}"));
                }
                Ok(Event::Written)
            },
            Err(Error::Interrupted) => Err(Error::Interrupted),
            Err(e) => {
                debug!("Write of packet {number} failed: {e}");
                session.note(format!("Failed to send packet {number}: {e}"));
                Ok(Event::WriteFailed)
            },
        }
    }

    fn send_eot<P: Port>(&mut self, session: &mut Session<P>) -> Result<Event> {
        match session.write(&[control::EOT]) {
            Ok(()) => {
                session.note("EOT (0x04)");
                Ok(Event::Written)
            },
            Err(Error::Interrupted) => Err(Error::Interrupted),
            Err(e) => {
                session.note(format!("Failed to send end of transmission: {e}"));
                Ok(Event::WriteFailed)
            },
        }
    }

    fn await_reply<P: Port>(session: &mut Session<P>, timeout: Duration) -> Result<Event> {
        let reply = session.wait_for(timeout, find_reply)?;
        Ok(reply.map_or(Event::Timeout, Event::from))
    }

    fn report<P, F>(
        &self,
        session: &mut Session<P>,
        before: TransferState,
        event: Event,
        progress: &mut F,
    ) where
        P: Port,
        F: FnMut(usize, usize),
    {
        let after = self.state;
        match (before.phase, event) {
            (Phase::AwaitAck, Event::Ack) => {
                trace!("Packet {} acknowledged", before.packet);
                progress(after.bytes_consumed, after.total_bytes);
                if after.phase == Phase::SendEot {
                    session.note(format!(
                        "All {} packets acknowledged, sending end of transmission",
                        after.total_packets
                    ));
                }
            },
            (Phase::AwaitAck | Phase::Sending, Event::Nak | Event::Timeout | Event::WriteFailed)
                if after.phase == Phase::Sending =>
            {
                let cause = match event {
                    Event::Nak => "NAK received",
                    Event::Timeout => "No response",
                    _ => "Write failed",
                };
                warn!(
                    "{cause} for packet {}, retrying ({} retries left)",
                    before.packet, after.retries_left
                );
                session.note(format!(
                    "{cause} for packet {}, retrying ({} retries left)",
                    before.packet, after.retries_left
                ));
            },
            (Phase::AwaitEotAck, Event::Nak) => {
                debug!("NAK after EOT, resending");
                session.note("NAK after end of transmission, resending");
            },
            (Phase::AwaitAck | Phase::AwaitEotAck, Event::Cancel) => {
                session.note("Received CAN from device");
            },
            _ => {},
        }
    }
}
