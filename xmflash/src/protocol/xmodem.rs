//! XModem packet codec.
//!
//! ```text
//! Packet format (CRC mode):
//! +-----+-----+------+---------------+--------+
//! | SOH | SEQ | ~SEQ |   DATA (128)  | CRC16  |
//! +-----+-----+------+---------------+--------+
//! | 1   | 1   | 1    |      128      | 2 (BE) |
//! +-----+-----+------+---------------+--------+
//! ```
//!
//! In checksum mode the trailer is a single additive checksum byte.

use byteorder::{BigEndian, WriteBytesExt};

use crate::protocol::crc::{checksum8, crc16_xmodem};

/// XModem control characters.
pub mod control {
    /// Start of Header (128-byte block).
    pub const SOH: u8 = 0x01;
    /// End of Transmission.
    pub const EOT: u8 = 0x04;
    /// Acknowledge.
    pub const ACK: u8 = 0x06;
    /// Not Acknowledge.
    pub const NAK: u8 = 0x15;
    /// Cancel.
    pub const CAN: u8 = 0x18;
    /// Padding for the final short block (Ctrl-Z).
    pub const PAD: u8 = 0x1A;
    /// CRC mode request / ready signal.
    pub const C: u8 = b'C';
}

/// Payload bytes per packet.
pub const PAYLOAD_SIZE: usize = 128;

/// Header bytes before the payload (SOH, SEQ, ~SEQ).
pub const HEADER_SIZE: usize = 3;

/// Packet integrity trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ChecksumMode {
    /// CRC-16/XMODEM, two bytes, MSB first.
    #[default]
    Crc16,
    /// 8-bit additive checksum.
    Checksum,
}

impl ChecksumMode {
    /// Trailer length in bytes.
    pub const fn trailer_len(self) -> usize {
        match self {
            Self::Crc16 => 2,
            Self::Checksum => 1,
        }
    }

    /// Total packet length on the wire (133 or 132).
    pub const fn packet_len(self) -> usize {
        HEADER_SIZE + PAYLOAD_SIZE + self.trailer_len()
    }
}

/// Number of packets needed for an image of `len` bytes.
pub fn packet_count(len: usize) -> usize {
    len.div_ceil(PAYLOAD_SIZE)
}

/// Firmware slice carried by 1-based packet `number`.
///
/// Returns an empty slice past the end of the image.
pub fn packet_data(firmware: &[u8], number: usize) -> &[u8] {
    let start = number.saturating_sub(1).saturating_mul(PAYLOAD_SIZE);
    if start >= firmware.len() {
        return &[];
    }
    let end = (start + PAYLOAD_SIZE).min(firmware.len());
    &firmware[start..end]
}

/// Build a packet for `number` (wrapped mod 256) carrying `data`.
///
/// At most 128 bytes of `data` are used; shorter slices are padded with 0x1A.
#[allow(clippy::cast_possible_truncation)]
pub fn build_packet(number: usize, data: &[u8], mode: ChecksumMode) -> Vec<u8> {
    let seq = (number % 256) as u8;
    let mut packet = Vec::with_capacity(mode.packet_len());

    packet.push(control::SOH);
    packet.push(seq);
    packet.push(0xFF - seq);

    let take = data.len().min(PAYLOAD_SIZE);
    packet.extend_from_slice(&data[..take]);
    packet.resize(HEADER_SIZE + PAYLOAD_SIZE, control::PAD);

    let payload = &packet[HEADER_SIZE..HEADER_SIZE + PAYLOAD_SIZE];
    match mode {
        ChecksumMode::Crc16 => {
            let crc = crc16_xmodem(payload);
            // Writing into a Vec cannot fail
            let _ = packet.write_u16::<BigEndian>(crc);
        },
        ChecksumMode::Checksum => {
            let sum = checksum8(payload);
            packet.push(sum);
        },
    }

    packet
}

/// Receiver reply relevant to the transmitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// 0x06.
    Ack,
    /// 0x15.
    Nak,
    /// 0x18.
    Cancel,
}

/// First ACK/NAK/CAN byte in `data`, in arrival order.
pub fn find_reply(data: &[u8]) -> Option<Reply> {
    data.iter().find_map(|b| match *b {
        control::ACK => Some(Reply::Ack),
        control::NAK => Some(Reply::Nak),
        control::CAN => Some(Reply::Cancel),
        _ => None,
    })
}

/// Name of a control byte, for the session log.
pub fn control_name(byte: u8) -> Option<&'static str> {
    match byte {
        control::SOH => Some("SOH"),
        control::EOT => Some("EOT"),
        control::ACK => Some("ACK"),
        control::NAK => Some("NAK"),
        control::CAN => Some("CAN"),
        _ => None,
    }
}
