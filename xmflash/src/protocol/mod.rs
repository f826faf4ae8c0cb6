//! Protocol implementations.

pub mod crc;
pub mod transmitter;
pub mod xmodem;

// Re-export common types
pub use transmitter::{TransferState, Transmitter, TransmitterConfig};
pub use xmodem::{ChecksumMode, build_packet};
