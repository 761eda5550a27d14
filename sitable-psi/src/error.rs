//! Error types for packet and section parsing.

use thiserror::Error;

/// Errors raised while decoding TS packets, PSI sections and typed tables.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PsiError {
    /// Packet is shorter than 188 bytes.
    #[error("Packet too short: {0} bytes")]
    PacketTooShort(usize),

    /// First byte of the packet is not 0x47.
    #[error("Invalid sync byte: 0x{0:02X}")]
    InvalidSyncByte(u8),

    /// Not enough bytes to read the section header.
    #[error("Section too short for header")]
    SectionTooShort,

    /// `section_length` exceeds what the syntax allows.
    #[error("Section length too large: {0}")]
    SectionTooLong(u16),

    /// Buffer ends before `section_length` bytes.
    #[error("Incomplete section: expected {expected} bytes, got {actual}")]
    IncompleteSection { expected: usize, actual: usize },

    /// CRC-32 over the section does not match the trailing value.
    #[error("CRC mismatch: calculated 0x{calculated:08X}, stored 0x{stored:08X}")]
    CrcMismatch { calculated: u32, stored: u32 },

    /// Section carries a table id the target table does not accept.
    #[error("Unexpected table id: 0x{0:02X}")]
    UnexpectedTableId(u8),

    /// Table body could not be decoded.
    #[error("Malformed table: {0}")]
    Malformed(&'static str),
}
