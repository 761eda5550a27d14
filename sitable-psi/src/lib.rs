//! MPEG-TS packet and PSI/SI section parsing.
//!
//! This crate is the parsing side of sitable: it frames sections out of a
//! transport stream, validates them and decodes them into typed records
//! implementing [`Table`]. Reassembling multi-section tables is left to
//! `sitable-reader`.
//!
//! # Usage
//! ```
//! use sitable_psi::{build_long_section, PatTable, StreamKind, TableParser};
//!
//! let parser = TableParser::new(StreamKind::Extended, |pat: PatTable| {
//!     assert_eq!(pat.transport_stream_id, 0x7FE1);
//! });
//! parser.consume_section(&build_long_section(0x00, 0x7FE1, 0, 0, 0, &[0x04, 0x08, 0xE1, 0xF0]));
//! ```

mod descriptors;
mod error;
mod packet;
mod parser;
mod pat;
mod sdt;
mod section;
mod table;

pub use descriptors::{decode_text, Descriptors, ServiceDescriptor};
pub use error::PsiError;
pub use packet::{
    packetize_section, TsHeader, TsPacket, TsPacketIterator, SYNC_BYTE, TS_PACKET_SIZE,
};
pub use parser::{SectionSink, TableParser};
pub use pat::{PatEntry, PatTable};
pub use sdt::{SdtService, SdtTable};
pub use section::{
    build_long_section, crc32_mpeg2, PsiHeader, PsiSection, SectionCollector, SectionSplitter,
    MAX_SECTION_LENGTH,
};
pub use table::{RawSection, StreamKind, Table};

/// Well-known PIDs in MPEG-TS.
pub mod pid {
    /// Program Association Table PID.
    pub const PAT: u16 = 0x0000;
    /// Conditional Access Table PID.
    pub const CAT: u16 = 0x0001;
    /// Network Information Table PID.
    pub const NIT: u16 = 0x0010;
    /// Service Description Table PID.
    pub const SDT: u16 = 0x0011;
    /// Event Information Table PID.
    pub const EIT: u16 = 0x0012;
    /// Time and Date Table PID.
    pub const TDT: u16 = 0x0014;
    /// Null packet PID (stuffing).
    pub const NULL: u16 = 0x1FFF;
}

/// Table IDs for PSI/SI tables.
pub mod table_id {
    /// Program Association Section.
    pub const PAT: u8 = 0x00;
    /// Network Information Section - actual.
    pub const NIT_ACTUAL: u8 = 0x40;
    /// Service Description Section - actual.
    pub const SDT_ACTUAL: u8 = 0x42;
    /// Service Description Section - other.
    pub const SDT_OTHER: u8 = 0x46;
    /// Time and Date Section.
    pub const TDT: u8 = 0x70;
}

/// Descriptor tags used in PSI/SI tables.
pub mod descriptor_tag {
    /// Service descriptor.
    pub const SERVICE: u8 = 0x48;
}
