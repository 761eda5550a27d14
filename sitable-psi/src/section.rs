//! PSI section framing.
//!
//! Handles the common section header, CRC validation, and the two ways
//! sections reach us: carried in TS packets (`SectionCollector`) or as a
//! plain byte stream of back-to-back sections (`SectionSplitter`).

use log::trace;

use crate::error::PsiError;
use crate::packet::TsPacket;

/// Largest `section_length` any PSI/SI section may declare.
pub const MAX_SECTION_LENGTH: u16 = 4093;

/// Bytes preceding the `section_length` payload (table_id + two length bytes).
const SECTION_PREFIX: usize = 3;

/// Filler byte following the last section in a packet.
const STUFFING_BYTE: u8 = 0xFF;

/// PSI section header (common to all PSI tables).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsiHeader {
    /// Table ID.
    pub table_id: u8,
    /// Section syntax indicator.
    pub section_syntax_indicator: bool,
    /// Section length (12 bits).
    pub section_length: u16,
    /// Table ID extension (long sections only).
    pub table_id_extension: u16,
    /// Version number (5 bits).
    pub version_number: u8,
    /// Current/next indicator.
    pub current_next_indicator: bool,
    /// Section number.
    pub section_number: u8,
    /// Last section number.
    pub last_section_number: u8,
}

/// A parsed PSI section borrowing from the raw bytes.
#[derive(Debug, Clone)]
pub struct PsiSection<'a> {
    /// Section header.
    pub header: PsiHeader,
    /// Section body (after the header, before the CRC).
    pub data: &'a [u8],
    /// Stored CRC32 (long sections only).
    pub crc32: Option<u32>,
    raw: &'a [u8],
}

impl<'a> PsiSection<'a> {
    /// Parse a PSI section starting at `table_id`.
    ///
    /// Long sections carry the extended header and a CRC; short sections are
    /// reported as version 0, section 0 of 0.
    pub fn parse(data: &'a [u8]) -> Result<Self, PsiError> {
        if data.len() < SECTION_PREFIX {
            return Err(PsiError::SectionTooShort);
        }

        let table_id = data[0];
        let section_syntax_indicator = data[1] & 0x80 != 0;
        let section_length = ((data[1] as u16 & 0x0F) << 8) | data[2] as u16;

        if section_length > MAX_SECTION_LENGTH {
            return Err(PsiError::SectionTooLong(section_length));
        }

        let total_length = SECTION_PREFIX + section_length as usize;
        if data.len() < total_length {
            return Err(PsiError::IncompleteSection {
                expected: total_length,
                actual: data.len(),
            });
        }
        let raw = &data[..total_length];

        if !section_syntax_indicator {
            return Ok(PsiSection {
                header: PsiHeader {
                    table_id,
                    section_syntax_indicator,
                    section_length,
                    table_id_extension: 0,
                    version_number: 0,
                    current_next_indicator: true,
                    section_number: 0,
                    last_section_number: 0,
                },
                data: &raw[SECTION_PREFIX..],
                crc32: None,
                raw,
            });
        }

        // Extended header (5) + CRC (4)
        if section_length < 9 {
            return Err(PsiError::SectionTooShort);
        }

        let header = PsiHeader {
            table_id,
            section_syntax_indicator,
            section_length,
            table_id_extension: ((raw[3] as u16) << 8) | raw[4] as u16,
            version_number: (raw[5] >> 1) & 0x1F,
            current_next_indicator: raw[5] & 0x01 != 0,
            section_number: raw[6],
            last_section_number: raw[7],
        };

        let crc_offset = total_length - 4;
        let crc32 = u32::from_be_bytes([
            raw[crc_offset],
            raw[crc_offset + 1],
            raw[crc_offset + 2],
            raw[crc_offset + 3],
        ]);

        Ok(PsiSection {
            header,
            data: &raw[8..crc_offset],
            crc32: Some(crc32),
            raw,
        })
    }

    /// Verify the stored CRC32. Short sections have none and always pass.
    pub fn verify_crc(&self) -> Result<(), PsiError> {
        let Some(stored) = self.crc32 else {
            return Ok(());
        };
        let calculated = crc32_mpeg2(&self.raw[..self.raw.len() - 4]);
        if calculated == stored {
            Ok(())
        } else {
            Err(PsiError::CrcMismatch { calculated, stored })
        }
    }

    /// Get the total section length including header and CRC.
    pub fn total_length(&self) -> usize {
        self.raw.len()
    }

    /// The complete section bytes.
    pub fn as_bytes(&self) -> &'a [u8] {
        self.raw
    }
}

/// Pull every complete section off the front of `buffer`.
///
/// Returns `false` when the buffer starts with stuffing, leaving it in place
/// so the caller can decide how to resynchronise. A header announcing more
/// than the maximum section length also returns `false`, with the buffer
/// emptied, since nothing after it can be trusted as a section boundary.
fn split_sections(buffer: &mut Vec<u8>, emit: &mut dyn FnMut(&[u8])) -> bool {
    let mut offset = 0;
    let clean = loop {
        let rest = &buffer[offset..];
        if rest.is_empty() {
            break true;
        }
        if rest[0] == STUFFING_BYTE {
            break false;
        }
        if rest.len() < SECTION_PREFIX {
            break true;
        }
        let section_length = ((rest[1] as u16 & 0x0F) << 8) | rest[2] as u16;
        if section_length > MAX_SECTION_LENGTH {
            trace!("Dropping section buffer: section_length {} too large", section_length);
            buffer.clear();
            return false;
        }
        let total = SECTION_PREFIX + section_length as usize;
        if rest.len() < total {
            break true;
        }
        emit(&rest[..total]);
        offset += total;
    };
    buffer.drain(..offset);
    clean
}

/// Section collector for sections carried in TS packets of one PID.
#[derive(Debug, Default)]
pub struct SectionCollector {
    /// Bytes of the section(s) being collected.
    buffer: Vec<u8>,
    /// Last continuity counter.
    last_cc: Option<u8>,
    /// Whether `buffer` starts on a section boundary.
    synced: bool,
}

impl SectionCollector {
    /// Create a new section collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear the collector.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.last_cc = None;
        self.synced = false;
    }

    /// Check if collector holds partial data.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Add one packet of this PID, calling `emit` for every section it completes.
    pub fn push_packet(&mut self, packet: &TsPacket<'_>, mut emit: impl FnMut(&[u8])) {
        if !packet.carries_sections() {
            return;
        }

        let cc = packet.header.continuity_counter;
        if let Some(last) = self.last_cc {
            if cc == last && !packet.discontinuity {
                // Duplicate packet
                return;
            }
            if cc != (last + 1) & 0x0F && !packet.discontinuity {
                trace!("Continuity error (expected {}, got {}), dropping partial section", (last + 1) & 0x0F, cc);
                self.buffer.clear();
                self.synced = false;
            }
        }
        self.last_cc = Some(cc);

        let payload = packet.payload;
        if packet.header.payload_unit_start {
            let pointer = payload[0] as usize;
            let body = &payload[1..];
            if pointer > body.len() {
                self.buffer.clear();
                self.synced = false;
                return;
            }

            // Tail of the previous section
            if self.synced && !self.buffer.is_empty() {
                self.buffer.extend_from_slice(&body[..pointer]);
                split_sections(&mut self.buffer, &mut emit);
            }

            self.buffer.clear();
            self.buffer.extend_from_slice(&body[pointer..]);
            self.synced = true;
        } else if self.synced {
            self.buffer.extend_from_slice(payload);
        } else {
            return;
        }

        if !split_sections(&mut self.buffer, &mut emit) {
            // Rest of the packet is stuffing; next section starts on a new unit.
            self.buffer.clear();
            self.synced = false;
        }
    }
}

/// Splits a plain byte stream of concatenated sections.
#[derive(Debug, Default)]
pub struct SectionSplitter {
    buffer: Vec<u8>,
}

impl SectionSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and call `emit` for every section now complete.
    pub fn push(&mut self, data: &[u8], mut emit: impl FnMut(&[u8])) {
        self.buffer.extend_from_slice(data);
        while !split_sections(&mut self.buffer, &mut emit) {
            let skip = self
                .buffer
                .iter()
                .position(|&b| b != STUFFING_BYTE)
                .unwrap_or(self.buffer.len());
            self.buffer.drain(..skip);
        }
    }

    /// Bytes held for an incomplete section.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Calculate CRC32 for MPEG-2 (polynomial 0x04C11DB7).
pub fn crc32_mpeg2(data: &[u8]) -> u32 {
    static CRC_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = (i as u32) << 24;
            let mut j = 0;
            while j < 8 {
                if crc & 0x80000000 != 0 {
                    crc = (crc << 1) ^ 0x04C11DB7;
                } else {
                    crc <<= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    data.iter().fold(0xFFFFFFFFu32, |crc, &byte| {
        (crc << 8) ^ CRC_TABLE[((crc >> 24) ^ byte as u32) as usize]
    })
}

/// Build a long section around `body`, computing `section_length` and the CRC.
///
/// Used to synthesise sections for tests and tooling.
pub fn build_long_section(
    table_id: u8,
    table_id_extension: u16,
    version: u8,
    section_number: u8,
    last_section_number: u8,
    body: &[u8],
) -> Vec<u8> {
    let section_length = (5 + body.len() + 4) as u16;
    let mut out = Vec::with_capacity(SECTION_PREFIX + section_length as usize);
    out.push(table_id);
    out.push(0xB0 | ((section_length >> 8) as u8 & 0x0F));
    out.push(section_length as u8);
    out.extend_from_slice(&table_id_extension.to_be_bytes());
    out.push(0xC1 | ((version & 0x1F) << 1));
    out.push(section_number);
    out.push(last_section_number);
    out.extend_from_slice(body);
    let crc = crc32_mpeg2(&out);
    out.extend_from_slice(&crc.to_be_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{TsPacket, SYNC_BYTE, TS_PACKET_SIZE};

    fn ts_packets(pid: u16, section_stream: &[u8], start_cc: u8) -> Vec<[u8; TS_PACKET_SIZE]> {
        let mut packets = Vec::new();
        let mut rest = section_stream;
        let mut cc = start_cc;
        let mut first = true;
        while first || !rest.is_empty() {
            let mut p = [0xFFu8; TS_PACKET_SIZE];
            p[0] = SYNC_BYTE;
            p[1] = ((pid >> 8) as u8 & 0x1F) | if first { 0x40 } else { 0 };
            p[2] = pid as u8;
            p[3] = 0x10 | (cc & 0x0F);
            let mut offset = 4;
            if first {
                p[4] = 0;
                offset = 5;
            }
            let n = rest.len().min(TS_PACKET_SIZE - offset);
            p[offset..offset + n].copy_from_slice(&rest[..n]);
            rest = &rest[n..];
            packets.push(p);
            cc = (cc + 1) & 0x0F;
            first = false;
        }
        packets
    }

    #[test]
    fn test_crc32_empty() {
        assert_eq!(crc32_mpeg2(&[]), 0xFFFFFFFF);
    }

    #[test]
    fn test_crc_of_section_with_crc_is_zero() {
        let section = build_long_section(0x00, 0x1234, 3, 0, 0, &[0x00, 0x01, 0xE1, 0x00]);
        assert_eq!(crc32_mpeg2(&section), 0);
    }

    #[test]
    fn test_parse_long_section() {
        let raw = build_long_section(0x42, 0x7FE1, 9, 1, 2, &[1, 2, 3]);
        let section = PsiSection::parse(&raw).unwrap();
        assert_eq!(section.header.table_id, 0x42);
        assert_eq!(section.header.table_id_extension, 0x7FE1);
        assert_eq!(section.header.version_number, 9);
        assert_eq!(section.header.section_number, 1);
        assert_eq!(section.header.last_section_number, 2);
        assert!(section.header.current_next_indicator);
        assert_eq!(section.data, &[1, 2, 3]);
        assert!(section.verify_crc().is_ok());
    }

    #[test]
    fn test_crc_mismatch_detected() {
        let mut raw = build_long_section(0x00, 1, 0, 0, 0, &[0, 1, 0xE1, 0]);
        raw[8] ^= 0xFF;
        let section = PsiSection::parse(&raw).unwrap();
        assert!(matches!(section.verify_crc(), Err(PsiError::CrcMismatch { .. })));
    }

    #[test]
    fn test_parse_short_section() {
        // TDT: table_id 0x70, 5 bytes of UTC time
        let raw = [0x70, 0x70, 0x05, 0xE0, 0x00, 0x12, 0x34, 0x56];
        let section = PsiSection::parse(&raw).unwrap();
        assert!(!section.header.section_syntax_indicator);
        assert_eq!(section.header.last_section_number, 0);
        assert_eq!(section.data.len(), 5);
        assert_eq!(section.crc32, None);
    }

    #[test]
    fn test_incomplete_section() {
        let raw = build_long_section(0x00, 1, 0, 0, 0, &[0; 8]);
        assert!(matches!(
            PsiSection::parse(&raw[..10]),
            Err(PsiError::IncompleteSection { .. })
        ));
    }

    #[test]
    fn test_collector_multi_packet_section() {
        let body = vec![0xABu8; 400];
        let section = build_long_section(0x42, 1, 0, 0, 0, &body);
        let packets = ts_packets(0x11, &section, 0);
        assert!(packets.len() >= 3);

        let mut collector = SectionCollector::new();
        let mut out = Vec::new();
        for raw in &packets {
            let packet = TsPacket::parse(raw).unwrap();
            collector.push_packet(&packet, |s| out.push(s.to_vec()));
        }
        assert_eq!(out, vec![section]);
    }

    #[test]
    fn test_collector_two_sections_in_one_packet() {
        let first = build_long_section(0x00, 1, 0, 0, 1, &[0, 1, 0xE1, 0]);
        let second = build_long_section(0x00, 1, 0, 1, 1, &[0, 2, 0xE2, 0]);
        let mut stream = first.clone();
        stream.extend_from_slice(&second);
        let packets = ts_packets(0, &stream, 5);
        assert_eq!(packets.len(), 1);

        let mut collector = SectionCollector::new();
        let mut out = Vec::new();
        collector.push_packet(&TsPacket::parse(&packets[0]).unwrap(), |s| out.push(s.to_vec()));
        assert_eq!(out, vec![first, second]);
    }

    #[test]
    fn test_collector_drops_on_discontinuity() {
        let section = build_long_section(0x42, 1, 0, 0, 0, &vec![0x11u8; 400]);
        let packets = ts_packets(0x11, &section, 0);

        let mut collector = SectionCollector::new();
        let mut out = Vec::new();
        // Skip the second packet
        for (i, raw) in packets.iter().enumerate() {
            if i == 1 {
                continue;
            }
            collector.push_packet(&TsPacket::parse(raw).unwrap(), |s| out.push(s.to_vec()));
        }
        assert!(out.is_empty());
    }

    #[test]
    fn test_splitter_handles_split_and_stuffing() {
        let first = build_long_section(0x00, 1, 0, 0, 1, &[0, 1, 0xE1, 0]);
        let second = build_long_section(0x00, 1, 0, 1, 1, &[0, 2, 0xE2, 0]);
        let mut stream = first.clone();
        stream.extend_from_slice(&[0xFF, 0xFF, 0xFF]);
        stream.extend_from_slice(&second);

        let mut splitter = SectionSplitter::new();
        let mut out = Vec::new();
        let (a, b) = stream.split_at(7);
        splitter.push(a, |s| out.push(s.to_vec()));
        assert!(out.is_empty());
        splitter.push(b, |s| out.push(s.to_vec()));
        assert_eq!(out, vec![first, second]);
        assert_eq!(splitter.pending(), 0);
    }

    #[test]
    fn test_collector_resyncs_after_oversized_length() {
        // section_length 0xFFF, followed by bytes that look like a short section
        let mut stream = vec![0x70, 0x0F, 0xFF];
        stream.extend_from_slice(&[0x11; 180]);
        stream.extend_from_slice(&[0x70, 0x70, 0x05]);
        stream.extend_from_slice(&[0x11; 5]);
        let packets = ts_packets(0x14, &stream, 0);
        assert_eq!(packets.len(), 2);

        let mut collector = SectionCollector::new();
        let mut out = Vec::new();
        for raw in &packets {
            collector.push_packet(&TsPacket::parse(raw).unwrap(), |s| out.push(s.to_vec()));
        }
        assert!(out.is_empty());
        assert!(collector.is_empty());

        let section = build_long_section(0x70, 1, 0, 0, 0, &[1, 2, 3]);
        for raw in &ts_packets(0x14, &section, 2) {
            collector.push_packet(&TsPacket::parse(raw).unwrap(), |s| out.push(s.to_vec()));
        }
        assert_eq!(out, vec![section]);
    }

    #[test]
    fn test_splitter_drops_oversized_length() {
        let section = build_long_section(0x00, 1, 0, 0, 0, &[0, 1, 0xE1, 0]);
        let mut splitter = SectionSplitter::new();
        let mut out = Vec::new();

        splitter.push(&[0x00, 0xBF, 0xFF, 0x00, 0x01], |s| out.push(s.to_vec()));
        assert!(out.is_empty());
        assert_eq!(splitter.pending(), 0);

        splitter.push(&section, |s| out.push(s.to_vec()));
        assert_eq!(out, vec![section]);
    }
}
