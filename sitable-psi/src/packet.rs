//! MPEG-TS packet parsing.
//!
//! Only the parts of the packet needed to pull PSI sections out of a
//! stream are decoded: the header, the adaptation field length and its
//! discontinuity flag, and the payload.

use crate::error::PsiError;

/// TS packet size in bytes.
pub const TS_PACKET_SIZE: usize = 188;

/// TS sync byte (0x47).
pub const SYNC_BYTE: u8 = 0x47;

/// Parsed TS packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsHeader {
    /// Transport error indicator.
    pub transport_error: bool,
    /// Payload unit start indicator.
    pub payload_unit_start: bool,
    /// Packet Identifier (13 bits).
    pub pid: u16,
    /// Transport scrambling control (2 bits).
    pub scrambling_control: u8,
    /// Adaptation field control (2 bits).
    pub adaptation_field_control: u8,
    /// Continuity counter (4 bits).
    pub continuity_counter: u8,
}

impl TsHeader {
    /// Check if packet has adaptation field.
    pub fn has_adaptation_field(&self) -> bool {
        self.adaptation_field_control & 0x02 != 0
    }

    /// Check if packet has payload.
    pub fn has_payload(&self) -> bool {
        self.adaptation_field_control & 0x01 != 0
    }

    /// Check if packet is scrambled.
    pub fn is_scrambled(&self) -> bool {
        self.scrambling_control != 0
    }
}

/// A parsed TS packet borrowing its payload from the input buffer.
#[derive(Debug, Clone)]
pub struct TsPacket<'a> {
    /// Packet header.
    pub header: TsHeader,
    /// Discontinuity indicator from the adaptation field.
    pub discontinuity: bool,
    /// Payload data.
    pub payload: &'a [u8],
}

impl<'a> TsPacket<'a> {
    /// Parse a TS packet from the first 188 bytes of `data`.
    pub fn parse(data: &'a [u8]) -> Result<Self, PsiError> {
        if data.len() < TS_PACKET_SIZE {
            return Err(PsiError::PacketTooShort(data.len()));
        }

        if data[0] != SYNC_BYTE {
            return Err(PsiError::InvalidSyncByte(data[0]));
        }

        let header = TsHeader {
            transport_error: data[1] & 0x80 != 0,
            payload_unit_start: data[1] & 0x40 != 0,
            pid: ((data[1] as u16 & 0x1F) << 8) | data[2] as u16,
            scrambling_control: (data[3] >> 6) & 0x03,
            adaptation_field_control: (data[3] >> 4) & 0x03,
            continuity_counter: data[3] & 0x0F,
        };

        let mut offset = 4;
        let mut discontinuity = false;
        if header.has_adaptation_field() {
            let af_length = data[4] as usize;
            if af_length > 0 {
                discontinuity = data[5] & 0x80 != 0;
            }
            offset = 5 + af_length;
        }

        let payload = if header.has_payload() && offset < TS_PACKET_SIZE {
            &data[offset..TS_PACKET_SIZE]
        } else {
            &[]
        };

        Ok(TsPacket {
            header,
            discontinuity,
            payload,
        })
    }

    /// Whether this packet can carry usable section data.
    pub fn carries_sections(&self) -> bool {
        !self.header.transport_error
            && !self.header.is_scrambled()
            && self.header.has_payload()
            && !self.payload.is_empty()
    }
}

/// Iterator over TS packets in a byte stream.
pub struct TsPacketIterator<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> TsPacketIterator<'a> {
    /// Create a new iterator over TS packets.
    pub fn new(data: &'a [u8]) -> Self {
        let offset = data
            .iter()
            .position(|&b| b == SYNC_BYTE)
            .unwrap_or(data.len());
        Self { data, offset }
    }

    /// Number of bytes consumed so far, including skipped garbage.
    pub fn consumed(&self) -> usize {
        self.offset.min(self.data.len())
    }

    fn resync(&mut self) {
        self.offset += 1;
        while self.offset < self.data.len() && self.data[self.offset] != SYNC_BYTE {
            self.offset += 1;
        }
    }
}

impl<'a> Iterator for TsPacketIterator<'a> {
    type Item = TsPacket<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.offset + TS_PACKET_SIZE <= self.data.len() {
            match TsPacket::parse(&self.data[self.offset..]) {
                Ok(packet) => {
                    self.offset += TS_PACKET_SIZE;
                    return Some(packet);
                }
                Err(_) => self.resync(),
            }
        }
        None
    }
}

/// Pack one section into TS packets on `pid`, starting a new payload unit.
///
/// `cc` is the continuity counter of the first packet and is advanced past
/// the last one. Unused payload space is filled with stuffing.
pub fn packetize_section(pid: u16, section: &[u8], cc: &mut u8) -> Vec<u8> {
    let mut unit = Vec::with_capacity(section.len() + 1);
    unit.push(0);
    unit.extend_from_slice(section);

    let mut out = Vec::with_capacity(unit.len().div_ceil(TS_PACKET_SIZE - 4) * TS_PACKET_SIZE);
    for (i, chunk) in unit.chunks(TS_PACKET_SIZE - 4).enumerate() {
        let mut packet = [0xFFu8; TS_PACKET_SIZE];
        packet[0] = SYNC_BYTE;
        packet[1] = ((pid >> 8) as u8 & 0x1F) | if i == 0 { 0x40 } else { 0 };
        packet[2] = pid as u8;
        packet[3] = 0x10 | (*cc & 0x0F);
        packet[4..4 + chunk.len()].copy_from_slice(chunk);
        *cc = (*cc + 1) & 0x0F;
        out.extend_from_slice(&packet);
    }
    out
}
