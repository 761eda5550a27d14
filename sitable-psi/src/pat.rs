//! PAT (Program Association Table) sections.
//!
//! The PAT is transmitted on PID 0x0000 and lists the programs of a
//! transport stream with their PMT PIDs.

use serde::Serialize;

use crate::error::PsiError;
use crate::section::PsiSection;
use crate::table::Table;
use crate::table_id;

/// A single PAT entry (program number and PMT PID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PatEntry {
    /// Program number (service id).
    pub program_number: u16,
    /// PID of the PMT for this program.
    pub pid: u16,
}

/// One PAT section.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PatTable {
    /// Transport stream ID.
    pub transport_stream_id: u16,
    /// Version number.
    pub version_number: u8,
    pub section_number: u8,
    pub last_section_number: u8,
    /// Programs carried in this section.
    pub programs: Vec<PatEntry>,
    /// NIT PID (program number 0), if present.
    pub nit_pid: Option<u16>,
}

impl PatTable {
    /// Get PMT PID for a specific program number.
    pub fn pmt_pid(&self, program_number: u16) -> Option<u16> {
        self.programs
            .iter()
            .find(|p| p.program_number == program_number)
            .map(|p| p.pid)
    }

    /// Merge the program lists of a complete set of sections.
    pub fn programs_of(sections: &[PatTable]) -> Vec<PatEntry> {
        sections.iter().flat_map(|s| s.programs.iter().copied()).collect()
    }
}

impl Table for PatTable {
    fn parse(section: &PsiSection<'_>) -> Result<Self, PsiError> {
        if section.header.table_id != table_id::PAT {
            return Err(PsiError::UnexpectedTableId(section.header.table_id));
        }

        let data = section.data;
        if data.len() % 4 != 0 {
            return Err(PsiError::Malformed("PAT body is not a multiple of 4 bytes"));
        }

        let mut pat = PatTable {
            transport_stream_id: section.header.table_id_extension,
            version_number: section.header.version_number,
            section_number: section.header.section_number,
            last_section_number: section.header.last_section_number,
            programs: Vec::with_capacity(data.len() / 4),
            nit_pid: None,
        };

        for chunk in data.chunks_exact(4) {
            let program_number = u16::from_be_bytes([chunk[0], chunk[1]]);
            let pid = ((chunk[2] as u16 & 0x1F) << 8) | chunk[3] as u16;

            if program_number == 0 {
                pat.nit_pid = Some(pid);
            } else {
                pat.programs.push(PatEntry { program_number, pid });
            }
        }

        Ok(pat)
    }

    fn version(&self) -> u8 {
        self.version_number
    }

    fn current_section(&self) -> u8 {
        self.section_number
    }

    fn last_section(&self) -> u8 {
        self.last_section_number
    }
}
