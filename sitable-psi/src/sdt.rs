//! SDT (Service Description Table) sections.
//!
//! The SDT is transmitted on PID 0x0011 and describes the services
//! (channels) of a transport stream. Large networks spread it over
//! several sections.

use serde::Serialize;

use crate::descriptors::{Descriptors, ServiceDescriptor};
use crate::error::PsiError;
use crate::section::PsiSection;
use crate::table::Table;
use crate::{descriptor_tag, table_id};

/// Service entry in the SDT.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SdtService {
    /// Service ID (program number).
    pub service_id: u16,
    /// EIT schedule flag.
    pub eit_schedule_flag: bool,
    /// EIT present/following flag.
    pub eit_present_following_flag: bool,
    /// Running status.
    pub running_status: u8,
    /// Free CA mode.
    pub free_ca_mode: bool,
    /// Parsed service descriptor.
    pub service_descriptor: Option<ServiceDescriptor>,
}

impl SdtService {
    /// Get service name (from service descriptor).
    pub fn service_name(&self) -> Option<&str> {
        self.service_descriptor
            .as_ref()
            .map(|d| d.service_name.as_str())
    }

    /// Get running status name.
    pub fn running_status_name(&self) -> &'static str {
        match self.running_status {
            0 => "Undefined",
            1 => "Not running",
            2 => "Starts in a few seconds",
            3 => "Pausing",
            4 => "Running",
            _ => "Reserved",
        }
    }
}

/// One SDT section.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SdtTable {
    /// Table id (actual or other).
    pub table_id: u8,
    /// Transport stream ID.
    pub transport_stream_id: u16,
    /// Original network ID.
    pub original_network_id: u16,
    /// Version number.
    pub version_number: u8,
    pub section_number: u8,
    pub last_section_number: u8,
    /// Services.
    pub services: Vec<SdtService>,
}

impl SdtTable {
    /// Find service by service ID.
    pub fn find_service(&self, service_id: u16) -> Option<&SdtService> {
        self.services.iter().find(|s| s.service_id == service_id)
    }

    /// Check if this is SDT actual (for current TS).
    pub fn is_actual(&self) -> bool {
        self.table_id == table_id::SDT_ACTUAL
    }
}

impl Table for SdtTable {
    fn parse(section: &PsiSection<'_>) -> Result<Self, PsiError> {
        let tid = section.header.table_id;
        if tid != table_id::SDT_ACTUAL && tid != table_id::SDT_OTHER {
            return Err(PsiError::UnexpectedTableId(tid));
        }

        let data = section.data;
        if data.len() < 3 {
            return Err(PsiError::Malformed("SDT body too short"));
        }

        let mut sdt = SdtTable {
            table_id: tid,
            transport_stream_id: section.header.table_id_extension,
            original_network_id: u16::from_be_bytes([data[0], data[1]]),
            version_number: section.header.version_number,
            section_number: section.header.section_number,
            last_section_number: section.header.last_section_number,
            services: Vec::new(),
        };

        // data[2] is reserved
        let mut offset = 3;
        while offset + 5 <= data.len() {
            let entry = &data[offset..];
            let descriptors_length = ((entry[3] as usize & 0x0F) << 8) | entry[4] as usize;
            if 5 + descriptors_length > entry.len() {
                return Err(PsiError::Malformed("SDT descriptor loop overruns section"));
            }
            let descriptors = &entry[5..5 + descriptors_length];

            sdt.services.push(SdtService {
                service_id: u16::from_be_bytes([entry[0], entry[1]]),
                eit_schedule_flag: entry[2] & 0x02 != 0,
                eit_present_following_flag: entry[2] & 0x01 != 0,
                running_status: (entry[3] >> 5) & 0x07,
                free_ca_mode: entry[3] & 0x10 != 0,
                service_descriptor: Descriptors::new(descriptors)
                    .find_tag(descriptor_tag::SERVICE)
                    .and_then(|d| ServiceDescriptor::parse(d).ok()),
            });

            offset += 5 + descriptors_length;
        }

        Ok(sdt)
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
