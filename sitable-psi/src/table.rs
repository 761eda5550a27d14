//! Typed section records handed to the reassembly layer.

use bytes::Bytes;
use serde::Serialize;

use crate::error::PsiError;
use crate::section::PsiSection;

/// Section framing a table is carried in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    /// Short sections: no version, no section numbering, no CRC.
    Standard,
    /// Long sections with the extended header and CRC-32.
    Extended,
}

impl StreamKind {
    /// Whether a section of this framing is acceptable to this kind.
    pub fn accepts(self, section: &PsiSection<'_>) -> bool {
        match self {
            StreamKind::Standard => true,
            StreamKind::Extended => {
                section.header.section_syntax_indicator && section.header.current_next_indicator
            }
        }
    }
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamKind::Standard => write!(f, "standard"),
            StreamKind::Extended => write!(f, "extended"),
        }
    }
}

impl std::str::FromStr for StreamKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" | "short" => Ok(StreamKind::Standard),
            "extended" | "long" => Ok(StreamKind::Extended),
            other => Err(format!("unknown stream kind: {}", other)),
        }
    }
}

/// One section of a (possibly multi-section) table.
///
/// `version`, `current_section` and `last_section` are all the reassembly
/// layer looks at; everything else is table specific.
pub trait Table: Sized + Send + Sync + 'static {
    /// Decode one section.
    fn parse(section: &PsiSection<'_>) -> Result<Self, PsiError>;

    /// Edition tag shared by all sections of one table edition.
    fn version(&self) -> u8;

    /// Zero-based index of this section.
    fn current_section(&self) -> u8;

    /// Zero-based index of the final section (total sections - 1).
    fn last_section(&self) -> u8;
}

/// An uninterpreted section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSection {
    pub table_id: u8,
    pub table_id_extension: u16,
    pub version: u8,
    pub section_number: u8,
    pub last_section_number: u8,
    /// Section body between header and CRC.
    pub payload: Bytes,
}

impl RawSection {
    /// A record carrying only position metadata.
    pub fn new(version: u8, section_number: u8, last_section_number: u8) -> Self {
        Self {
            table_id: 0,
            table_id_extension: 0,
            version,
            section_number,
            last_section_number,
            payload: Bytes::new(),
        }
    }
}

impl Table for RawSection {
    fn parse(section: &PsiSection<'_>) -> Result<Self, PsiError> {
        Ok(RawSection {
            table_id: section.header.table_id,
            table_id_extension: section.header.table_id_extension,
            version: section.header.version_number,
            section_number: section.header.section_number,
            last_section_number: section.header.last_section_number,
            payload: Bytes::copy_from_slice(section.data),
        })
    }

    fn version(&self) -> u8 {
        self.version
    }

    fn current_section(&self) -> u8 {
        self.section_number
    }

    fn last_section(&self) -> u8 {
        self.last_section_number
    }
}
