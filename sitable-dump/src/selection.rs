//! Which tables to read, as given on the command line or in the config file.

use std::fmt;
use std::str::FromStr;

use sitable_psi::{pid, StreamKind};
use thiserror::Error;

/// Highest valid PID.
const MAX_PID: u16 = 0x1FFF;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("unknown table '{0}' (expected pat, sdt or raw:PID[:KIND])")]
    UnknownTable(String),
    #[error("invalid PID '{0}'")]
    InvalidPid(String),
    #[error("{0}")]
    InvalidKind(String),
}

/// One table to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableSelection {
    Pat,
    Sdt,
    /// Any table on `pid`, sections kept undecoded.
    Raw { pid: u16, kind: StreamKind },
}

impl TableSelection {
    pub fn pid(&self) -> u16 {
        match self {
            TableSelection::Pat => pid::PAT,
            TableSelection::Sdt => pid::SDT,
            TableSelection::Raw { pid, .. } => *pid,
        }
    }

    pub fn kind(&self) -> StreamKind {
        match self {
            TableSelection::Pat | TableSelection::Sdt => StreamKind::Extended,
            TableSelection::Raw { kind, .. } => *kind,
        }
    }

    /// Tables read when none are requested.
    pub fn defaults() -> Vec<TableSelection> {
        vec![TableSelection::Pat, TableSelection::Sdt]
    }
}

fn parse_pid(s: &str) -> Result<u16, SelectionError> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    };
    match parsed {
        Ok(pid) if pid <= MAX_PID => Ok(pid),
        _ => Err(SelectionError::InvalidPid(s.to_string())),
    }
}

impl FromStr for TableSelection {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "pat" => return Ok(TableSelection::Pat),
            "sdt" => return Ok(TableSelection::Sdt),
            _ => {}
        }

        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(raw), Some(pid), kind, None) if raw.eq_ignore_ascii_case("raw") => {
                let pid = parse_pid(pid)?;
                let kind = match kind {
                    Some(kind) => kind.parse().map_err(SelectionError::InvalidKind)?,
                    None => StreamKind::Extended,
                };
                Ok(TableSelection::Raw { pid, kind })
            }
            _ => Err(SelectionError::UnknownTable(s.to_string())),
        }
    }
}

impl fmt::Display for TableSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableSelection::Pat => write!(f, "pat"),
            TableSelection::Sdt => write!(f, "sdt"),
            TableSelection::Raw { pid, kind } => write!(f, "raw:0x{:04X}:{}", pid, kind),
        }
    }
}
