//! Text and JSON rendering of completed tables.

use std::fmt::Write as _;

use serde::Serialize;
use serde_json::{json, Value};
use sitable_psi::{PatTable, RawSection, SdtTable, Table};

use crate::selection::TableSelection;

/// Table types the dump knows how to print.
pub trait Render: Table {
    fn render_text(sections: &[Self], out: &mut String);

    fn to_json(sections: &[Self]) -> Value;
}

impl Render for PatTable {
    fn render_text(sections: &[Self], out: &mut String) {
        for pat in sections {
            let _ = writeln!(
                out,
                "  section {}/{} transport_stream_id=0x{:04X}",
                pat.section_number, pat.last_section_number, pat.transport_stream_id
            );
            if let Some(nit) = pat.nit_pid {
                let _ = writeln!(out, "    NIT PID 0x{:04X}", nit);
            }
        }
        for program in PatTable::programs_of(sections) {
            let _ = writeln!(
                out,
                "    program 0x{:04X} -> PMT PID 0x{:04X}",
                program.program_number, program.pid
            );
        }
    }

    fn to_json(sections: &[Self]) -> Value {
        serde_json::to_value(sections).unwrap_or(Value::Null)
    }
}

impl Render for SdtTable {
    fn render_text(sections: &[Self], out: &mut String) {
        for sdt in sections {
            let _ = writeln!(
                out,
                "  section {}/{} {} transport_stream_id=0x{:04X} original_network_id=0x{:04X}",
                sdt.section_number,
                sdt.last_section_number,
                if sdt.is_actual() { "actual" } else { "other" },
                sdt.transport_stream_id,
                sdt.original_network_id
            );
            for service in &sdt.services {
                let _ = writeln!(
                    out,
                    "    service 0x{:04X} {:?} [{}]{}",
                    service.service_id,
                    service.service_name().unwrap_or(""),
                    service.running_status_name(),
                    if service.free_ca_mode { " scrambled" } else { "" }
                );
            }
        }
    }

    fn to_json(sections: &[Self]) -> Value {
        serde_json::to_value(sections).unwrap_or(Value::Null)
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{:02x}", b);
        s
    })
}

impl Render for RawSection {
    fn render_text(sections: &[Self], out: &mut String) {
        for raw in sections {
            let _ = writeln!(
                out,
                "  section {}/{} table_id=0x{:02X} extension=0x{:04X} {} bytes",
                raw.section_number,
                raw.last_section_number,
                raw.table_id,
                raw.table_id_extension,
                raw.payload.len()
            );
        }
    }

    fn to_json(sections: &[Self]) -> Value {
        sections
            .iter()
            .map(|raw| {
                json!({
                    "table_id": raw.table_id,
                    "table_id_extension": raw.table_id_extension,
                    "version_number": raw.version,
                    "section_number": raw.section_number,
                    "last_section_number": raw.last_section_number,
                    "payload": hex(&raw.payload),
                })
            })
            .collect()
    }
}

/// Outcome of reading one table.
#[derive(Debug, Serialize)]
pub struct Report {
    pub table: String,
    pub pid: u16,
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u8>,
    #[serde(skip_serializing)]
    text: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub sections: Value,
}

impl Report {
    pub fn new<T: Render>(selection: TableSelection, sections: &[T]) -> Self {
        let Some(first) = sections.first() else {
            return Self::unavailable(selection);
        };

        let mut text = String::new();
        T::render_text(sections, &mut text);
        Self {
            table: selection.to_string(),
            pid: selection.pid(),
            complete: true,
            version: Some(first.version()),
            text,
            sections: T::to_json(sections),
        }
    }

    pub fn unavailable(selection: TableSelection) -> Self {
        Self {
            table: selection.to_string(),
            pid: selection.pid(),
            complete: false,
            version: None,
            text: String::new(),
            sections: Value::Null,
        }
    }

    pub fn to_text(&self) -> String {
        match self.version {
            Some(version) if self.complete => format!(
                "{} (PID 0x{:04X}) version {}\n{}",
                self.table, self.pid, version, self.text
            ),
            _ => format!("{} (PID 0x{:04X}) unavailable\n", self.table, self.pid),
        }
    }
}
