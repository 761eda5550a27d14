//! Descriptor loops and the few descriptors the SDT needs.

use serde::Serialize;

use crate::error::PsiError;

/// Iterator over `(tag, body)` pairs of a descriptor loop.
///
/// Stops at the first descriptor whose declared length runs past the loop.
pub struct Descriptors<'a> {
    data: &'a [u8],
}

impl<'a> Descriptors<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Body of the first descriptor with `tag`.
    pub fn find_tag(self, tag: u8) -> Option<&'a [u8]> {
        self.into_iter().find(|(t, _)| *t == tag).map(|(_, d)| d)
    }
}

impl<'a> Iterator for Descriptors<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < 2 {
            return None;
        }
        let tag = self.data[0];
        let length = self.data[1] as usize;
        if 2 + length > self.data.len() {
            self.data = &[];
            return None;
        }
        let body = &self.data[2..2 + length];
        self.data = &self.data[2 + length..];
        Some((tag, body))
    }
}

/// Service descriptor (0x48).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServiceDescriptor {
    /// Service type.
    pub service_type: u8,
    /// Service provider name.
    pub provider_name: String,
    /// Service name.
    pub service_name: String,
}

impl ServiceDescriptor {
    /// Parse a service descriptor body.
    pub fn parse(data: &[u8]) -> Result<Self, PsiError> {
        if data.len() < 3 {
            return Err(PsiError::Malformed("service descriptor too short"));
        }

        let service_type = data[0];
        let provider_len = data[1] as usize;
        let name_offset = 2 + provider_len;
        if data.len() < name_offset + 1 {
            return Err(PsiError::Malformed("invalid provider name length"));
        }

        let name_len = data[name_offset] as usize;
        if data.len() < name_offset + 1 + name_len {
            return Err(PsiError::Malformed("invalid service name length"));
        }

        Ok(ServiceDescriptor {
            service_type,
            provider_name: decode_text(&data[2..name_offset]),
            service_name: decode_text(&data[name_offset + 1..name_offset + 1 + name_len]),
        })
    }

    /// Get human-readable service type name.
    pub fn service_type_name(&self) -> &'static str {
        match self.service_type {
            0x01 => "Digital TV",
            0x02 => "Digital Audio",
            0x0C => "Data Service",
            0xA1..=0xAC => "ISDB special service",
            0xC0 => "1seg (ISDB)",
            _ => "Unknown",
        }
    }
}

/// Decode descriptor text.
///
/// A leading character-table selector is skipped. Valid UTF-8 is kept as-is;
/// anything else is reduced to its printable ASCII with `?` for the rest.
pub fn decode_text(data: &[u8]) -> String {
    let slice = match data.first() {
        Some(&b) if b < 0x20 => &data[1..],
        _ => data,
    };

    if let Ok(s) = std::str::from_utf8(slice) {
        return s.to_string();
    }

    slice
        .iter()
        .filter(|&&b| b >= 0x20 || b == 0x0A || b == 0x0D)
        .map(|&b| if b.is_ascii() { b as char } else { '?' })
        .collect()
}
