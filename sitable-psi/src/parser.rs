//! Turns raw section bytes into typed table records.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, trace};
use parking_lot::Mutex;

use crate::error::PsiError;
use crate::section::{PsiSection, SectionSplitter};
use crate::table::{StreamKind, Table};

/// Receiver of framed sections, as registered with a device.
pub trait SectionSink: Send + Sync {
    /// Called once per complete section, on the delivery thread.
    fn on_section(&self, section: &[u8]);
}

impl<F> SectionSink for F
where
    F: Fn(&[u8]) + Send + Sync,
{
    fn on_section(&self, section: &[u8]) {
        self(section)
    }
}

/// Parser for one table type.
///
/// Every accepted section is decoded into `T` and handed to the callback.
/// Sections that fail framing, CRC or decoding are dropped.
pub struct TableParser<T: Table> {
    kind: StreamKind,
    callback: Box<dyn Fn(T) + Send + Sync>,
    splitter: Mutex<SectionSplitter>,
    rejected: AtomicU64,
    _table: PhantomData<fn() -> T>,
}

impl<T: Table> TableParser<T> {
    /// Create a parser delivering decoded sections to `callback`.
    pub fn new<F>(kind: StreamKind, callback: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            kind,
            callback: Box::new(callback),
            splitter: Mutex::new(SectionSplitter::new()),
            rejected: AtomicU64::new(0),
            _table: PhantomData,
        }
    }

    /// Framing this parser accepts.
    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    /// Number of sections dropped so far.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Feed a raw byte stream of back-to-back sections.
    ///
    /// Sections may be split at arbitrary boundaries across calls.
    pub fn add_payload(&self, data: &[u8]) {
        let mut splitter = self.splitter.lock();
        splitter.push(data, |section| self.consume_section(section));
    }

    /// Decode one complete section.
    pub fn consume_section(&self, data: &[u8]) {
        match self.decode(data) {
            Ok(Some(table)) => (self.callback)(table),
            Ok(None) => {}
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                debug!("Dropping {} section: {}", self.kind, e);
            }
        }
    }

    fn decode(&self, data: &[u8]) -> Result<Option<T>, PsiError> {
        let section = PsiSection::parse(data)?;
        if !self.kind.accepts(&section) {
            trace!(
                "Ignoring section 0x{:02X} not matching {} framing",
                section.header.table_id,
                self.kind
            );
            return Ok(None);
        }
        if self.kind == StreamKind::Extended {
            section.verify_crc()?;
        }
        T::parse(&section).map(Some)
    }
}

impl<T: Table> SectionSink for TableParser<T> {
    fn on_section(&self, section: &[u8]) {
        self.consume_section(section);
    }
}
