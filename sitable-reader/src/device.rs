//! Contract between readers and the device that delivers sections.

use std::fmt;
use std::sync::Arc;

use sitable_psi::{SectionSink, StreamKind};

use crate::error::DeviceError;

/// Opaque registration handle issued by a [`Device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(u64);

impl ConsumerId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A source of framed sections, e.g. a tuner's demultiplexer.
///
/// Implementations call [`SectionSink::on_section`] at most once at a time per
/// registration, but possibly from a different thread each time.
pub trait Device: Send + Sync {
    /// Register `sink` for sections on `pid`. Delivery starts disabled.
    fn add_consumer(
        &self,
        pid: u16,
        sink: Arc<dyn SectionSink>,
        kind: StreamKind,
    ) -> Result<ConsumerId, DeviceError>;

    /// `Some(true)` starts delivery, `Some(false)` pauses it and `None`
    /// removes the registration.
    ///
    /// Must tolerate handles that are already gone without affecting other
    /// registrations.
    fn set_consumer_state(&self, id: ConsumerId, state: Option<bool>) -> Result<(), DeviceError>;
}
