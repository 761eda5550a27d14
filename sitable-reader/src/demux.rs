//! In-memory demultiplexer.
//!
//! Splits a transport stream fed in arbitrary chunks into sections per PID
//! and hands each section to the consumers registered for that PID. This is
//! the [`Device`] used when reading from a file or a pipe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, trace};
use parking_lot::Mutex;
use sitable_psi::{SectionCollector, SectionSink, StreamKind, TsPacketIterator};

use crate::device::{ConsumerId, Device};
use crate::error::DeviceError;

struct Consumer {
    pid: u16,
    sink: Arc<dyn SectionSink>,
    kind: StreamKind,
    enabled: bool,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    consumers: HashMap<ConsumerId, Consumer>,
    closed: bool,
}

impl Registry {
    fn wants(&self, pid: u16) -> bool {
        self.consumers.values().any(|c| c.enabled && c.pid == pid)
    }

    fn sinks_for(&self, pid: u16) -> Vec<Arc<dyn SectionSink>> {
        self.consumers
            .values()
            .filter(|c| c.enabled && c.pid == pid)
            .map(|c| Arc::clone(&c.sink))
            .collect()
    }
}

#[derive(Default)]
struct FeedState {
    /// Trailing bytes of an incomplete packet.
    pending: Vec<u8>,
    collectors: HashMap<u16, SectionCollector>,
}

/// Demultiplexer implementing [`Device`] over a fed byte stream.
#[derive(Default)]
pub struct Demux {
    registry: Mutex<Registry>,
    /// Held for the whole of a `feed` call.
    feed: Mutex<FeedState>,
    packets: AtomicU64,
    sections: AtomicU64,
}

impl Demux {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Feed transport stream bytes.
    ///
    /// Chunks need not be packet aligned. Sections are delivered on the
    /// calling thread before this returns. Sinks must not call `feed`.
    pub fn feed(&self, data: &[u8]) {
        let mut state = self.feed.lock();
        let FeedState {
            pending,
            collectors,
        } = &mut *state;
        pending.extend_from_slice(data);

        let mut packets = TsPacketIterator::new(&pending[..]);
        let mut completed: Vec<(u16, Vec<u8>)> = Vec::new();
        let mut count = 0u64;

        for packet in packets.by_ref() {
            count += 1;
            let pid = packet.header.pid;

            if !self.registry.lock().wants(pid) {
                collectors.remove(&pid);
                continue;
            }

            collectors
                .entry(pid)
                .or_default()
                .push_packet(&packet, |section| completed.push((pid, section.to_vec())));

            for (pid, section) in completed.drain(..) {
                self.deliver(pid, &section);
            }
        }

        let consumed = packets.consumed();
        pending.drain(..consumed);

        self.packets.fetch_add(count, Ordering::Relaxed);
    }

    fn deliver(&self, pid: u16, section: &[u8]) {
        let sinks = self.registry.lock().sinks_for(pid);
        if sinks.is_empty() {
            return;
        }
        trace!("PID 0x{:04X}: section of {} bytes to {} consumer(s)", pid, section.len(), sinks.len());
        self.sections.fetch_add(1, Ordering::Relaxed);
        for sink in &sinks {
            sink.on_section(section);
        }
    }

    /// Remove every registration. Later registrations are refused.
    ///
    /// May be called from a sink. Per-PID collectors are dropped by the next
    /// `feed` once no consumer wants their PID.
    pub fn close(&self) {
        let removed = {
            let mut registry = self.registry.lock();
            registry.closed = true;
            let removed = registry.consumers.len();
            registry.consumers.clear();
            removed
        };
        info!("Demux closed, {} registration(s) dropped", removed);
    }

    pub fn is_closed(&self) -> bool {
        self.registry.lock().closed
    }

    /// Number of registered consumers, enabled or not.
    pub fn consumer_count(&self) -> usize {
        self.registry.lock().consumers.len()
    }

    /// Number of consumers currently receiving sections.
    pub fn enabled_count(&self) -> usize {
        self.registry.lock().consumers.values().filter(|c| c.enabled).count()
    }

    /// Packets seen so far.
    pub fn packet_count(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    /// Sections handed to at least one consumer so far.
    pub fn section_count(&self) -> u64 {
        self.sections.load(Ordering::Relaxed)
    }
}

impl Device for Demux {
    fn add_consumer(
        &self,
        pid: u16,
        sink: Arc<dyn SectionSink>,
        kind: StreamKind,
    ) -> Result<ConsumerId, DeviceError> {
        let mut registry = self.registry.lock();
        if registry.closed {
            return Err(DeviceError::Closed);
        }
        registry.next_id += 1;
        let id = ConsumerId::new(registry.next_id);
        registry.consumers.insert(
            id,
            Consumer {
                pid,
                sink,
                kind,
                enabled: false,
            },
        );
        debug!("Consumer {} added for PID 0x{:04X} ({})", id, pid, kind);
        Ok(id)
    }

    fn set_consumer_state(&self, id: ConsumerId, state: Option<bool>) -> Result<(), DeviceError> {
        let mut registry = self.registry.lock();
        match state {
            Some(enabled) => {
                let consumer = registry
                    .consumers
                    .get_mut(&id)
                    .ok_or(DeviceError::UnknownConsumer(id))?;
                consumer.enabled = enabled;
                debug!(
                    "Consumer {} on PID 0x{:04X} ({}) {}",
                    id,
                    consumer.pid,
                    consumer.kind,
                    if enabled { "enabled" } else { "paused" }
                );
                Ok(())
            }
            None => {
                let consumer = registry
                    .consumers
                    .remove(&id)
                    .ok_or(DeviceError::UnknownConsumer(id))?;
                debug!("Consumer {} on PID 0x{:04X} removed", id, consumer.pid);
                Ok(())
            }
        }
    }
}
