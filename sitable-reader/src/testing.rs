//! Recording device used by the unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use sitable_psi::{SectionSink, StreamKind};

use crate::device::{ConsumerId, Device};
use crate::error::DeviceError;

struct Consumer {
    pid: u16,
    sink: Arc<dyn SectionSink>,
    enabled: bool,
}

#[derive(Default)]
struct State {
    next_id: u64,
    consumers: HashMap<ConsumerId, Consumer>,
    adds: usize,
    removes: usize,
    fail_add: Option<DeviceError>,
    fail_enable: Option<DeviceError>,
    fail_remove: Option<DeviceError>,
}

/// In-memory [`Device`] that counts calls and lets tests push sections.
#[derive(Default)]
pub struct MockDevice {
    state: Mutex<State>,
    changed: Condvar,
    /// Runs after a successful `add_consumer`, outside the state lock.
    on_add: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl MockDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_add(&self, error: DeviceError) {
        self.state.lock().fail_add = Some(error);
    }

    pub fn fail_enable(&self, error: DeviceError) {
        self.state.lock().fail_enable = Some(error);
    }

    pub fn fail_remove(&self, error: DeviceError) {
        self.state.lock().fail_remove = Some(error);
    }

    /// Run `hook` inside every successful `add_consumer` call.
    pub fn on_add(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.on_add.lock() = Some(Box::new(hook));
    }

    pub fn adds(&self) -> usize {
        self.state.lock().adds
    }

    pub fn removes(&self) -> usize {
        self.state.lock().removes
    }

    pub fn active_consumers(&self) -> usize {
        self.state.lock().consumers.len()
    }

    pub fn enabled(&self, id: ConsumerId) -> Option<bool> {
        self.state.lock().consumers.get(&id).map(|c| c.enabled)
    }

    /// Drop every registration as if the channel went away.
    pub fn teardown(&self) {
        self.state.lock().consumers.clear();
        self.changed.notify_all();
    }

    /// Block until `count` consumers are enabled.
    pub fn wait_for_enabled(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.consumers.values().filter(|c| c.enabled).count() >= count {
                return true;
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return false;
            }
        }
    }

    /// Deliver one section to every enabled consumer on `pid`.
    pub fn deliver(&self, pid: u16, section: &[u8]) -> usize {
        let sinks: Vec<Arc<dyn SectionSink>> = self
            .state
            .lock()
            .consumers
            .values()
            .filter(|c| c.enabled && c.pid == pid)
            .map(|c| Arc::clone(&c.sink))
            .collect();
        for sink in &sinks {
            sink.on_section(section);
        }
        sinks.len()
    }
}

impl Device for MockDevice {
    fn add_consumer(
        &self,
        pid: u16,
        sink: Arc<dyn SectionSink>,
        _kind: StreamKind,
    ) -> Result<ConsumerId, DeviceError> {
        let id = {
            let mut state = self.state.lock();
            state.adds += 1;
            if let Some(e) = state.fail_add.clone() {
                return Err(e);
            }
            state.next_id += 1;
            let id = ConsumerId::new(state.next_id);
            state.consumers.insert(
                id,
                Consumer {
                    pid,
                    sink,
                    enabled: false,
                },
            );
            id
        };
        if let Some(hook) = self.on_add.lock().as_ref() {
            hook();
        }
        Ok(id)
    }

    fn set_consumer_state(&self, id: ConsumerId, enabled: Option<bool>) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        let result = match enabled {
            Some(on) => {
                if on {
                    if let Some(e) = state.fail_enable.clone() {
                        return Err(e);
                    }
                }
                let consumer = state
                    .consumers
                    .get_mut(&id)
                    .ok_or(DeviceError::UnknownConsumer(id))?;
                consumer.enabled = on;
                Ok(())
            }
            None => {
                state.removes += 1;
                let removed = state.consumers.remove(&id);
                match state.fail_remove.clone() {
                    Some(e) => Err(e),
                    None if removed.is_none() => Err(DeviceError::UnknownConsumer(id)),
                    None => Ok(()),
                }
            }
        };
        drop(state);
        self.changed.notify_all();
        result
    }
}
