//! Device registration with exactly-once teardown.
//!
//! Natural completion, explicit cancel, timeout and drop all end up in
//! [`Registration::deregister`]; an atomic state transition decides which
//! caller actually talks to the device.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;
use sitable_psi::{SectionSink, StreamKind};

use crate::device::{ConsumerId, Device};
use crate::error::ReaderError;

const UNREGISTERED: u8 = 0;
const REGISTERED: u8 = 1;
const DEREGISTERED: u8 = 2;

/// Lifecycle of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registered,
    Deregistered,
}

/// One reader's subscription to a device.
///
/// Without a device the registration is purely logical: sections are then
/// pumped in by the owner and there is nothing to tear down.
pub struct Registration {
    device: Option<Arc<dyn Device>>,
    state: AtomicU8,
    consumer: Mutex<Option<ConsumerId>>,
}

impl Registration {
    pub fn new(device: Option<Arc<dyn Device>>) -> Self {
        Self {
            device,
            state: AtomicU8::new(UNREGISTERED),
            consumer: Mutex::new(None),
        }
    }

    /// Logical registration with no device, already registered.
    pub fn detached() -> Self {
        Self {
            device: None,
            state: AtomicU8::new(REGISTERED),
            consumer: Mutex::new(None),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RegistrationState {
        match self.state.load(Ordering::Acquire) {
            UNREGISTERED => RegistrationState::Unregistered,
            REGISTERED => RegistrationState::Registered,
            _ => RegistrationState::Deregistered,
        }
    }

    /// Handle obtained from the device, while registered.
    pub fn consumer_id(&self) -> Option<ConsumerId> {
        *self.consumer.lock()
    }

    /// Register `sink` for `pid` and start delivery.
    ///
    /// On failure no handle is left behind and the registration ends up
    /// deregistered. If [`deregister`](Self::deregister) ran concurrently, the
    /// freshly obtained handle is removed again before returning.
    pub fn register(
        &self,
        pid: u16,
        sink: Arc<dyn SectionSink>,
        kind: StreamKind,
    ) -> Result<(), ReaderError> {
        let Some(device) = &self.device else {
            if self
                .state
                .compare_exchange(UNREGISTERED, REGISTERED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                debug!("Skipping registration for PID 0x{:04X}: already torn down", pid);
            }
            return Ok(());
        };

        if self.state.load(Ordering::Acquire) != UNREGISTERED {
            debug!("Skipping registration for PID 0x{:04X}: already torn down", pid);
            return Ok(());
        }

        let id = match device.add_consumer(pid, sink, kind) {
            Ok(id) => id,
            Err(e) => {
                self.state.store(DEREGISTERED, Ordering::Release);
                return Err(ReaderError::Registration(e));
            }
        };

        if let Err(e) = device.set_consumer_state(id, Some(true)) {
            remove_quietly(device.as_ref(), id);
            self.state.store(DEREGISTERED, Ordering::Release);
            return Err(ReaderError::Enable(e));
        }

        *self.consumer.lock() = Some(id);

        if self
            .state
            .compare_exchange(UNREGISTERED, REGISTERED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Cancelled while we were registering.
            debug!("Registration {} cancelled during setup", id);
            if let Some(id) = self.consumer.lock().take() {
                remove_quietly(device.as_ref(), id);
            }
            return Ok(());
        }

        debug!("Registered consumer {} for PID 0x{:04X} ({})", id, pid, kind);
        Ok(())
    }

    /// Stop delivery and forget the handle.
    ///
    /// Only the first call does anything. Device failures are logged and
    /// swallowed; the handle is forgotten regardless.
    pub fn deregister(&self) {
        let previous = self.state.swap(DEREGISTERED, Ordering::AcqRel);
        if previous != REGISTERED {
            return;
        }

        let Some(id) = self.consumer.lock().take() else {
            return;
        };
        if let Some(device) = &self.device {
            remove_quietly(device.as_ref(), id);
            debug!("Deregistered consumer {}", id);
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.deregister();
    }
}

fn remove_quietly(device: &dyn Device, id: ConsumerId) {
    if let Err(e) = device.set_consumer_state(id, None) {
        warn!("Failed to remove consumer {}: {}", id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeviceError;
    use crate::testing::MockDevice;

    fn sink() -> Arc<dyn SectionSink> {
        Arc::new(|_: &[u8]| {})
    }

    #[test]
    fn test_register_enables_delivery() {
        let device = MockDevice::new();
        let registration = Registration::new(Some(device.clone()));
        registration.register(0x11, sink(), StreamKind::Extended).unwrap();

        assert_eq!(registration.state(), RegistrationState::Registered);
        let id = registration.consumer_id().unwrap();
        assert_eq!(device.enabled(id), Some(true));
        assert_eq!(device.adds(), 1);
    }

    #[test]
    fn test_deregister_runs_once() {
        let device = MockDevice::new();
        let registration = Registration::new(Some(device.clone()));
        registration.register(0x11, sink(), StreamKind::Extended).unwrap();

        registration.deregister();
        registration.deregister();
        drop(registration);

        assert_eq!(device.removes(), 1);
        assert_eq!(device.active_consumers(), 0);
    }

    #[test]
    fn test_add_failure_leaves_nothing() {
        let device = MockDevice::new();
        device.fail_add(DeviceError::Closed);
        let registration = Registration::new(Some(device.clone()));

        let err = registration.register(0x11, sink(), StreamKind::Extended).unwrap_err();
        assert_eq!(err, ReaderError::Registration(DeviceError::Closed));
        assert_eq!(registration.state(), RegistrationState::Deregistered);

        registration.deregister();
        assert_eq!(device.removes(), 0);
    }

    #[test]
    fn test_enable_failure_removes_handle() {
        let device = MockDevice::new();
        device.fail_enable(DeviceError::Rejected("busy".into()));
        let registration = Registration::new(Some(device.clone()));

        let err = registration.register(0x11, sink(), StreamKind::Extended).unwrap_err();
        assert!(matches!(err, ReaderError::Enable(_)));
        assert_eq!(device.removes(), 1);
        assert_eq!(device.active_consumers(), 0);
        assert!(registration.consumer_id().is_none());
    }

    #[test]
    fn test_deregister_before_register_skips_device() {
        let device = MockDevice::new();
        let registration = Registration::new(Some(device.clone()));
        registration.deregister();
        assert_eq!(registration.state(), RegistrationState::Deregistered);

        registration.register(0x11, sink(), StreamKind::Extended).unwrap();
        assert_eq!(device.adds(), 0);
        assert_eq!(device.removes(), 0);
        assert!(registration.consumer_id().is_none());
    }

    #[test]
    fn test_teardown_failure_is_swallowed() {
        let device = MockDevice::new();
        let registration = Registration::new(Some(device.clone()));
        registration.register(0x11, sink(), StreamKind::Extended).unwrap();

        device.fail_remove(DeviceError::Closed);
        registration.deregister();
        assert!(registration.consumer_id().is_none());
        assert_eq!(registration.state(), RegistrationState::Deregistered);
    }

    #[test]
    fn test_without_device() {
        let registration = Registration::new(None);
        registration.register(0x11, sink(), StreamKind::Standard).unwrap();
        assert_eq!(registration.state(), RegistrationState::Registered);
        registration.deregister();
        assert_eq!(registration.state(), RegistrationState::Deregistered);
    }

    #[test]
    fn test_deregister_during_setup_removes_new_handle() {
        let device = MockDevice::new();
        let registration = Arc::new(Registration::new(Some(device.clone())));
        let racer = Arc::downgrade(&registration);
        device.on_add(move || {
            if let Some(registration) = racer.upgrade() {
                registration.deregister();
            }
        });

        registration.register(0x11, sink(), StreamKind::Extended).unwrap();

        assert_eq!(registration.state(), RegistrationState::Deregistered);
        assert!(registration.consumer_id().is_none());
        assert_eq!(device.adds(), 1);
        assert_eq!(device.removes(), 1);
        assert_eq!(device.active_consumers(), 0);

        registration.deregister();
        assert_eq!(device.removes(), 1);
    }

    #[test]
    fn test_detached_starts_registered() {
        let registration = Registration::detached();
        assert_eq!(registration.state(), RegistrationState::Registered);
        registration.register(0x11, sink(), StreamKind::Standard).unwrap();
        assert_eq!(registration.state(), RegistrationState::Registered);
        registration.deregister();
        assert_eq!(registration.state(), RegistrationState::Deregistered);
    }
}
