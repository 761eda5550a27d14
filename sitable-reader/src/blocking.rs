//! Blocking/polling table reader.
//!
//! A [`TableReader`] registers with the device as soon as it is created and
//! collects sections on the device's delivery thread. Callers either poll
//! [`TableReader::wait_for_tables`], block on the [`CompletionSignal`]
//! together with other events, or pass a callback that runs on the delivery
//! thread the moment the table is complete.

use std::sync::atomic::{fence, AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use log::{debug, trace};
use parking_lot::Mutex;
use sitable_psi::{SectionSink, StreamKind, Table, TableParser};

use crate::assembly::{Assembly, Progress};
use crate::device::Device;
use crate::error::ReaderError;
use crate::registration::{Registration, RegistrationState};
use crate::signal::CompletionSignal;

/// Completed sections of one table edition, ordered by section number.
pub type Tables<T> = Arc<[T]>;

/// Callback run on the delivery thread when a table completes.
///
/// It runs before the signal is raised, so anything slow in here delays
/// every waiter.
pub type CompletionCallback<T> = Box<dyn Fn(&[T]) + Send + Sync>;

struct Shared<T: Table> {
    /// Cleared on completion and on cancel; checked under the assembly lock.
    active: AtomicBool,
    assembly: Mutex<Assembly<T>>,
    result: OnceLock<Tables<T>>,
    signal: CompletionSignal,
    on_complete: Option<CompletionCallback<T>>,
    pid: u16,
}

impl<T: Table> Shared<T> {
    fn on_table(&self, table: T) {
        let mut assembly = self.assembly.lock();
        if !self.active.load(Ordering::Acquire) {
            trace!("Reader for PID 0x{:04X} inactive, dropping section", self.pid);
            return;
        }

        match assembly.accept(table) {
            Progress::Complete => {}
            Progress::Collecting { collected, total } => {
                trace!("PID 0x{:04X}: {}/{} sections", self.pid, collected, total);
                return;
            }
            Progress::Ignored => return,
        }

        // Lock out further sections
        self.active.store(false, Ordering::Release);

        let Some(tables) = assembly.take() else {
            return;
        };
        drop(assembly);

        let tables: Tables<T> = tables.into();
        debug!("PID 0x{:04X}: table complete with {} sections", self.pid, tables.len());

        if let Some(on_complete) = &self.on_complete {
            on_complete(&tables);
        }

        let _ = self.result.set(tables);

        // Waking threads must see the whole buffer
        fence(Ordering::SeqCst);

        self.signal.set();
    }

    fn deactivate(&self) {
        let _assembly = self.assembly.lock();
        self.active.store(false, Ordering::Release);
    }
}

/// Reads one multi-section table from a device.
///
/// Dropping the reader cancels it.
pub struct TableReader<T: Table> {
    shared: Arc<Shared<T>>,
    parser: Arc<TableParser<T>>,
    registration: Registration,
}

impl<T: Table> TableReader<T> {
    fn assemble(
        registration: Registration,
        pid: u16,
        kind: StreamKind,
        on_complete: Option<CompletionCallback<T>>,
    ) -> Self {
        let shared = Arc::new(Shared {
            active: AtomicBool::new(true),
            assembly: Mutex::new(Assembly::new()),
            result: OnceLock::new(),
            signal: CompletionSignal::new(),
            on_complete,
            pid,
        });

        let target = Arc::clone(&shared);
        let parser = Arc::new(TableParser::new(kind, move |table: T| target.on_table(table)));

        Self {
            shared,
            parser,
            registration,
        }
    }

    /// Register with `device` for `pid` and start collecting.
    ///
    /// Without a device nothing is registered; sections are then pumped in
    /// through [`process_data`](Self::process_data).
    pub fn new(
        device: Option<Arc<dyn Device>>,
        pid: u16,
        kind: StreamKind,
        on_complete: Option<CompletionCallback<T>>,
    ) -> Result<Self, ReaderError> {
        let reader = Self::assemble(Registration::new(device), pid, kind, on_complete);
        let sink: Arc<dyn SectionSink> = reader.parser.clone();
        // Dropping the reader on failure deactivates it.
        reader.registration.register(pid, sink, kind)?;
        Ok(reader)
    }

    /// Reader fed only through [`process_data`](Self::process_data).
    pub fn detached(kind: StreamKind, on_complete: Option<CompletionCallback<T>>) -> Self {
        Self::assemble(Registration::detached(), 0, kind, on_complete)
    }

    /// Feed a raw section byte stream directly.
    pub fn process_data(&self, data: &[u8]) {
        self.parser.add_payload(data);
    }

    /// Stop collecting and deregister. Safe to call any number of times
    /// from any thread; a completed result stays available.
    pub fn cancel(&self) {
        self.shared.deactivate();
        self.registration.deregister();
    }

    /// Wait up to `timeout` for the table.
    ///
    /// Returns `None` on timeout, leaving the reader registered for another
    /// attempt. Once the table is complete the reader deregisters and every
    /// call returns the same sections.
    pub fn wait_for_tables(&self, timeout: Duration) -> Option<Tables<T>> {
        if !self.shared.signal.wait_timeout(timeout) {
            return None;
        }

        self.cancel();

        self.shared.result.get().cloned()
    }

    /// Signal raised when the table is complete.
    pub fn signal(&self) -> &CompletionSignal {
        &self.shared.signal
    }

    /// Whether the table is complete.
    pub fn is_complete(&self) -> bool {
        self.shared.signal.is_set()
    }

    /// Registration lifecycle state.
    pub fn state(&self) -> RegistrationState {
        self.registration.state()
    }

    /// Sections collected for the edition in progress.
    pub fn collected(&self) -> usize {
        self.shared.assembly.lock().collected()
    }
}

impl<T: Table> Drop for TableReader<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}
