//! Awaitable table reader.
//!
//! [`AsyncTableReader::create`] starts the work right away on tokio's
//! blocking pool: register, enable delivery, then sleep on a condition
//! variable until the table is complete or cancellation is requested. The
//! reader itself is a future resolving to the sections, or to an empty `Vec`
//! when cancelled or when no data could be obtained.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use log::{debug, trace, warn};
use parking_lot::{Condvar, Mutex};
use sitable_psi::{SectionSink, StreamKind, Table, TableParser};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::assembly::{Assembly, Progress};
use crate::device::Device;
use crate::error::ReaderError;
use crate::registration::Registration;

struct Shared<T: Table> {
    assembly: Mutex<Assembly<T>>,
    /// Cleared once the body stops waiting; checked under the assembly lock.
    active: AtomicBool,
    wakeup: Condvar,
    cancel: CancellationToken,
    /// Cancelled when the body returns; stops pending timers.
    finished: CancellationToken,
    pid: u16,
}

impl<T: Table> Shared<T> {
    /// Delivery thread entry point.
    fn process_table(&self, table: T) {
        let mut assembly = self.assembly.lock();
        if !self.active.load(Ordering::Acquire) {
            return;
        }

        match assembly.accept(table) {
            Progress::Complete => {
                debug!("PID 0x{:04X}: table complete", self.pid);
                self.wakeup.notify_all();
            }
            Progress::Collecting { collected, total } => {
                trace!("PID 0x{:04X}: {}/{} sections", self.pid, collected, total);
            }
            Progress::Ignored => {}
        }
    }

    fn request_cancel(&self) {
        self.cancel.cancel();
        let _assembly = self.assembly.lock();
        self.wakeup.notify_all();
    }

    /// Sleep until the table is complete or cancellation is requested.
    fn wait(&self) -> Vec<T> {
        let mut assembly = self.assembly.lock();
        loop {
            if assembly.is_done() {
                self.active.store(false, Ordering::Release);
                return assembly.take().unwrap_or_default();
            }
            if self.cancel.is_cancelled() {
                self.active.store(false, Ordering::Release);
                return Vec::new();
            }
            self.wakeup.wait(&mut assembly);
        }
    }
}

/// The body run on the blocking pool.
fn run<T: Table>(
    shared: Arc<Shared<T>>,
    device: Arc<dyn Device>,
    pid: u16,
    kind: StreamKind,
) -> Vec<T> {
    let _finished = shared.finished.clone().drop_guard();

    if shared.cancel.is_cancelled() {
        debug!("PID 0x{:04X}: cancelled before registration", pid);
        return Vec::new();
    }

    let target = Arc::clone(&shared);
    let parser: Arc<dyn SectionSink> =
        Arc::new(TableParser::new(kind, move |table: T| target.process_table(table)));

    // Deregisters on every exit path, including unwinding.
    let registration = Registration::new(Some(device));
    if let Err(e) = registration.register(pid, parser, kind) {
        warn!("PID 0x{:04X}: {}", pid, e);
        return Vec::new();
    }

    let tables = shared.wait();
    registration.deregister();
    tables
}

/// Handle to a running table read. Await it for the result.
///
/// The result is handed out once; polling again after that resolves to an
/// empty `Vec`. Dropping the handle cancels the read.
pub struct AsyncTableReader<T: Table> {
    shared: Arc<Shared<T>>,
    task: JoinHandle<Vec<T>>,
    runtime: Handle,
    timer: Mutex<Option<JoinHandle<()>>>,
    resolved: bool,
}

impl<T: Table> AsyncTableReader<T> {
    /// Start reading `pid` from `device` on the current tokio runtime.
    pub fn create(device: Arc<dyn Device>, pid: u16, kind: StreamKind) -> Result<Self, ReaderError> {
        let runtime = Handle::try_current().map_err(|_| ReaderError::NoRuntime)?;
        Ok(Self::create_on(&runtime, device, pid, kind))
    }

    /// Start reading `pid` from `device` on `runtime`.
    pub fn create_on(runtime: &Handle, device: Arc<dyn Device>, pid: u16, kind: StreamKind) -> Self {
        let shared = Arc::new(Shared {
            assembly: Mutex::new(Assembly::new()),
            active: AtomicBool::new(true),
            wakeup: Condvar::new(),
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
            pid,
        });

        let body = Arc::clone(&shared);
        let task = runtime.spawn_blocking(move || run(body, device, pid, kind));

        Self {
            shared,
            task,
            runtime: runtime.clone(),
            timer: Mutex::new(None),
            resolved: false,
        }
    }

    /// Request cancellation. No effect once the table is complete.
    pub fn cancel(&self) {
        self.shared.request_cancel();
    }

    /// Cancel automatically after `timeout` unless finished by then.
    ///
    /// A later call replaces the previous deadline. A zero timeout cancels
    /// immediately.
    pub fn cancel_after(&self, timeout: Duration) {
        if timeout.is_zero() {
            self.cancel();
            return;
        }

        let mut timer = self.timer.lock();
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        if self.shared.finished.is_cancelled() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        *timer = Some(self.runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    debug!("PID 0x{:04X}: timed out after {:?}", shared.pid, timeout);
                    shared.request_cancel();
                }
                _ = shared.finished.cancelled() => {}
            }
        }));
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Whether the work has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<T: Table> Future for AsyncTableReader<T> {
    type Output = Vec<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.resolved {
            return Poll::Ready(Vec::new());
        }

        let pid = self.shared.pid;
        let tables = ready!(Pin::new(&mut self.task).poll(cx)).unwrap_or_else(|e| {
            warn!("PID 0x{:04X}: reader task failed: {}", pid, e);
            Vec::new()
        });
        self.resolved = true;
        Poll::Ready(tables)
    }
}

impl<T: Table> Drop for AsyncTableReader<T> {
    fn drop(&mut self) {
        self.shared.request_cancel();
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    use sitable_psi::{build_long_section, RawSection};

    use crate::error::DeviceError;
    use crate::testing::MockDevice;

    const PID: u16 = 0x0011;
    const WAIT: Duration = Duration::from_secs(5);

    fn section(version: u8, current: u8, last: u8) -> Vec<u8> {
        build_long_section(0x42, 0x7FE1, version, current, last, &[current])
    }

    fn start(device: &Arc<MockDevice>) -> AsyncTableReader<RawSection> {
        AsyncTableReader::create(device.clone(), PID, StreamKind::Extended).unwrap()
    }

    fn numbers(tables: &[RawSection]) -> Vec<(u8, u8)> {
        tables.iter().map(|t| (t.version, t.section_number)).collect()
    }

    async fn finish(reader: AsyncTableReader<RawSection>) -> Vec<RawSection> {
        tokio::time::timeout(WAIT, reader).await.expect("reader did not finish")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_resolves_with_sorted_sections() {
        let device = MockDevice::new();
        let reader = start(&device);
        assert!(device.wait_for_enabled(1, WAIT));

        let producer = {
            let device = Arc::clone(&device);
            thread::spawn(move || {
                for current in [2, 0, 1] {
                    device.deliver(PID, &section(5, current, 2));
                }
            })
        };

        let tables = finish(reader).await;
        producer.join().unwrap();
        assert_eq!(numbers(&tables), vec![(5, 0), (5, 1), (5, 2)]);
        assert_eq!(device.removes(), 1);
        assert_eq!(device.active_consumers(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_version_change_restarts() {
        let device = MockDevice::new();
        let reader = start(&device);
        assert!(device.wait_for_enabled(1, WAIT));

        device.deliver(PID, &section(1, 0, 2));
        device.deliver(PID, &section(1, 1, 2));
        device.deliver(PID, &section(2, 0, 1));
        device.deliver(PID, &section(2, 1, 1));

        assert_eq!(numbers(&finish(reader).await), vec![(2, 0), (2, 1)]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_before_any_section() {
        let device = MockDevice::new();
        let reader = start(&device);
        assert!(device.wait_for_enabled(1, WAIT));

        reader.cancel();
        reader.cancel();
        assert!(reader.is_cancelled());

        assert!(finish(reader).await.is_empty());
        assert_eq!(device.removes(), 1);
        assert_eq!(device.active_consumers(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_right_after_create() {
        let device = MockDevice::new();
        let reader = start(&device);
        reader.cancel();

        assert!(finish(reader).await.is_empty());
        assert_eq!(device.active_consumers(), 0);
        assert_eq!(device.adds(), device.removes());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_after_completion_has_no_effect() {
        let device = MockDevice::new();
        let mut reader = start(&device);
        assert!(device.wait_for_enabled(1, WAIT));
        device.deliver(PID, &section(3, 0, 0));

        let deadline = Instant::now() + WAIT;
        while !reader.is_finished() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        reader.cancel();
        reader.cancel_after(Duration::from_millis(1));

        let tables = tokio::time::timeout(WAIT, &mut reader).await.unwrap();
        assert_eq!(numbers(&tables), vec![(3, 0)]);
        reader.cancel();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_after_zero_is_immediate() {
        let device = MockDevice::new();
        let reader = start(&device);
        reader.cancel_after(Duration::ZERO);
        assert!(reader.is_cancelled());
        assert!(finish(reader).await.is_empty());
        assert_eq!(device.active_consumers(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_after_timeout() {
        let device = MockDevice::new();
        let reader = start(&device);
        assert!(device.wait_for_enabled(1, WAIT));
        device.deliver(PID, &section(0, 0, 1));

        let started = Instant::now();
        reader.cancel_after(Duration::from_millis(50));
        assert!(finish(reader).await.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(device.active_consumers(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_completes_before_timeout() {
        let device = MockDevice::new();
        let reader = start(&device);
        reader.cancel_after(Duration::from_secs(30));
        assert!(device.wait_for_enabled(1, WAIT));

        device.deliver(PID, &section(8, 1, 1));
        device.deliver(PID, &section(8, 0, 1));
        assert_eq!(finish(reader).await.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_registration_failure_yields_empty() {
        let device = MockDevice::new();
        device.fail_enable(DeviceError::Closed);
        let reader = start(&device);

        assert!(finish(reader).await.is_empty());
        assert_eq!(device.active_consumers(), 0);
        assert_eq!(device.removes(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_teardown_failure_is_swallowed() {
        let device = MockDevice::new();
        let reader = start(&device);
        assert!(device.wait_for_enabled(1, WAIT));
        device.fail_remove(DeviceError::Closed);

        device.deliver(PID, &section(4, 0, 0));
        assert_eq!(finish(reader).await.len(), 1);
    }

    #[test]
    fn test_create_requires_runtime() {
        let device = MockDevice::new();
        let result = AsyncTableReader::<RawSection>::create(device, PID, StreamKind::Extended);
        assert!(matches!(result, Err(ReaderError::NoRuntime)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_polling_after_result_yields_empty() {
        let device = MockDevice::new();
        let mut reader = start(&device);
        assert!(device.wait_for_enabled(1, WAIT));
        device.deliver(PID, &section(6, 0, 0));

        let first = tokio::time::timeout(WAIT, &mut reader).await.unwrap();
        assert_eq!(numbers(&first), vec![(6, 0)]);

        let second = tokio::time::timeout(WAIT, &mut reader).await.unwrap();
        assert!(second.is_empty());
        assert!(reader.is_finished());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_races_delivery() {
        let device = MockDevice::new();
        let reader = start(&device);
        assert!(device.wait_for_enabled(1, WAIT));
        let stop = Arc::new(AtomicBool::new(false));

        // 255 sections announced, section 254 never sent
        let producer = {
            let device = Arc::clone(&device);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut n = 0u32;
                while !stop.load(Ordering::SeqCst) {
                    device.deliver(PID, &section(3, (n % 254) as u8, 254));
                    n += 1;
                }
            })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        reader.cancel();
        let tables = finish(reader).await;

        stop.store(true, Ordering::SeqCst);
        producer.join().unwrap();

        assert!(tables.is_empty());
        assert_eq!(device.removes(), 1);
        assert_eq!(device.active_consumers(), 0);
    }
}
