//! Feeding the input through a demultiplexer and collecting the tables.

use std::io::{self, Read};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use futures::future::{join_all, BoxFuture, FutureExt};
use log::{debug, info, warn};
use serde::Deserialize;
use sitable_psi::{PatTable, RawSection, SdtTable};
use sitable_reader::{AsyncTableReader, CompletionSignal, Demux, Device, ReaderError, TableReader};

use crate::report::{Render, Report};
use crate::selection::TableSelection;

/// Bytes read from the input per feed.
const CHUNK_SIZE: usize = 64 * 1024;

/// Blocking readers re-check for end of input this often.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One thread waits on each reader in turn.
    #[default]
    Blocking,
    /// Readers are awaited concurrently.
    Async,
}

/// Start a thread feeding `input` into `demux` until end of input.
///
/// `eof` is set once the input is exhausted or unreadable.
pub fn spawn_pump(
    demux: Arc<Demux>,
    mut input: Box<dyn Read + Send>,
    eof: Arc<CompletionSignal>,
) -> io::Result<()> {
    thread::Builder::new().name("ts-pump".into()).spawn(move || {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total: u64 = 0;
        loop {
            match input.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    total += n as u64;
                    demux.feed(&buf[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Input read failed: {}", e);
                    break;
                }
            }
        }
        info!(
            "End of input after {} bytes ({} packets, {} sections delivered)",
            total,
            demux.packet_count(),
            demux.section_count()
        );
        eof.set();
    })?;

    Ok(())
}

trait PendingTable {
    fn finish(&self, deadline: Instant, eof: &CompletionSignal) -> Report;
}

struct BlockingJob<T: Render> {
    selection: TableSelection,
    reader: TableReader<T>,
}

impl<T: Render> PendingTable for BlockingJob<T> {
    fn finish(&self, deadline: Instant, eof: &CompletionSignal) -> Report {
        loop {
            let now = Instant::now();
            let step = deadline.saturating_duration_since(now).min(POLL_INTERVAL);
            // The input being gone is only final once this last look fails.
            let exhausted = eof.is_set();

            if let Some(tables) = self.reader.wait_for_tables(step) {
                return Report::new(self.selection, &tables);
            }
            if exhausted || now >= deadline {
                debug!("{}: gave up with {} sections collected", self.selection, self.reader.collected());
                self.reader.cancel();
                return Report::unavailable(self.selection);
            }
        }
    }
}

fn blocking_job<T: Render>(
    device: &Arc<dyn Device>,
    selection: TableSelection,
) -> Result<Box<dyn PendingTable>, ReaderError> {
    let reader = TableReader::<T>::new(Some(Arc::clone(device)), selection.pid(), selection.kind(), None)?;
    Ok(Box::new(BlockingJob { selection, reader }))
}

/// Register every reader, then start `pump` and wait for each table in turn.
pub fn run_blocking(
    demux: &Arc<Demux>,
    selections: &[TableSelection],
    timeout: Duration,
    pump: impl FnOnce(Arc<CompletionSignal>) -> io::Result<()>,
) -> io::Result<Vec<Report>> {
    let device: Arc<dyn Device> = demux.clone();
    let eof = Arc::new(CompletionSignal::new());

    let jobs: Vec<Result<Box<dyn PendingTable>, ReaderError>> = selections
        .iter()
        .map(|&selection| match selection {
            TableSelection::Pat => blocking_job::<PatTable>(&device, selection),
            TableSelection::Sdt => blocking_job::<SdtTable>(&device, selection),
            TableSelection::Raw { .. } => blocking_job::<RawSection>(&device, selection),
        })
        .collect();

    pump(Arc::clone(&eof))?;
    let deadline = Instant::now() + timeout;

    Ok(jobs
        .into_iter()
        .zip(selections)
        .map(|(job, &selection)| match job {
            Ok(job) => job.finish(deadline, &eof),
            Err(e) => {
                warn!("{}: {}", selection, e);
                Report::unavailable(selection)
            }
        })
        .collect())
}

/// An async reader already started, not yet awaited.
trait StartedTable: Send {
    fn is_finished(&self) -> bool;
    fn into_report(self: Box<Self>, eof: Arc<CompletionSignal>) -> BoxFuture<'static, Report>;
}

struct AsyncJob<T: Render> {
    selection: TableSelection,
    reader: AsyncTableReader<T>,
}

impl<T: Render> StartedTable for AsyncJob<T> {
    fn is_finished(&self) -> bool {
        self.reader.is_finished()
    }

    fn into_report(self: Box<Self>, eof: Arc<CompletionSignal>) -> BoxFuture<'static, Report> {
        let AsyncJob { selection, mut reader } = *self;
        async move {
            let tables = tokio::select! {
                tables = &mut reader => tables,
                _ = eof.wait() => {
                    reader.cancel();
                    (&mut reader).await
                }
            };
            Report::new(selection, &tables)
        }
        .boxed()
    }
}

fn async_job<T: Render>(
    device: &Arc<dyn Device>,
    selection: TableSelection,
    timeout: Duration,
) -> Result<Box<dyn StartedTable>, ReaderError> {
    let reader = AsyncTableReader::<T>::create(Arc::clone(device), selection.pid(), selection.kind())?;
    reader.cancel_after(timeout);
    Ok(Box::new(AsyncJob { selection, reader }))
}

/// Start every reader, then start `pump` and await all tables together.
pub async fn run_async(
    demux: &Arc<Demux>,
    selections: &[TableSelection],
    timeout: Duration,
    pump: impl FnOnce(Arc<CompletionSignal>) -> io::Result<()>,
) -> io::Result<Vec<Report>> {
    let device: Arc<dyn Device> = demux.clone();
    let eof = Arc::new(CompletionSignal::new());

    let jobs: Vec<Result<Box<dyn StartedTable>, ReaderError>> = selections
        .iter()
        .map(|&selection| match selection {
            TableSelection::Pat => async_job::<PatTable>(&device, selection, timeout),
            TableSelection::Sdt => async_job::<SdtTable>(&device, selection, timeout),
            TableSelection::Raw { .. } => async_job::<RawSection>(&device, selection, timeout),
        })
        .collect();

    // Readers register on the blocking pool; data fed before that is lost.
    // A reader that already finished (refused, cancelled) will never enable.
    let started = jobs.iter().filter(|job| job.is_ok()).count();
    let registered = Instant::now() + timeout;
    loop {
        let finished = jobs
            .iter()
            .filter(|job| matches!(job, Ok(job) if job.is_finished()))
            .count();
        if demux.enabled_count() + finished >= started || Instant::now() >= registered {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    pump(Arc::clone(&eof))?;

    let reports = jobs.into_iter().zip(selections).map(|(job, &selection)| match job {
        Ok(job) => job.into_report(Arc::clone(&eof)),
        Err(e) => {
            warn!("{}: {}", selection, e);
            futures::future::ready(Report::unavailable(selection)).boxed()
        }
    });
    Ok(join_all(reports).await)
}
