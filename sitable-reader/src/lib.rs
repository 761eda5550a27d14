//! Multi-section table reassembly on top of a demultiplexer.
//!
//! A reader registers a section consumer for one PID on a [`Device`],
//! collects the sections of one table edition and hands back the complete
//! set ordered by section number.
//!
//! - [`TableReader`] is for threads: poll or block on
//!   [`TableReader::wait_for_tables`], or wait on its [`CompletionSignal`].
//! - [`AsyncTableReader`] is a future resolving to the sections, with
//!   cancellation and timeouts.
//!
//! ```
//! use std::time::Duration;
//! use sitable_psi::{build_long_section, packetize_section, PatTable, StreamKind};
//! use sitable_reader::{Demux, TableReader};
//!
//! let demux = Demux::new();
//! let reader: TableReader<PatTable> =
//!     TableReader::new(Some(demux.clone()), 0x0000, StreamKind::Extended, None).unwrap();
//!
//! let pat = build_long_section(0x00, 0x7FE1, 0, 0, 0, &[0x04, 0x08, 0xE1, 0xF0]);
//! let mut cc = 0;
//! demux.feed(&packetize_section(0x0000, &pat, &mut cc));
//!
//! let tables = reader.wait_for_tables(Duration::from_secs(1)).unwrap();
//! assert_eq!(tables[0].pmt_pid(0x0408), Some(0x01F0));
//! ```

mod assembly;
mod async_reader;
mod blocking;
mod demux;
mod device;
mod error;
mod registration;
mod signal;

#[cfg(test)]
mod testing;

pub use assembly::{Assembly, Discard, Progress};
pub use async_reader::AsyncTableReader;
pub use blocking::{CompletionCallback, TableReader, Tables};
pub use demux::Demux;
pub use device::{ConsumerId, Device};
pub use error::{DeviceError, ReaderError};
pub use registration::{Registration, RegistrationState};
pub use signal::CompletionSignal;
