//! Reassembly of one table edition from its sections.
//!
//! Sections of a table arrive in any order, repeat periodically and may be
//! interleaved with sections of the next edition during a version change.
//! [`Assembly`] keeps exactly one in-flight slot buffer and throws the whole
//! buffer away on any inconsistency; a buffer mixing editions is never valid.

use std::fmt;

use log::debug;
use sitable_psi::Table;

/// Why a partial buffer was thrown away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discard {
    /// Section carries another version than the buffer.
    VersionChanged,
    /// Section announces a different section count.
    SizeMismatch,
    /// Section index is past the end of the buffer.
    OutOfRange,
    /// Slot is already filled.
    Duplicate,
}

impl fmt::Display for Discard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Discard::VersionChanged => "version changed",
            Discard::SizeMismatch => "section count changed",
            Discard::OutOfRange => "section index out of range",
            Discard::Duplicate => "duplicate section",
        };
        f.write_str(reason)
    }
}

/// Outcome of feeding one section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Stored; more sections are missing.
    Collecting { collected: usize, total: usize },
    /// The last missing section arrived. Reported once.
    Complete,
    /// The assembly was already complete; the section was ignored.
    Ignored,
}

/// Slot buffer for the edition currently being collected.
#[derive(Debug)]
pub struct Assembly<T> {
    expected_version: u8,
    collected: usize,
    slots: Option<Vec<Option<T>>>,
    done: bool,
    discards: u64,
}

impl<T> Default for Assembly<T> {
    fn default() -> Self {
        Self {
            expected_version: 0,
            collected: 0,
            slots: None,
            done: false,
            discards: 0,
        }
    }
}

impl<T: Table> Assembly<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one section.
    ///
    /// Callers are expected to stop feeding once `Complete` was returned;
    /// later sections are ignored and never touch the finished buffer.
    pub fn accept(&mut self, record: T) -> Progress {
        if self.done {
            return Progress::Ignored;
        }

        if let Some(reason) = self.check(&record) {
            debug!(
                "Discarding {} of {} collected sections (version {}): {}",
                self.collected,
                self.slot_count(),
                self.expected_version,
                reason
            );
            self.slots = None;
            self.discards += 1;
        }

        if self.slots.is_none() {
            self.expected_version = record.version();
            self.collected = 0;
        }
        let slots = self.slots.get_or_insert_with(|| {
            let total = record.last_section() as usize + 1;
            std::iter::repeat_with(|| None).take(total).collect()
        });

        let index = record.current_section() as usize;
        let total = slots.len();
        if index >= total {
            // Cannot be stored even in a buffer sized from itself.
            return Progress::Collecting {
                collected: self.collected,
                total,
            };
        }

        slots[index] = Some(record);
        self.collected += 1;

        if self.collected < total {
            return Progress::Collecting {
                collected: self.collected,
                total,
            };
        }

        self.done = true;
        Progress::Complete
    }

    /// First discard rule that applies to `record`, if a buffer exists.
    fn check(&self, record: &T) -> Option<Discard> {
        let slots = self.slots.as_ref()?;
        let index = record.current_section() as usize;

        if record.version() != self.expected_version {
            Some(Discard::VersionChanged)
        } else if slots.len() != record.last_section() as usize + 1 {
            Some(Discard::SizeMismatch)
        } else if index >= slots.len() {
            Some(Discard::OutOfRange)
        } else if slots[index].is_some() {
            Some(Discard::Duplicate)
        } else {
            None
        }
    }

    /// Whether the single completion transition has happened.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Filled slots of the current buffer.
    pub fn collected(&self) -> usize {
        self.collected
    }

    /// Length of the current buffer, 0 when there is none.
    pub fn slot_count(&self) -> usize {
        self.slots.as_ref().map_or(0, Vec::len)
    }

    /// Version of the edition being collected.
    pub fn expected_version(&self) -> u8 {
        self.expected_version
    }

    /// How often a partial buffer was thrown away.
    pub fn discards(&self) -> u64 {
        self.discards
    }

    /// Sections stored so far, in slot order.
    pub fn sections(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().flatten().flatten()
    }

    /// Move the completed sections out, ordered by section number.
    ///
    /// Returns `None` before completion and on every call after the first.
    pub fn take(&mut self) -> Option<Vec<T>> {
        if !self.done {
            return None;
        }
        self.slots
            .take()
            .map(|slots| slots.into_iter().flatten().collect())
    }
}
