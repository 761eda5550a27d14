//! Error types for device registration and readers.

use thiserror::Error;

use crate::device::ConsumerId;

/// Errors reported by a device collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The handle is not (or no longer) registered.
    #[error("Unknown consumer: {0}")]
    UnknownConsumer(ConsumerId),

    /// The device has been shut down.
    #[error("Device closed")]
    Closed,

    /// The device refused the request.
    #[error("Request rejected: {0}")]
    Rejected(String),
}

/// Errors raised when setting up a reader.
///
/// Only registration can fail; once a reader runs, every failure is
/// reported as "no tables".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReaderError {
    /// `add_consumer` failed; no handle was obtained.
    #[error("Failed to register consumer: {0}")]
    Registration(#[source] DeviceError),

    /// Delivery could not be enabled; the handle has been removed again.
    #[error("Failed to enable delivery: {0}")]
    Enable(#[source] DeviceError),

    /// No tokio runtime to run the asynchronous reader on.
    #[error("No tokio runtime available")]
    NoRuntime,
}
