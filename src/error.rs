//! Error taxonomy for the sensor and camera pipelines.

use thiserror::Error;

use crate::types::SensorKind;

/// Failures surfaced by [`crate::sensor_client::SensorConnection::connect`]
/// and [`crate::optical::OpticalVitalsProcessor::start`].
///
/// None of these are retried inside the crate; the caller decides whether to
/// try again.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SensorError {
    /// The host has no usable Bluetooth stack or adapter.
    #[error("Bluetooth is not available on this host: {0}")]
    CapabilityUnavailable(String),
    /// The operator dismissed device selection without picking a device.
    #[error("device selection cancelled")]
    SelectionCancelled,
    /// Transport connect, service/characteristic resolution, or subscribe failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// `disconnect()` was called while `connect()` was still in flight.
    #[error("connect aborted by disconnect")]
    Aborted,
    /// The frame source handed to the optical processor is not delivering frames.
    #[error("camera capture unavailable: {0}")]
    CaptureUnavailable(String),
}

/// A characteristic payload that does not fit the expected layout.
///
/// Local to one notification: the dispatch task logs it and keeps the
/// subscription alive.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{kind} payload too short: need {expected} bytes, got {actual}")]
    TooShort {
        kind: SensorKind,
        expected: usize,
        actual: usize,
    },
}
