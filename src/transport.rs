//! Capability interface between [`crate::sensor_client`] and a wireless stack.
//!
//! Two implementations ship with the crate:
//!
//! | Type | Backend |
//! |---|---|
//! | [`crate::ble::BleTransport`] | btleplug (CoreBluetooth / BlueZ / WinRT) |
//! | [`crate::mock::ScriptedTransport`] | replays scripted notifications, no hardware |

use std::future::Future;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::BoxStream;
use log::warn;
use uuid::Uuid;

use crate::error::SensorError;

/// Raw characteristic values, in the order the transport delivers them.
///
/// The stream ends when the device disconnects.
pub type NotificationStream = BoxStream<'static, Vec<u8>>;

/// Identity of a selected peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Platform identifier (UUID on macOS / Windows, MAC address on Linux).
    pub id: String,
    /// Advertised local name, if any.
    pub name: Option<String>,
}

/// Picks one device out of the candidates advertising the wanted service.
///
/// Returning `None` is treated as the operator cancelling selection.
pub trait DeviceSelector: Send + Sync {
    fn select(&self, candidates: &[DeviceInfo]) -> Option<usize>;
}

/// Selects the first candidate found. The default for headless use.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstDevice;

impl DeviceSelector for FirstDevice {
    fn select(&self, candidates: &[DeviceInfo]) -> Option<usize> {
        (!candidates.is_empty()).then_some(0)
    }
}

impl<F> DeviceSelector for F
where
    F: Fn(&[DeviceInfo]) -> Option<usize> + Send + Sync,
{
    fn select(&self, candidates: &[DeviceInfo]) -> Option<usize> {
        self(candidates)
    }
}

/// Opens transport-level connections to devices advertising a service.
#[async_trait]
pub trait SensorTransport: Send + Sync {
    /// Select a device advertising `service`, connect to it and resolve
    /// its GATT table.
    async fn connect(&self, service: Uuid) -> Result<Box<dyn SensorLink>, SensorError>;
}

/// One open transport connection.
#[async_trait]
pub trait SensorLink: Send + Sync {
    fn device(&self) -> &DeviceInfo;

    /// Enable notifications on `characteristic` within `service`.
    async fn subscribe(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream, SensorError>;

    /// Release the connection. Safe to call more than once.
    async fn disconnect(&self) -> Result<(), SensorError>;
}

/// Runs a release future on a spawned task if dropped while still armed.
///
/// Connect sequences hold one of these from the moment a transport-level
/// connection may exist until it has an owner that releases it explicitly.
pub(crate) struct ReleaseGuard {
    release: Option<BoxFuture<'static, ()>>,
}

impl ReleaseGuard {
    pub(crate) fn new(release: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            release: Some(release.boxed()),
        }
    }

    /// Ownership was handed over; dropping no longer releases anything.
    pub(crate) fn disarm(&mut self) {
        self.release = None;
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let Some(release) = self.release.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(release);
            }
            Err(_) => warn!("no runtime to release an abandoned connection"),
        }
    }
}
