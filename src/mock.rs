//! Deterministic transport that replays scripted notifications.
//!
//! Used by the test-suite and by `vitals-rs --simulate`.  Every step of the
//! connect sequence can be made to fail, and connect can be held open on a
//! gate so tests can race `disconnect()` against it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use log::debug;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::error::SensorError;
use crate::transport::{DeviceInfo, NotificationStream, SensorLink, SensorTransport};

/// Which step of the connect sequence should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    /// No Bluetooth stack on the host.
    Capability,
    /// Operator dismissed the device chooser.
    Selection,
    /// Transport-level connect fails.
    Connect,
    /// Service not present in the GATT table.
    Service,
    /// Characteristic not present in the service.
    Characteristic,
}

/// Counters shared between a [`ScriptedTransport`] and its links.
#[derive(Debug, Default)]
pub struct TransportStats {
    pub connects: AtomicUsize,
    pub subscribes: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl TransportStats {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn subscribes(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

/// A transport whose single device emits a fixed list of payloads.
#[derive(Clone)]
pub struct ScriptedTransport {
    device: DeviceInfo,
    service: Option<Uuid>,
    script: Vec<Vec<u8>>,
    interval: Option<Duration>,
    hold_open: bool,
    failure: Option<ScriptedFailure>,
    gate: Option<Arc<Notify>>,
    subscribe_gate: Option<Arc<Notify>>,
    stats: Arc<TransportStats>,
}

impl ScriptedTransport {
    /// A device named `name` that emits `script` and then closes its stream.
    pub fn new(name: impl Into<String>, script: Vec<Vec<u8>>) -> Self {
        Self {
            device: DeviceInfo {
                id: "00:00:00:00:00:00".into(),
                name: Some(name.into()),
            },
            service: None,
            script,
            interval: None,
            hold_open: false,
            failure: None,
            gate: None,
            subscribe_gate: None,
            stats: Arc::default(),
        }
    }

    /// Advertise no local name.
    pub fn anonymous(mut self) -> Self {
        self.device.name = None;
        self
    }

    /// Only answer connects for `service`; others fail as "service not found".
    pub fn with_service(mut self, service: Uuid) -> Self {
        self.service = Some(service);
        self
    }

    /// Keep the notification stream open after the script is exhausted,
    /// like a live device that has gone quiet.
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Space the scripted notifications out by `interval`.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Make one step of the connect sequence fail.
    pub fn failing(mut self, failure: ScriptedFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Block transport connect until `gate` is notified.
    pub fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Connect normally, then block subscribe until `gate` is notified, so a
    /// link exists while connect is still in flight.
    pub fn gated_subscribe(mut self, gate: Arc<Notify>) -> Self {
        self.subscribe_gate = Some(gate);
        self
    }

    /// Shared counters for assertions.
    pub fn stats(&self) -> Arc<TransportStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl SensorTransport for ScriptedTransport {
    async fn connect(&self, service: Uuid) -> Result<Box<dyn SensorLink>, SensorError> {
        match self.failure {
            Some(ScriptedFailure::Capability) => {
                return Err(SensorError::CapabilityUnavailable(
                    "scripted: no Bluetooth adapter".into(),
                ))
            }
            Some(ScriptedFailure::Selection) => return Err(SensorError::SelectionCancelled),
            _ => {}
        }
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.failure == Some(ScriptedFailure::Connect) {
            return Err(SensorError::ConnectionFailed("scripted: connect refused".into()));
        }
        let has_service = self.service.map_or(true, |s| s == service)
            && self.failure != Some(ScriptedFailure::Service);
        if !has_service {
            return Err(SensorError::ConnectionFailed(format!(
                "service {service} not found"
            )));
        }

        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        debug!("scripted: connected to {:?}", self.device.name);
        Ok(Box::new(ScriptedLink {
            device: self.device.clone(),
            script: self.script.clone(),
            interval: self.interval,
            hold_open: self.hold_open,
            fail_characteristic: self.failure == Some(ScriptedFailure::Characteristic),
            subscribe_gate: self.subscribe_gate.clone(),
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct ScriptedLink {
    device: DeviceInfo,
    script: Vec<Vec<u8>>,
    interval: Option<Duration>,
    hold_open: bool,
    fail_characteristic: bool,
    subscribe_gate: Option<Arc<Notify>>,
    stats: Arc<TransportStats>,
}

#[async_trait]
impl SensorLink for ScriptedLink {
    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    async fn subscribe(
        &self,
        _service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream, SensorError> {
        if let Some(gate) = &self.subscribe_gate {
            gate.notified().await;
        }
        if self.fail_characteristic {
            return Err(SensorError::ConnectionFailed(format!(
                "characteristic {characteristic} not found"
            )));
        }
        self.stats.subscribes.fetch_add(1, Ordering::SeqCst);

        let interval = self.interval;
        let script = stream::iter(self.script.clone()).then(move |payload| async move {
            if let Some(interval) = interval {
                tokio::time::sleep(interval).await;
            }
            payload
        });
        Ok(if self.hold_open {
            script.chain(stream::pending()).boxed()
        } else {
            script.boxed()
        })
    }

    async fn disconnect(&self) -> Result<(), SensorError> {
        self.stats.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
