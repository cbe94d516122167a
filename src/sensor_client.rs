use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SensorError;
use crate::parse::decode_reading;
use crate::protocol::UNKNOWN_DEVICE_NAME;
use crate::transport::{NotificationStream, ReleaseGuard, SensorLink, SensorTransport};
use crate::types::{ConnectionState, Reading, SensorKind};

// ── LinkGuard ─────────────────────────────────────────────────────────────────

/// Owns a freshly opened link until it is handed over to the connection.
///
/// If `connect()` returns early or its future is dropped mid-flight, the
/// link is released on a spawned task.
struct LinkGuard {
    link: Arc<dyn SensorLink>,
    release: ReleaseGuard,
}

impl LinkGuard {
    fn new(link: Box<dyn SensorLink>) -> Self {
        let link: Arc<dyn SensorLink> = Arc::from(link);
        let release = ReleaseGuard::new({
            let link = Arc::clone(&link);
            async move {
                if let Err(e) = link.disconnect().await {
                    warn!("releasing abandoned link to {:?} failed: {e}", link.device().name);
                }
            }
        });
        Self { link, release }
    }

    fn link(&self) -> &Arc<dyn SensorLink> {
        &self.link
    }

    fn into_inner(mut self) -> Arc<dyn SensorLink> {
        self.release.disarm();
        self.link
    }
}

/// Held for the Connecting phase of one session.  Dropping it while that
/// session is still Connecting (the caller dropped the `connect()` future)
/// moves the connection back to Disconnected.
struct ConnectingGuard {
    inner: Arc<Mutex<Inner>>,
    generation: u64,
}

impl Drop for ConnectingGuard {
    fn drop(&mut self) {
        let mut inner = lock_inner(&self.inner);
        if inner.generation == self.generation && inner.state == ConnectionState::Connecting {
            debug!("connect() dropped while connecting; resetting");
            // No link is stored while connecting; an opened one is still
            // owned by its LinkGuard.
            let _ = inner.reset();
        }
    }
}

// ── SensorConnection ──────────────────────────────────────────────────────────

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    device_name: Option<String>,
    link: Option<Arc<dyn SensorLink>>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
    /// Bumped on every connect/disconnect so a stale dispatch task cannot
    /// clobber a newer session.
    generation: u64,
}

impl Inner {
    /// Move to Disconnected and hand back whatever must be released.
    fn reset(&mut self) -> Option<Arc<dyn SensorLink>> {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.generation += 1;
        self.state = ConnectionState::Disconnected;
        self.device_name = None;
        self.link.take()
    }
}

/// Subscription lifecycle for one [`SensorKind`] on one device.
///
/// ```text
/// Disconnected ──connect()──▶ Connecting ──ok──▶ Connected
///      ▲                          │                  │
///      └──── error / disconnect() ┴── disconnect() / stream end
/// ```
///
/// Failures are terminal for the session; nothing reconnects automatically.
/// All methods take `&self`, so one connection can be shared behind an `Arc`
/// and `disconnect()` can race an in-flight `connect()`.
pub struct SensorConnection {
    kind: SensorKind,
    transport: Arc<dyn SensorTransport>,
    inner: Arc<Mutex<Inner>>,
}

impl SensorConnection {
    pub fn new(kind: SensorKind, transport: Arc<dyn SensorTransport>) -> Self {
        Self {
            kind,
            transport,
            inner: Arc::default(),
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Advertised name of the connected device, while connected.
    pub fn device_name(&self) -> Option<String> {
        self.lock().device_name.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock_inner(&self.inner)
    }

    /// Connect to a device for this kind and forward every decoded reading.
    ///
    /// `on_reading` runs on the dispatch task, once per notification carrying
    /// a present value, in transport delivery order.  Sentinel payloads and
    /// malformed notifications are dropped without ending the subscription.
    ///
    /// Returns the advertised device name, or `"Unknown Device"`.  An active
    /// session on this connection is released first.
    pub async fn connect<F>(&self, on_reading: F) -> Result<String, SensorError>
    where
        F: FnMut(Reading) + Send + 'static,
    {
        let (cancel, generation, previous) = {
            let mut inner = self.lock();
            let previous = inner.reset();
            let cancel = CancellationToken::new();
            inner.state = ConnectionState::Connecting;
            inner.cancel = Some(cancel.clone());
            (cancel, inner.generation, previous)
        };
        let _connecting = ConnectingGuard {
            inner: Arc::clone(&self.inner),
            generation,
        };
        if let Some(link) = previous {
            info!("{}: releasing previous device before reconnecting", self.kind);
            link.disconnect().await.ok();
        }

        let result = self.establish(&cancel).await;
        let mut inner = self.lock();
        if inner.generation != generation || cancel.is_cancelled() {
            // disconnect() ran while we were negotiating; the guard inside
            // `result` releases the link when it drops.
            return Err(SensorError::Aborted);
        }
        let (guard, stream) = match result {
            Ok(parts) => parts,
            Err(e) => {
                inner.reset();
                warn!("{}: connect failed: {e}", self.kind);
                return Err(e);
            }
        };

        let link = guard.into_inner();
        let name = link
            .device()
            .name
            .clone()
            .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_owned());

        inner.task = Some(tokio::spawn(dispatch(
            self.kind,
            stream,
            on_reading,
            cancel,
            Arc::clone(&self.inner),
            generation,
        )));
        inner.link = Some(link);
        inner.device_name = Some(name.clone());
        inner.state = ConnectionState::Connected;
        info!("{}: connected to {name}", self.kind);
        Ok(name)
    }

    /// Transport connect + subscribe, abandoning on cancellation.
    async fn establish(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(LinkGuard, NotificationStream), SensorError> {
        let service = self.kind.service_uuid();
        let characteristic = self.kind.characteristic_uuid();

        let guard = tokio::select! {
            _ = cancel.cancelled() => return Err(SensorError::Aborted),
            link = self.transport.connect(service) => LinkGuard::new(link?),
        };
        let stream = tokio::select! {
            _ = cancel.cancelled() => return Err(SensorError::Aborted),
            stream = guard.link().subscribe(service, characteristic) => stream?,
        };
        Ok((guard, stream))
    }

    /// Release the device, if any.  Idempotent and infallible; safe in every
    /// state including during `connect()`.
    pub async fn disconnect(&self) {
        let link = self.lock().reset();
        if let Some(link) = link {
            if let Err(e) = link.disconnect().await {
                warn!("{}: disconnect error: {e}", self.kind);
            }
            info!("{}: disconnected", self.kind);
        }
    }
}

/// Decode-and-forward loop for one subscription.
async fn dispatch<F>(
    kind: SensorKind,
    mut stream: NotificationStream,
    mut on_reading: F,
    cancel: CancellationToken,
    inner: Arc<Mutex<Inner>>,
    generation: u64,
) where
    F: FnMut(Reading) + Send + 'static,
{
    let mut notif_count: u64 = 0;
    loop {
        let payload = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            next = stream.next() => match next {
                Some(payload) => payload,
                None => break,
            },
        };
        notif_count += 1;
        match decode_reading(kind, &payload) {
            Ok(Some(reading)) => on_reading(reading),
            Ok(None) => debug!("{kind}: notification #{notif_count} carried no value"),
            Err(e) => warn!("{kind}: dropping notification #{notif_count}: {e}"),
        }
    }

    info!("{kind}: notification stream ended after {notif_count} notification(s)");
    let link = {
        let mut inner = lock_inner(&inner);
        if inner.generation != generation {
            return;
        }
        // Our own JoinHandle; dropping it instead of aborting lets us finish.
        inner.task.take();
        inner.reset()
    };
    if let Some(link) = link {
        link.disconnect().await.ok();
    }
}

/// A panic inside `on_reading` never runs while the lock is held, so a
/// poisoned mutex still holds consistent state.
fn lock_inner(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

// ── SensorRegistry ────────────────────────────────────────────────────────────

/// One [`SensorConnection`] per [`SensorKind`], sharing a transport.
///
/// Kinds are fully independent: connecting the thermometer never touches the
/// heart-rate session.
pub struct SensorRegistry {
    connections: BTreeMap<SensorKind, SensorConnection>,
}

impl SensorRegistry {
    pub fn new(transport: Arc<dyn SensorTransport>) -> Self {
        let connections = SensorKind::ALL
            .into_iter()
            .map(|kind| (kind, SensorConnection::new(kind, Arc::clone(&transport))))
            .collect();
        Self { connections }
    }

    pub fn get(&self, kind: SensorKind) -> &SensorConnection {
        &self.connections[&kind]
    }

    pub fn state(&self, kind: SensorKind) -> ConnectionState {
        self.get(kind).state()
    }

    pub async fn connect<F>(&self, kind: SensorKind, on_reading: F) -> Result<String, SensorError>
    where
        F: FnMut(Reading) + Send + 'static,
    {
        self.get(kind).connect(on_reading).await
    }

    pub async fn disconnect(&self, kind: SensorKind) {
        self.get(kind).disconnect().await;
    }

    pub async fn disconnect_all(&self) {
        for connection in self.connections.values() {
            connection.disconnect().await;
        }
    }
}
