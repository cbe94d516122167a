use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::future::{self, BoxFuture};
use futures::{FutureExt, StreamExt};
use log::{debug, info, warn};
use uuid::Uuid;

use crate::error::SensorError;
use crate::transport::{
    DeviceInfo, DeviceSelector, FirstDevice, NotificationStream, ReleaseGuard, SensorLink,
    SensorTransport,
};

// ── SensorClientConfig ────────────────────────────────────────────────────────

/// Configuration for [`BleTransport`].
#[derive(Debug, Clone)]
pub struct SensorClientConfig {
    /// How long to scan for devices advertising the wanted service before
    /// offering the candidates to the selector. Default: `10`.
    pub scan_timeout_secs: u64,
    /// Hard timeout on the transport-level connect. Default: `10`.
    pub connect_timeout_secs: u64,
    /// Hard timeout on GATT service discovery. Default: `15`.
    pub discovery_timeout_secs: u64,
    /// When set, only devices whose advertised name starts with this string
    /// are offered.  Default: `None` (match on service only).
    pub name_prefix: Option<String>,
}

impl Default for SensorClientConfig {
    fn default() -> Self {
        Self {
            scan_timeout_secs: 10,
            connect_timeout_secs: 10,
            discovery_timeout_secs: 15,
            name_prefix: None,
        }
    }
}

// ── BleTransport ──────────────────────────────────────────────────────────────

/// [`SensorTransport`] on the host Bluetooth stack via btleplug.
///
/// Each `connect()` opens the first adapter, scans with a service filter,
/// hands the candidates to the [`DeviceSelector`], connects, and verifies the
/// service is present in the discovered GATT table.
pub struct BleTransport {
    config: SensorClientConfig,
    selector: Arc<dyn DeviceSelector>,
}

impl BleTransport {
    pub fn new(config: SensorClientConfig) -> Self {
        Self {
            config,
            selector: Arc::new(FirstDevice),
        }
    }

    /// Replace the default first-match selection, e.g. with an interactive
    /// chooser.
    pub fn with_selector(mut self, selector: impl DeviceSelector + 'static) -> Self {
        self.selector = Arc::new(selector);
        self
    }

    async fn adapter() -> Result<Adapter, SensorError> {
        let unavailable = |e: btleplug::Error| SensorError::CapabilityUnavailable(e.to_string());
        let manager = Manager::new().await.map_err(unavailable)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(unavailable)?
            .into_iter()
            .next()
            .ok_or_else(|| SensorError::CapabilityUnavailable("no Bluetooth adapter found".into()))?;

        // When the binary is freshly launched (or Bluetooth was recently
        // toggled), CBCentralManager starts in an "unknown" state and a scan
        // issued before it reaches poweredOn is a silent no-op.
        #[cfg(target_os = "macos")]
        {
            use btleplug::api::CentralState;

            let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
            loop {
                match adapter.adapter_state().await {
                    Ok(CentralState::PoweredOn) => break,
                    Ok(state) if tokio::time::Instant::now() >= deadline => {
                        warn!("macOS: adapter still in state {state:?} after 3 s, proceeding anyway");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("macOS: adapter_state() error: {e}");
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }

        Ok(adapter)
    }

    /// Scan for `scan_timeout_secs` and collect every peripheral advertising
    /// `service` (and matching the name prefix, if configured).
    async fn scan(
        &self,
        adapter: &Adapter,
        service: Uuid,
    ) -> Result<Vec<(DeviceInfo, Peripheral)>, SensorError> {
        let failed = |e: btleplug::Error| SensorError::ConnectionFailed(e.to_string());

        info!(
            "Scanning for devices advertising {service} ({} s) …",
            self.config.scan_timeout_secs
        );
        adapter
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await
            .map_err(failed)?;
        tokio::time::sleep(Duration::from_secs(self.config.scan_timeout_secs)).await;
        adapter.stop_scan().await.ok();

        let mut found = Vec::new();
        for p in adapter.peripherals().await.map_err(failed)? {
            let Ok(Some(props)) = p.properties().await else {
                continue;
            };
            if !props.services.contains(&service) {
                continue;
            }
            if let Some(prefix) = &self.config.name_prefix {
                if !props.local_name.as_deref().unwrap_or("").starts_with(prefix.as_str()) {
                    continue;
                }
            }
            let info = DeviceInfo {
                id: p.id().to_string(),
                name: props.local_name,
            };
            debug!("scan: candidate {info:?}");
            found.push((info, p));
        }
        info!("scan: {} candidate(s) for {service}", found.len());
        Ok(found)
    }
}

#[async_trait]
impl SensorTransport for BleTransport {
    async fn connect(&self, service: Uuid) -> Result<Box<dyn SensorLink>, SensorError> {
        let adapter = Self::adapter().await?;
        let mut candidates = self.scan(&adapter, service).await?;
        if candidates.is_empty() {
            return Err(SensorError::ConnectionFailed(format!(
                "no device advertising {service} found"
            )));
        }

        let infos: Vec<DeviceInfo> = candidates.iter().map(|(info, _)| info.clone()).collect();
        let index = self.choose(&infos)?;
        let (device, peripheral) = candidates.swap_remove(index);

        // Armed before connect() is issued: if this future is dropped while
        // BlueZ / CoreBluetooth is still connecting or discovering, the
        // peripheral is disconnected on a spawned task.
        let mut release = ReleaseGuard::new({
            let peripheral = peripheral.clone();
            let name = device.name.clone();
            async move {
                if let Err(e) = peripheral.disconnect().await {
                    debug!("releasing abandoned connect to {name:?}: {e}");
                }
            }
        });

        // BlueZ's Device1.Connect can block forever when the device is out of
        // range or the stack is in a bad state.
        let connect_timeout = self.config.connect_timeout_secs;
        tokio::time::timeout(Duration::from_secs(connect_timeout), peripheral.connect())
            .await
            .map_err(|_| {
                SensorError::ConnectionFailed(format!("connect() timed out after {connect_timeout} s"))
            })?
            .map_err(|e| SensorError::ConnectionFailed(e.to_string()))?;

        let link = BleLink {
            device,
            peripheral,
            adapter,
        };
        // On failure the guard releases the half-open connection.
        link.discover(service, self.config.discovery_timeout_secs).await?;

        release.disarm();
        info!("Connected and services discovered: {:?}", link.device.name);
        Ok(Box::new(link))
    }
}

impl BleTransport {
    /// Ask the selector for one of `candidates`; no choice (or an index out
    /// of range) means the operator cancelled.
    fn choose(&self, candidates: &[DeviceInfo]) -> Result<usize, SensorError> {
        self.selector
            .select(candidates)
            .filter(|&i| i < candidates.len())
            .ok_or(SensorError::SelectionCancelled)
    }
}

// ── BleLink ───────────────────────────────────────────────────────────────────

struct BleLink {
    device: DeviceInfo,
    peripheral: Peripheral,
    adapter: Adapter,
}

impl BleLink {
    async fn discover(&self, service: Uuid, timeout_secs: u64) -> Result<(), SensorError> {
        // On Linux (BlueZ over D-Bus) the link reports connected before the
        // remote GATT cache is populated; discovering too early returns an
        // empty table.
        #[cfg(target_os = "linux")]
        tokio::time::sleep(Duration::from_millis(600)).await;

        tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.peripheral.discover_services(),
        )
        .await
        .map_err(|_| {
            SensorError::ConnectionFailed(format!(
                "discover_services() timed out after {timeout_secs} s"
            ))
        })?
        .map_err(|e| SensorError::ConnectionFailed(e.to_string()))?;

        if !self.peripheral.services().iter().any(|s| s.uuid == service) {
            return Err(SensorError::ConnectionFailed(format!(
                "service {service} not found"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SensorLink for BleLink {
    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    async fn subscribe(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream, SensorError> {
        let failed = |e: btleplug::Error| SensorError::ConnectionFailed(e.to_string());

        let target = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
            .ok_or_else(|| {
                SensorError::ConnectionFailed(format!("characteristic {characteristic} not found"))
            })?;

        // Grab the stream before enabling notifications so the first value
        // cannot slip past.
        let notifications = self.peripheral.notifications().await.map_err(failed)?;
        self.peripheral.subscribe(&target).await.map_err(failed)?;

        // The adapter's DeviceDisconnected event usually fires before the
        // notification stream closes; end the stream on whichever comes first.
        let peripheral_id = self.peripheral.id();
        let disconnected: BoxFuture<'static, ()> = match self.adapter.events().await {
            Ok(events) => events
                .filter(move |event| {
                    future::ready(matches!(
                        event,
                        CentralEvent::DeviceDisconnected(id) if *id == peripheral_id
                    ))
                })
                .into_future()
                .map(|_| ())
                .boxed(),
            Err(e) => {
                warn!("could not subscribe to adapter events: {e}");
                future::pending().boxed()
            }
        };

        Ok(notifications
            .filter_map(move |n| future::ready((n.uuid == characteristic).then_some(n.value)))
            .take_until(disconnected)
            .boxed())
    }

    async fn disconnect(&self) -> Result<(), SensorError> {
        if self.peripheral.is_connected().await.unwrap_or(false) {
            self.peripheral
                .disconnect()
                .await
                .map_err(|e| SensorError::ConnectionFailed(e.to_string()))?;
            info!("Disconnected from {:?}", self.device.name);
        }
        Ok(())
    }
}
