//! Stream vitals from BLE health sensors (or a simulator) as JSON lines.
//!
//! Usage:
//!   vitals-rs heart-rate oximeter            # real sensors, one device per kind
//!   vitals-rs --simulate heart-rate thermometer
//!   vitals-rs --simulate --camera            # synthetic camera PPG only
//!
//! Type `q` + Enter (or close stdin) to disconnect and exit.
//! Set RUST_LOG=vitals_rs=debug for verbose output.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::io::{self, BufRead};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use log::{error, info};
use serde_json::json;
use tokio::sync::watch;
use uuid::Uuid;

use vitals_rs::ble::{BleTransport, SensorClientConfig};
use vitals_rs::error::SensorError;
use vitals_rs::mock::ScriptedTransport;
use vitals_rs::optical::{OpticalVitalsProcessor, RgbaSurface, VideoFrame};
use vitals_rs::protocol::{encode_float, encode_sfloat, OPTICAL_FREQUENCY};
use vitals_rs::sensor_client::SensorRegistry;
use vitals_rs::signal::OpticalConfig;
use vitals_rs::transport::{SensorLink, SensorTransport};
use vitals_rs::types::SensorKind;

/// Beat frequency of the synthetic camera feed (1.2 Hz ≈ 72 bpm).
const SIM_PULSE_HZ: f64 = 1.2;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Logging ───────────────────────────────────────────────────────────────
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // ── Arguments ─────────────────────────────────────────────────────────────
    let mut simulate = false;
    let mut camera = false;
    let mut kinds = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--simulate" => simulate = true,
            "--camera" => camera = true,
            other => match other.parse::<SensorKind>() {
                Ok(kind) if !kinds.contains(&kind) => kinds.push(kind),
                Ok(_) => {}
                Err(e) => bail!("{e} (expected one of heart-rate, blood-pressure, thermometer, oximeter)"),
            },
        }
    }
    if kinds.is_empty() && !camera {
        bail!("usage: vitals-rs [--simulate] [--camera] <kind>...");
    }
    if camera && !simulate {
        bail!("--camera needs a frame source; only the synthetic feed (--simulate) is built in");
    }

    // ── Wireless sensors ──────────────────────────────────────────────────────
    let transport: Arc<dyn SensorTransport> = if simulate {
        Arc::new(SimulatedSensors::new(&kinds))
    } else {
        Arc::new(BleTransport::new(SensorClientConfig::default()))
    };
    let registry = SensorRegistry::new(transport);

    for &kind in &kinds {
        info!("Connecting {kind} …");
        let result = registry
            .connect(kind, |reading| {
                println!("{}", json!({ "source": "ble", "reading": reading }));
            })
            .await;
        match result {
            Ok(name) => info!("✅  {kind}: connected to {name}"),
            Err(e) => error!("❌  {kind}: {e}"),
        }
    }

    // ── Camera ────────────────────────────────────────────────────────────────
    let mut processor = OpticalVitalsProcessor::new(OpticalConfig::default());
    let mut feed = None;
    if camera {
        let (tx, rx) = watch::channel(None);
        feed = Some(tokio::spawn(synthetic_camera(tx)));
        let (w, h) = processor.config().surface_size;
        processor
            .start_realtime(rx, RgbaSurface::new(w, h), |estimate| {
                println!("{}", json!({ "source": "camera", "estimate": estimate }));
            })
            .await?;
        info!("Camera PPG started; first estimate after 5 s of signal");
    }

    // ── Wait for quit ─────────────────────────────────────────────────────────
    // Read stdin on a dedicated OS thread so a blocking StdinLock never sits
    // on the runtime.
    let (quit_tx, mut quit_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(l) if l.trim() == "q" => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
        let _ = quit_tx.send(());
    });
    quit_rx.recv().await;

    info!("Quit requested.");
    processor.stop().await;
    if let Some(feed) = feed {
        feed.abort();
    }
    registry.disconnect_all().await;
    Ok(())
}

/// Routes each service to its own scripted device.
struct SimulatedSensors {
    devices: BTreeMap<Uuid, ScriptedTransport>,
}

impl SimulatedSensors {
    fn new(kinds: &[SensorKind]) -> Self {
        let devices = kinds
            .iter()
            .map(|&kind| (kind.service_uuid(), simulated_device(kind)))
            .collect();
        Self { devices }
    }
}

#[async_trait]
impl SensorTransport for SimulatedSensors {
    async fn connect(&self, service: Uuid) -> Result<Box<dyn SensorLink>, SensorError> {
        match self.devices.get(&service) {
            Some(device) => device.connect(service).await,
            None => Err(SensorError::ConnectionFailed(format!(
                "no simulated device advertising {service}"
            ))),
        }
    }
}

/// A scripted device emitting one plausible payload per second for `kind`.
fn simulated_device(kind: SensorKind) -> ScriptedTransport {
    let script: Vec<Vec<u8>> = (0..600)
        .map(|i| {
            let wobble = ((i as f64) * 0.3).sin();
            match kind {
                SensorKind::HeartRate => vec![0x00, (72.0 + 4.0 * wobble).round() as u8],
                SensorKind::BloodPressure => {
                    let mut p = vec![0x00];
                    p.extend(encode_sfloat((120.0 + 3.0 * wobble) as i16, 0).to_le_bytes());
                    p.extend(encode_sfloat((80.0 + 2.0 * wobble) as i16, 0).to_le_bytes());
                    p.extend(encode_sfloat(93, 0).to_le_bytes());
                    p
                }
                SensorKind::Thermometer => {
                    let mut p = vec![0x00];
                    p.extend(encode_float(368 + (2.0 * wobble) as i32, -1).to_le_bytes());
                    p
                }
                SensorKind::Oximeter => {
                    let mut p = vec![0x00];
                    p.extend(encode_sfloat((97.0 + wobble) as i16, 0).to_le_bytes());
                    p.extend(encode_sfloat(72, 0).to_le_bytes());
                    p
                }
            }
        })
        .collect();

    ScriptedTransport::new(format!("Simulated {kind}"), script)
        .with_service(kind.service_uuid())
        .with_interval(Duration::from_secs(1))
        .hold_open()
}

/// Publish a 64×48 frame whose red level pulses at [`SIM_PULSE_HZ`].
async fn synthetic_camera(tx: watch::Sender<Option<VideoFrame>>) {
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / OPTICAL_FREQUENCY as f64));
    let mut n: u64 = 0;
    loop {
        ticker.tick().await;
        let t = n as f64 / OPTICAL_FREQUENCY as f64;
        let red = (150.0 + 30.0 * (2.0 * PI * SIM_PULSE_HZ * t).sin()).round() as u8;
        if tx.send(Some(VideoFrame::solid(64, 48, [red, 90, 80, 255]))).is_err() {
            break;
        }
        n += 1;
    }
}
