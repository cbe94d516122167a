//! # vitals-rs
//!
//! Async Rust core for acquiring live vitals from two independent sources:
//!
//! * **Bluetooth Low Energy health sensors**: standard GATT profiles decoded
//!   from their IEEE-11073 payloads into typed [`types::Reading`]s.
//! * **Contactless camera PPG**: heart rate (and a derived respiration
//!   heuristic) estimated from the red channel of a live video feed.
//!
//! ## Supported sensors
//!
//! | Kind | Service | Characteristic | Reading |
//! |---|---|---|---|
//! | Heart rate | 0x180D | 0x2A37 | bpm (`u16`) |
//! | Blood pressure | 0x1810 | 0x2A35 | systolic / diastolic mmHg |
//! | Thermometer | 0x1809 | 0x2A1C | °C, one decimal |
//! | Pulse oximeter | 0x1822 | 0x2A5F | SpO2 % |
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use vitals_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = Arc::new(BleTransport::new(SensorClientConfig::default()));
//!     let registry = SensorRegistry::new(transport);
//!
//!     let name = registry
//!         .connect(SensorKind::HeartRate, |reading| println!("{reading:?}"))
//!         .await?;
//!     println!("streaming from {name}");
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(60)).await;
//!     registry.disconnect_all().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`prelude`] | One-line glob import of the most commonly needed types |
//! | [`sensor_client`] | Per-kind connection lifecycle and the [`sensor_client::SensorRegistry`] |
//! | [`transport`] | Capability traits between connections and a wireless stack |
//! | [`ble`] | btleplug-backed transport |
//! | [`mock`] | Scripted transport for tests and `--simulate` |
//! | [`parse`] | Pure byte-to-reading decoders |
//! | [`protocol`] | GATT UUIDs, sentinels, sampling constants, wire encoders |
//! | [`signal`] | Rolling buffer, smoothing, peak detection, damped rate estimator |
//! | [`optical`] | Frame sampling and the cooperative optical loop |
//! | [`types`] | Sensor kinds, readings and estimates |
//! | [`error`] | Error taxonomy |

pub mod ble;
pub mod error;
pub mod mock;
pub mod optical;
pub mod parse;
pub mod protocol;
pub mod sensor_client;
pub mod signal;
pub mod transport;
pub mod types;

// ── Prelude ───────────────────────────────────────────────────────────────────

/// Convenience re-exports for downstream crates.
pub mod prelude {
    // ── Wireless ──────────────────────────────────────────────────────────────
    pub use crate::ble::{BleTransport, SensorClientConfig};
    pub use crate::mock::ScriptedTransport;
    pub use crate::sensor_client::{SensorConnection, SensorRegistry};
    pub use crate::transport::{DeviceInfo, DeviceSelector, SensorLink, SensorTransport};

    // ── Optical ───────────────────────────────────────────────────────────────
    pub use crate::optical::{
        FrameSource, IntervalTicks, ManualTicks, OpticalVitalsProcessor, RgbaSurface,
        VideoFrame, WorkingSurface,
    };
    pub use crate::signal::OpticalConfig;

    // ── Data types ────────────────────────────────────────────────────────────
    pub use crate::error::{DecodeError, SensorError};
    pub use crate::types::{BloodPressure, ConnectionState, Reading, SensorKind, VitalsEstimate};
}
