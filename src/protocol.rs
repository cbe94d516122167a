//! GATT UUIDs, optical sampling constants, and IEEE-11073 wire-format helpers.
//!
//! All sensor services are Bluetooth SIG adopted profiles, so every 16-bit
//! assigned number expands into the Bluetooth base UUID
//! `0000xxxx-0000-1000-8000-00805f9b34fb`.

use uuid::Uuid;

/// Expand a 16-bit Bluetooth SIG assigned number into a full 128-bit UUID.
pub const fn sig_uuid(short: u16) -> Uuid {
    Uuid::from_u128(0x0000_0000_0000_1000_8000_0080_5f9b_34fb | ((short as u128) << 96))
}

// ── Services ─────────────────────────────────────────────────────────────────

/// Heart Rate service.
pub const HEART_RATE_SERVICE: Uuid = sig_uuid(0x180D);

/// Blood Pressure service.
pub const BLOOD_PRESSURE_SERVICE: Uuid = sig_uuid(0x1810);

/// Health Thermometer service.
pub const HEALTH_THERMOMETER_SERVICE: Uuid = sig_uuid(0x1809);

/// Pulse Oximeter service.
pub const PULSE_OXIMETER_SERVICE: Uuid = sig_uuid(0x1822);

// ── Characteristics ───────────────────────────────────────────────────────────

/// Heart Rate Measurement, notified once per beat or once per second.
pub const HEART_RATE_MEASUREMENT: Uuid = sig_uuid(0x2A37);

/// Blood Pressure Measurement, indicated once per completed cuff cycle.
pub const BLOOD_PRESSURE_MEASUREMENT: Uuid = sig_uuid(0x2A35);

/// Temperature Measurement.
pub const TEMPERATURE_MEASUREMENT: Uuid = sig_uuid(0x2A1C);

/// PLX Continuous Measurement (SpO2 + pulse rate).
pub const PLX_CONTINUOUS_MEASUREMENT: Uuid = sig_uuid(0x2A5F);

// ── IEEE-11073 sentinels ──────────────────────────────────────────────────────

/// SFLOAT "not a number" (exponent 0, mantissa 0x7FF).
pub const SFLOAT_NAN: u16 = 0x07FF;

/// FLOAT "not a number" (exponent 0, mantissa 0x7FFFFF).
pub const FLOAT_NAN: u32 = 0x007F_FFFF;

/// kPa → mmHg conversion factor used by the blood pressure decoder.
pub const KPA_TO_MMHG: f64 = 7.50062;

// ── Optical sampling constants ────────────────────────────────────────────────

/// Camera sampling rate in Hz.
pub const OPTICAL_FREQUENCY: u32 = 30;

/// Seconds of signal kept in the rolling window.
pub const OPTICAL_WINDOW_SECS: u32 = 5;

/// Rolling window length in samples (5 s at 30 Hz).
pub const OPTICAL_BUFFER_LEN: usize = (OPTICAL_FREQUENCY * OPTICAL_WINDOW_SECS) as usize;

/// Moving-average length applied before peak detection.
pub const SMOOTHING_WINDOW: usize = 5;

/// Plausible human heart-rate range; estimates are clamped into it.
pub const BPM_RANGE: (u16, u16) = (40, 180);

/// Fallback label for devices that do not advertise a local name.
pub const UNKNOWN_DEVICE_NAME: &str = "Unknown Device";

// ── Wire encoders ─────────────────────────────────────────────────────────────

/// Encode `mantissa × 10^exponent` as a 16-bit IEEE-11073 SFLOAT.
///
/// ```text
/// bits 15..12 : exponent, 4-bit two's complement
/// bits 11..0  : mantissa, 12-bit two's complement
/// ```
///
/// Out-of-range inputs are truncated to their low 4 / 12 bits.
///
/// ```
/// # use vitals_rs::protocol::encode_sfloat;
/// // 16.0 kPa = 160 × 10⁻¹
/// assert_eq!(encode_sfloat(160, -1), 0xF0A0);
/// ```
pub fn encode_sfloat(mantissa: i16, exponent: i8) -> u16 {
    (((exponent as u16) & 0x000F) << 12) | ((mantissa as u16) & 0x0FFF)
}

/// Encode `mantissa × 10^exponent` as a 32-bit IEEE-11073 FLOAT.
///
/// Byte 3 carries the signed exponent, bytes 0..=2 the 24-bit two's
/// complement mantissa.  Serialise with `to_le_bytes()` for the wire.
pub fn encode_float(mantissa: i32, exponent: i8) -> u32 {
    ((exponent as u8 as u32) << 24) | ((mantissa as u32) & 0x00FF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sig_uuids_use_bluetooth_base() {
        assert_eq!(
            HEART_RATE_SERVICE.to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            PLX_CONTINUOUS_MEASUREMENT.to_string(),
            "00002a5f-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn encoders_pack_twos_complement_fields() {
        assert_eq!(encode_sfloat(-1, 0), 0x0FFF);
        assert_eq!(encode_sfloat(72, 0), 0x0048);
        assert_eq!(encode_float(986, -1), 0xFF00_03DA);
        assert_eq!(encode_float(-1, 2), 0x02FF_FFFF);
    }

    #[test]
    fn optical_window_is_five_seconds() {
        assert_eq!(OPTICAL_BUFFER_LEN, 150);
    }
}
