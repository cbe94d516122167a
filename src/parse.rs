//! Binary decoders for Bluetooth health-profile characteristic payloads.
//!
//! All public functions in this module are pure (no I/O, no state) and are
//! safe to call from any async or sync context.
//!
//! | Function | Characteristic | Layout |
//! |---|---|---|
//! | [`decode_heart_rate`] | 0x2A37 | flags, u8 or u16 LE |
//! | [`decode_blood_pressure`] | 0x2A35 | flags, SFLOAT sys @1, SFLOAT dia @3 |
//! | [`decode_temperature`] | 0x2A1C | flags, FLOAT @1 |
//! | [`decode_spo2`] | 0x2A5F | flags, SFLOAT SpO2 @1, SFLOAT pulse @3 |
//!
//! Absent values (the IEEE-11073 "not a number" patterns) come back as
//! `Ok(None)` and must never reach a consumer callback.  Buffers too short
//! for the layout are a [`DecodeError`].

use crate::error::DecodeError;
use crate::protocol::{FLOAT_NAN, KPA_TO_MMHG, SFLOAT_NAN};
use crate::types::{BloodPressure, Reading, SensorKind};

/// Flags bit 0, shared meaning per profile: u16 HR / kPa / Fahrenheit.
const FLAG_BIT0: u8 = 0x01;

// ── IEEE-11073 numerics ───────────────────────────────────────────────────────

/// Decode a 16-bit SFLOAT: `mantissa × 10^exponent`.
///
/// ```text
/// [EEEE MMMM MMMM MMMM]
///   │    └─ 12-bit two's-complement mantissa
///   └────── 4-bit two's-complement exponent
/// ```
///
/// Returns `None` for the reserved NaN pattern `0x07FF`.
pub fn decode_sfloat(raw: u16) -> Option<f64> {
    if raw == SFLOAT_NAN {
        return None;
    }
    // Shift the field to the top of an i16 and back to sign-extend it.
    let mantissa = ((raw << 4) as i16) >> 4;
    let exponent = (raw as i16) >> 12;
    Some(mantissa as f64 * 10f64.powi(exponent as i32))
}

/// Decode a 32-bit FLOAT: 8-bit signed exponent, 24-bit signed mantissa.
///
/// Returns `None` for the reserved NaN pattern `0x007FFFFF`.
pub fn decode_float(raw: u32) -> Option<f64> {
    if raw == FLOAT_NAN {
        return None;
    }
    let mantissa = ((raw << 8) as i32) >> 8;
    let exponent = (raw >> 24) as u8 as i8;
    Some(mantissa as f64 * 10f64.powi(exponent as i32))
}

fn ensure_len(kind: SensorKind, data: &[u8], expected: usize) -> Result<(), DecodeError> {
    if data.len() < expected {
        return Err(DecodeError::TooShort {
            kind,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn read_sfloat(data: &[u8], offset: usize) -> Option<f64> {
    decode_sfloat(u16::from_le_bytes([data[offset], data[offset + 1]]))
}

// ── Profiles ──────────────────────────────────────────────────────────────────

/// Decode a Heart Rate Measurement into beats per minute.
///
/// Flags bit 0 clear → u8 at byte 1; set → u16 LE at bytes 1..=2.  Sensor
/// contact, energy expended and RR-interval fields are ignored.
pub fn decode_heart_rate(data: &[u8]) -> Result<u16, DecodeError> {
    let kind = SensorKind::HeartRate;
    ensure_len(kind, data, 2)?;
    if data[0] & FLAG_BIT0 == 0 {
        return Ok(data[1] as u16);
    }
    ensure_len(kind, data, 3)?;
    Ok(u16::from_le_bytes([data[1], data[2]]))
}

/// Decode a Blood Pressure Measurement into integer mmHg.
///
/// Flags bit 0 set means the compound value is in kPa and is scaled by
/// [`KPA_TO_MMHG`] before rounding.  Mean arterial pressure, timestamp,
/// pulse rate and user-id fields are not read.
///
/// Returns `Ok(None)` if either systolic or diastolic is NaN.
pub fn decode_blood_pressure(data: &[u8]) -> Result<Option<BloodPressure>, DecodeError> {
    ensure_len(SensorKind::BloodPressure, data, 5)?;
    let in_kpa = data[0] & FLAG_BIT0 != 0;
    let (Some(systolic), Some(diastolic)) = (read_sfloat(data, 1), read_sfloat(data, 3)) else {
        return Ok(None);
    };
    let to_mmhg = |v: f64| {
        let v = if in_kpa { v * KPA_TO_MMHG } else { v };
        v.round() as i32
    };
    Ok(Some(BloodPressure {
        systolic: to_mmhg(systolic),
        diastolic: to_mmhg(diastolic),
    }))
}

/// Decode a Temperature Measurement into °C rounded to one decimal.
///
/// Flags bit 0 set means the FLOAT is Fahrenheit: `C = (F − 32) × 5/9`.
pub fn decode_temperature(data: &[u8]) -> Result<Option<f64>, DecodeError> {
    ensure_len(SensorKind::Thermometer, data, 5)?;
    let fahrenheit = data[0] & FLAG_BIT0 != 0;
    let raw = u32::from_le_bytes([data[1], data[2], data[3], data[4]]);
    Ok(decode_float(raw).map(|t| {
        let celsius = if fahrenheit { (t - 32.0) * 5.0 / 9.0 } else { t };
        (celsius * 10.0).round() / 10.0
    }))
}

/// Decode a PLX Continuous Measurement into SpO2 percent.
///
/// The pulse-rate SFLOAT at offset 3 is not required.
pub fn decode_spo2(data: &[u8]) -> Result<Option<f64>, DecodeError> {
    ensure_len(SensorKind::Oximeter, data, 3)?;
    Ok(read_sfloat(data, 1))
}

/// Decode one notification for `kind` into a [`Reading`].
///
/// `Ok(None)` means the device reported "no value" and nothing should be
/// forwarded.
pub fn decode_reading(kind: SensorKind, data: &[u8]) -> Result<Option<Reading>, DecodeError> {
    Ok(match kind {
        SensorKind::HeartRate => Some(Reading::HeartRate(decode_heart_rate(data)?)),
        SensorKind::BloodPressure => decode_blood_pressure(data)?.map(Reading::BloodPressure),
        SensorKind::Thermometer => decode_temperature(data)?.map(Reading::Temperature),
        SensorKind::Oximeter => decode_spo2(data)?.map(Reading::SpO2),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_float, encode_sfloat};

    fn sfloat_bytes(mantissa: i16, exponent: i8) -> [u8; 2] {
        encode_sfloat(mantissa, exponent).to_le_bytes()
    }

    #[test]
    fn sfloat_reproduces_every_non_sentinel_encoding() {
        for exponent in -8i8..=7 {
            for mantissa in -2048i16..=2047 {
                let raw = encode_sfloat(mantissa, exponent);
                if raw == SFLOAT_NAN {
                    continue;
                }
                let expected = mantissa as f64 * 10f64.powi(exponent as i32);
                let got = decode_sfloat(raw).unwrap();
                let tolerance = expected.abs().max(1e-8) * 1e-12;
                assert!(
                    (got - expected).abs() <= tolerance,
                    "raw=0x{raw:04x}: {got} != {expected}"
                );
            }
        }
    }

    #[test]
    fn sfloat_nan_is_absent() {
        assert_eq!(decode_sfloat(0x07FF), None);
        let payload = [0x00, 0xFF, 0x07, 0x5A, 0x00];
        assert_eq!(decode_spo2(&payload), Ok(None));
        assert_eq!(decode_reading(SensorKind::Oximeter, &payload), Ok(None));
    }

    #[test]
    fn sfloat_sign_extends_negative_fields() {
        // exponent −1, mantissa −5 → −0.5
        assert_eq!(decode_sfloat(0xFFFB), Some(-0.5));
        // exponent 2, mantissa 3 → 300
        assert_eq!(decode_sfloat(0x2003), Some(300.0));
    }

    #[test]
    fn float_decodes_signed_exponent() {
        assert!((decode_float(encode_float(986, -1)).unwrap() - 98.6).abs() < 1e-9);
        assert_eq!(decode_float(encode_float(-42, 0)), Some(-42.0));
        assert_eq!(decode_float(encode_float(37, 1)), Some(370.0));
        assert_eq!(decode_float(FLOAT_NAN), None);
    }

    #[test]
    fn heart_rate_8_and_16_bit() {
        assert_eq!(decode_heart_rate(&[0x00, 72]), Ok(72));
        assert_eq!(decode_heart_rate(&[0x01, 72, 0x00]), Ok(72));
        assert_eq!(decode_heart_rate(&[0x01, 0x2C, 0x01]), Ok(300));
        // Contact + RR bits set, still 8-bit.
        assert_eq!(decode_heart_rate(&[0x16, 60, 0x00, 0x04]), Ok(60));
    }

    #[test]
    fn heart_rate_rejects_short_buffers() {
        assert_eq!(
            decode_heart_rate(&[0x01, 72]),
            Err(DecodeError::TooShort {
                kind: SensorKind::HeartRate,
                expected: 3,
                actual: 2
            })
        );
        assert!(decode_heart_rate(&[]).is_err());
    }

    #[test]
    fn blood_pressure_kpa_converts_to_mmhg() {
        let mut payload = vec![0x01];
        payload.extend(sfloat_bytes(160, -1)); // 16.0 kPa
        payload.extend(sfloat_bytes(100, -1)); // 10.0 kPa
        let bp = decode_blood_pressure(&payload).unwrap().unwrap();
        assert_eq!(bp, BloodPressure { systolic: 120, diastolic: 75 });
    }

    #[test]
    fn blood_pressure_mmhg_ignores_extension_fields() {
        let mut payload = vec![0x1E];
        payload.extend(sfloat_bytes(121, 0));
        payload.extend(sfloat_bytes(79, 0));
        payload.extend(sfloat_bytes(93, 0)); // MAP
        payload.extend([0xE8, 0x07, 1, 1, 0, 0, 0]); // timestamp
        let bp = decode_blood_pressure(&payload).unwrap().unwrap();
        assert_eq!(bp, BloodPressure { systolic: 121, diastolic: 79 });
    }

    #[test]
    fn blood_pressure_nan_component_is_absent() {
        let mut payload = vec![0x00];
        payload.extend(sfloat_bytes(120, 0));
        payload.extend(SFLOAT_NAN.to_le_bytes());
        assert_eq!(decode_blood_pressure(&payload), Ok(None));
        assert!(decode_blood_pressure(&payload[..4]).is_err());
    }

    #[test]
    fn temperature_fahrenheit_converts_to_celsius() {
        let mut payload = vec![0x01];
        payload.extend(encode_float(986, -1).to_le_bytes());
        let c = decode_temperature(&payload).unwrap().unwrap();
        assert!((c - 37.0).abs() <= 0.1, "{c}");
    }

    #[test]
    fn temperature_celsius_rounds_to_one_decimal() {
        let mut payload = vec![0x00];
        payload.extend(encode_float(36_874, -3).to_le_bytes());
        assert_eq!(decode_temperature(&payload), Ok(Some(36.9)));

        let mut nan = vec![0x00];
        nan.extend(FLOAT_NAN.to_le_bytes());
        assert_eq!(decode_temperature(&nan), Ok(None));
    }

    #[test]
    fn spo2_reads_offset_one_only() {
        let mut payload = vec![0x00];
        payload.extend(sfloat_bytes(97, 0));
        assert_eq!(
            decode_reading(SensorKind::Oximeter, &payload),
            Ok(Some(Reading::SpO2(97.0)))
        );
        assert!(decode_spo2(&payload[..2]).is_err());
    }
}
