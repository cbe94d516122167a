use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::{
    BLOOD_PRESSURE_MEASUREMENT, BLOOD_PRESSURE_SERVICE, HEALTH_THERMOMETER_SERVICE,
    HEART_RATE_MEASUREMENT, HEART_RATE_SERVICE, PLX_CONTINUOUS_MEASUREMENT,
    PULSE_OXIMETER_SERVICE, TEMPERATURE_MEASUREMENT,
};

/// The wireless sensor profiles this crate can subscribe to.
///
/// Each kind maps to exactly one GATT service / characteristic pair:
///
/// | Kind | Service | Characteristic |
/// |---|---|---|
/// | `HeartRate` | 0x180D | 0x2A37 |
/// | `BloodPressure` | 0x1810 | 0x2A35 |
/// | `Thermometer` | 0x1809 | 0x2A1C |
/// | `Oximeter` | 0x1822 | 0x2A5F |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    HeartRate,
    BloodPressure,
    Thermometer,
    Oximeter,
}

impl SensorKind {
    /// Every supported kind, in registry order.
    pub const ALL: [SensorKind; 4] = [
        SensorKind::HeartRate,
        SensorKind::BloodPressure,
        SensorKind::Thermometer,
        SensorKind::Oximeter,
    ];

    /// GATT service a device must advertise to be offered for this kind.
    pub fn service_uuid(self) -> Uuid {
        match self {
            SensorKind::HeartRate => HEART_RATE_SERVICE,
            SensorKind::BloodPressure => BLOOD_PRESSURE_SERVICE,
            SensorKind::Thermometer => HEALTH_THERMOMETER_SERVICE,
            SensorKind::Oximeter => PULSE_OXIMETER_SERVICE,
        }
    }

    /// Characteristic whose notifications carry the measurement.
    pub fn characteristic_uuid(self) -> Uuid {
        match self {
            SensorKind::HeartRate => HEART_RATE_MEASUREMENT,
            SensorKind::BloodPressure => BLOOD_PRESSURE_MEASUREMENT,
            SensorKind::Thermometer => TEMPERATURE_MEASUREMENT,
            SensorKind::Oximeter => PLX_CONTINUOUS_MEASUREMENT,
        }
    }

    /// Kebab-case name used on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            SensorKind::HeartRate => "heart-rate",
            SensorKind::BloodPressure => "blood-pressure",
            SensorKind::Thermometer => "thermometer",
            SensorKind::Oximeter => "oximeter",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "heart-rate" | "hr" => Ok(SensorKind::HeartRate),
            "blood-pressure" | "bp" => Ok(SensorKind::BloodPressure),
            "thermometer" | "temperature" => Ok(SensorKind::Thermometer),
            "oximeter" | "spo2" => Ok(SensorKind::Oximeter),
            other => Err(format!("unknown sensor kind '{other}'")),
        }
    }
}

/// Lifecycle of one [`crate::sensor_client::SensorConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// `connect()` is in flight: selecting, connecting, or subscribing.
    Connecting,
    /// Notifications are being decoded and forwarded.
    Connected,
}

/// A blood pressure measurement in integer mmHg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BloodPressure {
    pub systolic: i32,
    pub diastolic: i32,
}

/// One decoded, present measurement delivered to `on_reading`.
///
/// Sentinel ("not a number") payloads never become a `Reading`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Reading {
    /// Beats per minute.
    HeartRate(u16),
    BloodPressure(BloodPressure),
    /// Body temperature in °C, rounded to one decimal.
    Temperature(f64),
    /// Oxygen saturation in percent.
    #[serde(rename = "spo2")]
    SpO2(f64),
}

impl Reading {
    /// The sensor kind that produces this reading.
    pub fn kind(&self) -> SensorKind {
        match self {
            Reading::HeartRate(_) => SensorKind::HeartRate,
            Reading::BloodPressure(_) => SensorKind::BloodPressure,
            Reading::Temperature(_) => SensorKind::Thermometer,
            Reading::SpO2(_) => SensorKind::Oximeter,
        }
    }
}

/// Camera-derived vitals for one processing tick.
///
/// `respiration_rate` is `round(bpm / 4)`: a heuristic scaled from the heart
/// rate, not an independently measured breathing signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VitalsEstimate {
    /// Damped heart rate, clamped to 40..=180.
    pub bpm: u16,
    /// Breaths per minute (heuristic).
    pub respiration_rate: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_parse_from_cli_names() {
        for kind in SensorKind::ALL {
            assert_eq!(kind.as_str().parse::<SensorKind>(), Ok(kind));
        }
        assert_eq!("SpO2".parse::<SensorKind>(), Ok(SensorKind::Oximeter));
        assert_eq!("heart_rate".parse::<SensorKind>(), Ok(SensorKind::HeartRate));
        assert!("glucose".parse::<SensorKind>().is_err());
    }

    #[test]
    fn reading_serializes_tagged() {
        let json = serde_json::to_string(&Reading::BloodPressure(BloodPressure {
            systolic: 120,
            diastolic: 80,
        }))
        .unwrap();
        assert_eq!(
            json,
            r#"{"kind":"blood_pressure","value":{"systolic":120,"diastolic":80}}"#
        );
        assert_eq!(Reading::SpO2(97.0).kind(), SensorKind::Oximeter);
        assert_eq!(
            serde_json::to_string(&Reading::SpO2(97.0)).unwrap(),
            r#"{"kind":"spo2","value":97.0}"#
        );
    }
}
