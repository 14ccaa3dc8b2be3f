pub mod protocol;

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

// We use `Box<str>` for strings that never grow after construction. This
// keeps snapshots compact and cheap to clone.
type BoxStr = Box<str>;

/// Maximum number of entries kept in the rolling system log.
pub const LOG_CAPACITY: usize = 50;

/// Source label used when a log record does not name one.
pub const DEFAULT_LOG_SOURCE: &str = "system";

/// Unique code of a monitored environment (site / tenant).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvCode(pub BoxStr);

impl EnvCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EnvCode {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for EnvCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a field device, as assigned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceCode(pub BoxStr);

impl DeviceCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceCode {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl fmt::Display for DeviceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Numeric device status as sent on the wire (1 = on / online, 0 = off / offline).
pub type StatusValue = i64;

/// Unique identifier for a system log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogId(pub Ulid);

/// A monitored site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// Code used to scope push messages to this environment.
    #[serde(rename = "envCode")]
    pub code: EnvCode,
    /// Human readable name.
    #[serde(rename = "envName", default)]
    pub name: Option<BoxStr>,
}

impl Environment {
    pub fn new(code: impl Into<EnvCode>) -> Self {
        Self {
            code: code.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// An actuator from the authoritative device list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlDevice {
    pub device_code: DeviceCode,
    #[serde(default)]
    pub device_name: Option<BoxStr>,
    /// Declared control status. Devices without one start switched off.
    #[serde(default)]
    pub status: Option<StatusValue>,
}

/// The fixed set of measured environment parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParameterKind {
    AirTemp,
    AirHumidity,
    SoilTemp,
    SoilHumidity,
    Co2Concentration,
    LightIntensity,
}

impl ParameterKind {
    /// Every parameter kind, in wire-code order.
    pub const ALL: [ParameterKind; 6] = [
        ParameterKind::AirTemp,
        ParameterKind::AirHumidity,
        ParameterKind::SoilTemp,
        ParameterKind::SoilHumidity,
        ParameterKind::Co2Concentration,
        ParameterKind::LightIntensity,
    ];

    /// Key used for this parameter in serialized snapshots.
    pub fn key(self) -> &'static str {
        match self {
            ParameterKind::AirTemp => "airTemp",
            ParameterKind::AirHumidity => "airHumidity",
            ParameterKind::SoilTemp => "soilTemp",
            ParameterKind::SoilHumidity => "soilHumidity",
            ParameterKind::Co2Concentration => "co2Concentration",
            ParameterKind::LightIntensity => "lightIntensity",
        }
    }
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A value for every [`ParameterKind`].
///
/// The mapping is complete by construction: there is no way to remove a
/// parameter, only to overwrite its value.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterMap<T> {
    pub air_temp: T,
    pub air_humidity: T,
    pub soil_temp: T,
    pub soil_humidity: T,
    pub co2_concentration: T,
    pub light_intensity: T,
}

impl<T> ParameterMap<T> {
    pub fn from_fn(mut f: impl FnMut(ParameterKind) -> T) -> Self {
        Self {
            air_temp: f(ParameterKind::AirTemp),
            air_humidity: f(ParameterKind::AirHumidity),
            soil_temp: f(ParameterKind::SoilTemp),
            soil_humidity: f(ParameterKind::SoilHumidity),
            co2_concentration: f(ParameterKind::Co2Concentration),
            light_intensity: f(ParameterKind::LightIntensity),
        }
    }

    pub fn get(&self, kind: ParameterKind) -> &T {
        match kind {
            ParameterKind::AirTemp => &self.air_temp,
            ParameterKind::AirHumidity => &self.air_humidity,
            ParameterKind::SoilTemp => &self.soil_temp,
            ParameterKind::SoilHumidity => &self.soil_humidity,
            ParameterKind::Co2Concentration => &self.co2_concentration,
            ParameterKind::LightIntensity => &self.light_intensity,
        }
    }

    pub fn get_mut(&mut self, kind: ParameterKind) -> &mut T {
        match kind {
            ParameterKind::AirTemp => &mut self.air_temp,
            ParameterKind::AirHumidity => &mut self.air_humidity,
            ParameterKind::SoilTemp => &mut self.soil_temp,
            ParameterKind::SoilHumidity => &mut self.soil_humidity,
            ParameterKind::Co2Concentration => &mut self.co2_concentration,
            ParameterKind::LightIntensity => &mut self.light_intensity,
        }
    }

    pub fn set(&mut self, kind: ParameterKind, value: T) {
        *self.get_mut(kind) = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParameterKind, &T)> {
        ParameterKind::ALL
            .into_iter()
            .map(move |kind| (kind, self.get(kind)))
    }
}

/// Latest value reported for a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Reading {
    /// Measured value.
    pub value: f64,
    /// Exception / status code reported alongside the value (0 = normal).
    pub ex: i64,
}

impl Reading {
    pub fn new(value: f64, ex: i64) -> Self {
        Self { value, ex }
    }
}

/// Latest readings for all parameters. `SensorReadings::default()` is the
/// all-zero baseline.
pub type SensorReadings = ParameterMap<Reading>;

/// Alert band for a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub min: f64,
    pub max: f64,
}

/// Where a value falls relative to a [`Threshold`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Below,
    Within,
    Above,
}

impl Threshold {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Bounds are inclusive.
    pub fn classify(&self, value: f64) -> Band {
        if value < self.min {
            Band::Below
        } else if value > self.max {
            Band::Above
        } else {
            Band::Within
        }
    }
}

pub type Thresholds = ParameterMap<Threshold>;

impl ParameterMap<Threshold> {
    /// Default alert bands used until the user edits them.
    pub fn standard() -> Self {
        Self {
            air_temp: Threshold::new(15.0, 30.0),
            air_humidity: Threshold::new(40.0, 70.0),
            soil_temp: Threshold::new(15.0, 25.0),
            soil_humidity: Threshold::new(30.0, 80.0),
            co2_concentration: Threshold::new(400.0, 1000.0),
            light_intensity: Threshold::new(1000.0, 5000.0),
        }
    }

    /// Parameters whose current reading lies outside its band.
    pub fn out_of_band(&self, readings: &SensorReadings) -> Vec<(ParameterKind, Band)> {
        self.iter()
            .map(|(kind, threshold)| (kind, threshold.classify(readings.get(kind).value)))
            .filter(|(_, band)| *band != Band::Within)
            .collect()
    }
}

/// Severity tag of a system log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

impl From<&str> for LogKind {
    /// Unrecognized tags fall back to `Info`.
    fn from(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "success" => LogKind::Success,
            "warning" | "warn" => LogKind::Warning,
            "error" => LogKind::Error,
            _ => LogKind::Info,
        }
    }
}

/// An entry of the rolling system log. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: LogId,
    pub timestamp: jiff::Timestamp,
    pub kind: LogKind,
    pub message: BoxStr,
    pub source: BoxStr,
}

impl LogEntry {
    pub fn new(kind: LogKind, message: &str, source: Option<&str>) -> Self {
        Self {
            id: LogId(Ulid::new()),
            timestamp: jiff::Timestamp::now(),
            kind,
            message: message.into(),
            source: source.unwrap_or(DEFAULT_LOG_SOURCE).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_readings_are_zero() {
        let readings = SensorReadings::default();

        assert_eq!(readings.iter().count(), 6);
        assert!(readings.iter().all(|(_, r)| *r == Reading::new(0.0, 0)));
    }

    #[test]
    fn set_only_touches_one_parameter() {
        let mut readings = SensorReadings::default();
        readings.set(ParameterKind::SoilHumidity, Reading::new(41.5, 2));

        assert_eq!(
            *readings.get(ParameterKind::SoilHumidity),
            Reading::new(41.5, 2)
        );
        assert_eq!(*readings.get(ParameterKind::SoilTemp), Reading::default());
    }

    #[test]
    fn readings_serialize_with_all_six_keys() {
        let value = serde_json::to_value(SensorReadings::default()).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object.len(), 6);
        for kind in ParameterKind::ALL {
            assert!(object.contains_key(kind.key()), "missing {kind}");
        }
    }

    #[test]
    fn threshold_bounds_are_inclusive() {
        let t = Threshold::new(15.0, 30.0);

        assert_eq!(t.classify(14.9), Band::Below);
        assert_eq!(t.classify(15.0), Band::Within);
        assert_eq!(t.classify(30.0), Band::Within);
        assert_eq!(t.classify(30.1), Band::Above);
    }

    #[test]
    fn out_of_band_lists_offending_parameters() {
        let thresholds = Thresholds::standard();
        let mut readings = SensorReadings::from_fn(|kind| {
            let t = thresholds.get(kind);
            Reading::new((t.min + t.max) / 2.0, 0)
        });
        readings.set(ParameterKind::Co2Concentration, Reading::new(1500.0, 0));

        assert_eq!(
            thresholds.out_of_band(&readings),
            vec![(ParameterKind::Co2Concentration, Band::Above)]
        );
    }

    #[test]
    fn log_kind_falls_back_to_info() {
        assert_eq!(LogKind::from("ERROR"), LogKind::Error);
        assert_eq!(LogKind::from("success"), LogKind::Success);
        assert_eq!(LogKind::from("debug"), LogKind::Info);
    }

    #[test]
    fn log_entry_defaults_source() {
        let entry = LogEntry::new(LogKind::Warning, "pump stalled", None);

        assert_eq!(&*entry.source, DEFAULT_LOG_SOURCE);
        assert_eq!(&*entry.message, "pump stalled");
    }
}
