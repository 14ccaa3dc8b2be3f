//! JSON text-frame protocol spoken over the push channel.
//!
//! Every inbound frame is an object `{ "type": string, "env": string, "data": ... }`
//! where the shape of `data` depends on `type`. Payload parsers are lenient at
//! the entry level: one malformed list element is reported and skipped, the
//! rest still parse.

mod device;
mod error;
mod sensor;

pub use error::{ParseResult, ProtocolError};

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{DeviceCode, LogKind, ParameterKind, Reading, StatusValue};
use device::DeviceStatusEntry;
use sensor::SensorEntry;

pub const SENSOR_DATA: &str = "SENSOR_DATA";
pub const CONTROL_DEVICE_STATUS: &str = "CONTROL_DEVICE_STATUS";
pub const SENSOR_DEVICE_STATUS: &str = "SENSOR_DEVICE_STATUS";
pub const SYSTEM_LOG: &str = "SYSTEM_LOG";

/// Key of the reading list inside a `SENSOR_DATA` payload.
pub const SENSOR_LIST_KEY: &str = "iotSensorDataRespList";

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type", default)]
    pub kind: Option<Box<str>>,
    #[serde(default)]
    pub env: Option<Box<str>>,
    #[serde(default)]
    pub data: Value,
}

/// Declared message type of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    SensorData,
    ControlDeviceStatus,
    SensorDeviceStatus,
    SystemLog,
    Unknown(Box<str>),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::SensorData => SENSOR_DATA,
            MessageType::ControlDeviceStatus => CONTROL_DEVICE_STATUS,
            MessageType::SensorDeviceStatus => SENSOR_DEVICE_STATUS,
            MessageType::SystemLog => SYSTEM_LOG,
            MessageType::Unknown(other) => other,
        }
    }
}

impl From<&str> for MessageType {
    fn from(value: &str) -> Self {
        match value {
            SENSOR_DATA => MessageType::SensorData,
            CONTROL_DEVICE_STATUS => MessageType::ControlDeviceStatus,
            SENSOR_DEVICE_STATUS => MessageType::SensorDeviceStatus,
            SYSTEM_LOG => MessageType::SystemLog,
            other => MessageType::Unknown(other.into()),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Frame {
    pub fn new(kind: &str, env: &str, data: Value) -> Self {
        Self {
            kind: Some(kind.into()),
            env: Some(env.into()),
            data,
        }
    }

    /// Decode one text frame. Anything that is not a JSON object is rejected.
    pub fn decode(text: &str) -> ParseResult<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

        if !value.is_object() {
            return Err(ProtocolError::NotAnObject);
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::InvalidFrame(e.to_string()))
    }

    pub fn message_type(&self) -> MessageType {
        MessageType::from(self.kind.as_deref().unwrap_or_default())
    }
}

/// Serialize an outbound message to a JSON text frame.
pub fn encode<T: Serialize + ?Sized>(message: &T) -> ParseResult<String> {
    serde_json::to_string(message).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Result of parsing a list payload: the usable entries and why the others
/// were rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub entries: Vec<T>,
    pub skipped: Vec<ProtocolError>,
}

fn parse_list<E, T>(list: &[Value], convert: impl Fn(E) -> ParseResult<T>) -> Parsed<T>
where
    E: DeserializeOwned,
{
    let mut parsed = Parsed {
        entries: Vec::with_capacity(list.len()),
        skipped: Vec::new(),
    };

    for item in list {
        let entry = E::deserialize(item)
            .map_err(|e| ProtocolError::InvalidPayload(e.to_string()))
            .and_then(&convert);

        match entry {
            Ok(entry) => parsed.entries.push(entry),
            Err(e) => parsed.skipped.push(e),
        }
    }

    parsed
}

/// Parse a `SENSOR_DATA` payload.
pub fn sensor_data(data: &Value) -> ParseResult<Parsed<(ParameterKind, Reading)>> {
    let list = data
        .get(SENSOR_LIST_KEY)
        .and_then(Value::as_array)
        .ok_or(ProtocolError::UnexpectedShape {
            expected: "object with an iotSensorDataRespList array",
        })?;

    Ok(parse_list(list, SensorEntry::into_reading))
}

/// Parse a `CONTROL_DEVICE_STATUS` or `SENSOR_DEVICE_STATUS` payload.
pub fn device_statuses(data: &Value) -> ParseResult<Parsed<(DeviceCode, StatusValue)>> {
    let list = data.as_array().ok_or(ProtocolError::UnexpectedShape {
        expected: "array of device statuses",
    })?;

    Ok(parse_list(list, DeviceStatusEntry::into_status))
}

/// A `SYSTEM_LOG` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub kind: LogKind,
    pub message: Box<str>,
    pub source: Option<Box<str>>,
}

#[derive(Deserialize)]
struct SystemLogPayload {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    source: Option<String>,
}

/// Parse a `SYSTEM_LOG` payload.
pub fn system_log(data: &Value) -> ParseResult<LogRecord> {
    if !data.is_object() {
        return Err(ProtocolError::UnexpectedShape {
            expected: "log record object",
        });
    }

    let payload = SystemLogPayload::deserialize(data)
        .map_err(|e| ProtocolError::InvalidPayload(e.to_string()))?;
    let message = payload
        .message
        .ok_or(ProtocolError::MissingField("message"))?;

    Ok(LogRecord {
        kind: payload
            .kind
            .as_deref()
            .map(LogKind::from)
            .unwrap_or_default(),
        message: message.into(),
        source: payload.source.map(Into::into),
    })
}
