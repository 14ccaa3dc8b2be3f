use serde::Deserialize;

use super::error::{ParseResult, ProtocolError};
use crate::{ParameterKind, Reading};

impl TryFrom<i64> for ParameterKind {
    type Error = ProtocolError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ParameterKind::AirTemp),
            2 => Ok(ParameterKind::AirHumidity),
            3 => Ok(ParameterKind::SoilTemp),
            4 => Ok(ParameterKind::SoilHumidity),
            5 => Ok(ParameterKind::Co2Concentration),
            6 => Ok(ParameterKind::LightIntensity),
            _ => Err(ProtocolError::InvalidParameterType(value)),
        }
    }
}

impl ParameterKind {
    /// Numeric code used for this parameter on the wire.
    pub fn code(self) -> i64 {
        match self {
            ParameterKind::AirTemp => 1,
            ParameterKind::AirHumidity => 2,
            ParameterKind::SoilTemp => 3,
            ParameterKind::SoilHumidity => 4,
            ParameterKind::Co2Concentration => 5,
            ParameterKind::LightIntensity => 6,
        }
    }
}

/// One element of `iotSensorDataRespList`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SensorEntry {
    env_parameter_type: i64,
    data_value: f64,
    ex: i64,
}

impl SensorEntry {
    pub(crate) fn into_reading(self) -> ParseResult<(ParameterKind, Reading)> {
        let kind = ParameterKind::try_from(self.env_parameter_type)?;
        Ok((kind, Reading::new(self.data_value, self.ex)))
    }
}
