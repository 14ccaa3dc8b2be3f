use serde::Deserialize;

use super::error::{ParseResult, ProtocolError};
use crate::{DeviceCode, StatusValue};

/// One element of a `CONTROL_DEVICE_STATUS` or `SENSOR_DEVICE_STATUS` list.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeviceStatusEntry {
    device_code: String,
    status: StatusValue,
}

impl DeviceStatusEntry {
    pub(crate) fn into_status(self) -> ParseResult<(DeviceCode, StatusValue)> {
        if self.device_code.is_empty() {
            return Err(ProtocolError::MissingField("deviceCode"));
        }

        Ok((DeviceCode(self.device_code.into()), self.status))
    }
}
