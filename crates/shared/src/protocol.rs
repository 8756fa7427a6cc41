use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::ProximityReading;

pub const PROXIMITY_ALERT_TYPE: &str = "proximity_alert";
pub const PHOTO_MIME_TYPE: &str = "image/jpeg";

pub fn iso_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proximity_distance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proximity_accuracy: Option<f64>,
    pub manual_trigger: bool,
}

impl SensorData {
    pub fn from_reading(reading: Option<&ProximityReading>) -> Self {
        match reading {
            Some(reading) => Self {
                proximity_distance: Some(reading.distance_mm),
                proximity_accuracy: Some(reading.accuracy),
                manual_trigger: false,
            },
            None => Self {
                proximity_distance: None,
                proximity_accuracy: None,
                manual_trigger: true,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub platform: String,
    pub app_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

impl DeviceInfo {
    pub fn current(device_name: Option<String>) -> Self {
        Self {
            platform: std::env::consts::OS.to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            device_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_data: Option<SensorData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_info: Option<DeviceInfo>,
}

impl AlertRequest {
    pub fn proximity(
        at: DateTime<Utc>,
        reading: Option<&ProximityReading>,
        device_info: Option<DeviceInfo>,
    ) -> Self {
        Self {
            kind: PROXIMITY_ALERT_TYPE.to_string(),
            timestamp: iso_timestamp(at),
            sensor_data: Some(SensorData::from_reading(reading)),
            device_info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResponse {
    pub status: String,
}

impl PingResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmStatusResponse {
    pub alarm_active: bool,
}

/// Whatever JSON the server answered with; the core only records it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerAck(pub Value);

impl ServerAck {
    pub fn empty() -> Self {
        Self(Value::Null)
    }
}
