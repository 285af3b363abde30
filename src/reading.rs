use chrono::{DateTime, SecondsFormat, Utc};
use serde::{ser::Error as _, Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    config::MqttConfig,
    error::Result,
    sensors::{Sensor, SensorType},
};

pub const STATUS_NORMAL: &str = "normal";

/// One synthesized record, ready to publish.
///
/// Fields are declared in key order so the JSON payload comes out with sorted
/// keys. Exactly one of `current`, `temperature`, `humidity` is set, matching
/// `sensor_type`; the others are omitted from the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Reading {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    pub is_connected: bool,
    pub sensor_id: i64,
    pub sensor_name: String,
    /// 1 = current, 2 = temperature, 3 = humidity
    pub sensor_type: u8,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// ISO-8601 UTC instant, second precision
    pub timestamp: String,
    pub unit: String,
    pub value: f64,
}

impl Reading {
    pub fn new(sensor: &Sensor, value: f64, at: DateTime<Utc>) -> Self {
        let (mut current, mut temperature, mut humidity) = (None, None, None);
        match sensor.sensor_type {
            SensorType::Current => current = Some(value),
            SensorType::Temperature => temperature = Some(value),
            SensorType::Humidity => humidity = Some(value),
        }

        Self {
            current,
            humidity,
            is_connected: true,
            sensor_id: sensor.sensor_id,
            sensor_name: sensor.name.clone(),
            sensor_type: sensor.sensor_type.code(),
            status: STATUS_NORMAL.to_owned(),
            temperature,
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
            unit: sensor.sensor_type.unit().to_owned(),
            value,
        }
    }

    /// JSON body sent to the broker.
    ///
    /// A non-finite value is an error: JSON has no NaN and serde_json would
    /// silently write `null`.
    pub fn to_payload(&self) -> Result<String> {
        if !self.value.is_finite() {
            return Err(serde_json::Error::custom(format!("non-finite value {}", self.value)).into());
        }
        Ok(serde_json::to_string(self)?)
    }
}

/// Topic and reading for `sensor` carrying `value`, stamped `at`.
pub fn build(config: &MqttConfig, sensor: &Sensor, value: f64, at: DateTime<Utc>) -> (String, Reading) {
    (config.topic(sensor.sensor_id), Reading::new(sensor, value, at))
}
