use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::MqttConfig,
    mqtt::ConnectionState,
    sensors::{Sensor, SensorType},
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SensorDto {
    pub id: Uuid,
    /// User-assigned number used in the topic.
    pub sensor_id: i64,
    pub name: String,
    pub sensor_type: SensorType,
    pub is_enabled: bool,
    pub unit: String,
}

impl From<Sensor> for SensorDto {
    fn from(s: Sensor) -> Self {
        Self {
            id: s.id,
            sensor_id: s.sensor_id,
            name: s.name,
            sensor_type: s.sensor_type,
            is_enabled: s.is_enabled,
            unit: s.sensor_type.unit().to_owned(),
        }
    }
}

/// Query for `GET /sensors`.
#[derive(Debug, Default, Deserialize)]
pub struct SensorQuery {
    pub sensor_type: Option<SensorType>,
}

/// Request body for `POST /sensors`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AddSensorRequest {
    pub sensor_id: i64,
    pub name: String,
    pub sensor_type: SensorType,
}

/// Request body for `PUT /base-values/{sensor_type}`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct BaseValueRequest {
    pub value: f64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct BaseValueDto {
    pub sensor_type: SensorType,
    pub value: f64,
}

/// Request body for `PUT /config/topic-prefix`.
///
/// Accepts a literal prefix (`"HS"`) or a preset name (`"development"`).
#[derive(Debug, Deserialize, ToSchema)]
pub struct TopicPrefixRequest {
    pub topic_prefix: String,
}

/// Request body for `PUT /config/publish-interval`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PublishIntervalRequest {
    /// Seconds, must be positive.
    pub publish_interval: f64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConnectionStateDto {
    /// `disconnected`, `connecting`, `connected`, `disconnecting` or `error`.
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl From<ConnectionState> for ConnectionStateDto {
    fn from(state: ConnectionState) -> Self {
        let (state, message) = match state {
            ConnectionState::Disconnected => ("disconnected", None),
            ConnectionState::Connecting => ("connecting", None),
            ConnectionState::Connected => ("connected", None),
            ConnectionState::Disconnecting => ("disconnecting", None),
            ConnectionState::Error(message) => ("error", Some(message)),
        };
        Self {
            state: state.to_owned(),
            message,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GenerationDto {
    pub generating: bool,
    /// `false` when the request did not change anything.
    pub changed: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SendOnceDto {
    /// Readings handed to the broker client.
    pub published: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusDto {
    pub connection: ConnectionStateDto,
    pub generating: bool,
    /// Publish packets written to the broker.
    pub message_count: u64,
    /// Publish-all passes run.
    pub pass_count: u64,
    pub topic_format: String,
    pub config: MqttConfig,
    /// Suggested publish intervals in seconds; any positive value is accepted.
    pub publish_interval_presets: Vec<f64>,
    pub sensors: Vec<SensorDto>,
    pub base_values: BTreeMap<SensorType, f64>,
}
