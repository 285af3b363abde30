use thiserror::Error;
use uuid::Uuid;

use crate::sensors::SensorType;

/// Result type for publisher operations
pub type Result<T> = std::result::Result<T, PublisherError>;

/// Errors surfaced by the registry, scheduler and transport.
///
/// None of these are fatal: callers degrade to a log event and carry on.
#[derive(Debug, Error)]
pub enum PublisherError {
    /// A sensor with the same `(sensor_id, sensor_type)` already exists
    #[error("sensor {sensor_id} of type {sensor_type} already exists")]
    DuplicateSensor {
        sensor_id: i64,
        sensor_type: SensorType,
    },

    /// No sensor with this identity is registered
    #[error("sensor not found: {0}")]
    SensorNotFound(Uuid),

    /// Operation requires a connected broker
    #[error("not connected to the MQTT broker")]
    NotConnected,

    /// Publish interval must be a finite, positive number of seconds
    #[error("invalid publish interval: {0}")]
    InvalidInterval(f64),

    /// Broker-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// A reading could not be encoded for the wire
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
