//! Synthetic sensor-data publisher.
//!
//! Fabricates plausible current, temperature and humidity readings for a set
//! of virtual sensors and publishes them as JSON to `{prefix}/{sensor_id}/data`
//! on an MQTT broker.

pub mod api;
pub mod config;
pub mod error;
pub mod event_log;
pub mod generator;
pub mod mqtt;
pub mod reading;
pub mod sensors;

pub use error::{PublisherError, Result};
pub use generator::Generator;
