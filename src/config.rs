use std::{fmt, str::FromStr};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::sensors::SensorType;

/// Publish-interval choices offered to operators, in seconds. Not enforced:
/// any positive interval is accepted.
pub const PUBLISH_INTERVAL_PRESETS: [f64; 8] = [0.5, 1.0, 2.0, 3.0, 5.0, 10.0, 30.0, 60.0];

const DEFAULT_SENSORS: &str =
    "21:current:Current sensor,25:temperature:Temperature sensor,26:humidity:Humidity sensor";

// ---------------------------------------------------------------------------
// TopicPreset
// ---------------------------------------------------------------------------

/// Named topic prefixes, one per deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TopicPreset {
    Production,
    Development,
    Test,
}

impl TopicPreset {
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Production => "HS",
            Self::Development => "AHS",
            Self::Test => "THS",
        }
    }

    /// Resolves either a preset name or a literal prefix to the prefix string.
    pub fn resolve(raw: &str) -> String {
        match raw.parse::<TopicPreset>() {
            Ok(preset) => preset.prefix().to_owned(),
            Err(_) => raw.to_owned(),
        }
    }
}

impl fmt::Display for TopicPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Production => "production",
            Self::Development => "development",
            Self::Test => "test",
        };
        write!(f, "{name} ({})", self.prefix())
    }
}

impl FromStr for TopicPreset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "production" => Ok(Self::Production),
            "development" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            other => Err(anyhow::anyhow!("unknown topic preset: {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// MqttConfig
// ---------------------------------------------------------------------------

/// Broker connection and topic settings. Mutable at runtime; broker fields
/// take effect on the next connect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct MqttConfig {
    pub broker_address: String,
    pub port: u16,
    /// Base client id. A unix-seconds suffix is appended per connection.
    pub client_id: String,
    pub topic_prefix: String,
    /// Seconds between publish-all passes.
    pub publish_interval: f64,
    pub keep_alive_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_address: "127.0.0.1".to_owned(),
            port: 1883,
            client_id: "sensor_publisher".to_owned(),
            topic_prefix: TopicPreset::Production.prefix().to_owned(),
            publish_interval: 2.0,
            keep_alive_secs: 60,
            username: None,
            password: None,
        }
    }
}

impl MqttConfig {
    /// `"{topic_prefix}/{sensor_id}/data"`
    pub fn topic(&self, sensor_id: i64) -> String {
        format!("{}/{}/data", self.topic_prefix, sensor_id)
    }

    /// Topic template shown to operators, e.g. `HS/{sensor_id}/data`.
    pub fn topic_format(&self) -> String {
        format!("{}/{{sensor_id}}/data", self.topic_prefix)
    }
}

/// A publish interval must be a finite number of seconds greater than zero.
pub fn is_valid_interval(secs: f64) -> bool {
    secs.is_finite() && secs > 0.0
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// One entry of the initial sensor list.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSpec {
    pub sensor_id: i64,
    pub sensor_type: SensorType,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub mqtt: MqttConfig,
    /// Format: `"id:type:name,..."` (e.g. `"21:current:Line A"`).
    pub sensors: Vec<SensorSpec>,
    pub auto_connect: bool,
    pub auto_start: bool,
    /// Stop generation whenever the connection leaves `Connected`.
    pub stop_on_disconnect: bool,
    pub server_host: String,
    pub server_port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = MqttConfig::default();

        let publish_interval: f64 = optional("PUBLISH_INTERVAL_SECS", "2.0")
            .parse()
            .context("PUBLISH_INTERVAL_SECS must be a number")?;
        if !is_valid_interval(publish_interval) {
            anyhow::bail!("PUBLISH_INTERVAL_SECS must be positive, got {publish_interval}");
        }

        let mqtt = MqttConfig {
            broker_address: optional("MQTT_BROKER_HOST", &defaults.broker_address),
            port: optional("MQTT_BROKER_PORT", "1883")
                .parse()
                .context("MQTT_BROKER_PORT must be a valid port number")?,
            client_id: optional("MQTT_CLIENT_ID", &defaults.client_id),
            topic_prefix: TopicPreset::resolve(&optional("TOPIC_PREFIX", &defaults.topic_prefix)),
            publish_interval,
            keep_alive_secs: parse_keep_alive(&optional("MQTT_KEEP_ALIVE_SECS", "60"))?,
            username: std::env::var("MQTT_USERNAME").ok(),
            password: std::env::var("MQTT_PASSWORD").ok(),
        };

        Ok(Self {
            mqtt,
            sensors: parse_sensors(&optional("SENSORS", DEFAULT_SENSORS))?,
            auto_connect: parse_flag("AUTO_CONNECT")?,
            auto_start: parse_flag("AUTO_START")?,
            stop_on_disconnect: parse_flag("STOP_ON_DISCONNECT")?,
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
        })
    }
}

/// Parse `"id:type:name,..."` into sensor specs, keeping the given order.
///
/// The name may itself contain colons; only the first two separate fields.
fn parse_sensors(raw: &str) -> Result<Vec<SensorSpec>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let mut parts = entry.splitn(3, ':');
            let (Some(id), Some(kind), Some(name)) = (parts.next(), parts.next(), parts.next())
            else {
                anyhow::bail!("SENSORS entry must be 'sensor_id:sensor_type:name', got: {entry:?}");
            };
            let sensor_id = id
                .trim()
                .parse::<i64>()
                .with_context(|| format!("invalid sensor id in SENSORS entry {entry:?}"))?;
            let sensor_type = kind
                .trim()
                .parse::<SensorType>()
                .with_context(|| format!("unknown sensor type in SENSORS entry {entry:?}"))?;
            Ok(SensorSpec {
                sensor_id,
                sensor_type,
                name: name.trim().to_owned(),
            })
        })
        .collect()
}

fn parse_keep_alive(raw: &str) -> Result<u64> {
    let secs: u64 = raw
        .trim()
        .parse()
        .context("MQTT_KEEP_ALIVE_SECS must be a positive integer")?;
    if secs == 0 {
        anyhow::bail!("MQTT_KEEP_ALIVE_SECS must be positive, got 0");
    }
    Ok(secs)
}

fn parse_flag(key: &str) -> Result<bool> {
    match optional(key, "false").to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(anyhow::anyhow!("{key} must be a boolean, got {other:?}")),
    }
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}
