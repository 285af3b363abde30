pub mod registry;
pub mod synthesizer;

use std::{fmt, str::FromStr};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

pub use registry::SensorRegistry;
pub use synthesizer::ValueSynthesizer;

// ---------------------------------------------------------------------------
// SensorType
// ---------------------------------------------------------------------------

/// Fixed physical parameters of a sensor type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorParams {
    pub default_value: f64,
    /// Uniform noise is drawn from `[-variation_range, +variation_range]`.
    pub variation_range: f64,
    /// Chance per generation call that the type's trend is re-rolled.
    pub trend_probability: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub decimal_places: u32,
    pub unit: &'static str,
}

const CURRENT: SensorParams = SensorParams {
    default_value: 8.5,
    variation_range: 0.5,
    trend_probability: 0.10,
    min_value: 0.0,
    max_value: 999.0,
    decimal_places: 2,
    unit: "A",
};

const TEMPERATURE: SensorParams = SensorParams {
    default_value: 25.0,
    variation_range: 2.0,
    trend_probability: 0.05,
    min_value: -50.0,
    max_value: 300.0,
    decimal_places: 1,
    unit: "°C",
};

const HUMIDITY: SensorParams = SensorParams {
    default_value: 55.0,
    variation_range: 3.0,
    trend_probability: 0.08,
    min_value: 0.0,
    max_value: 100.0,
    decimal_places: 1,
    unit: "%",
};

/// Kind of virtual sensor. The wire code is `1`, `2`, `3` in declaration order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SensorType {
    Current,
    Temperature,
    Humidity,
}

impl SensorType {
    pub const ALL: [SensorType; 3] = [Self::Current, Self::Temperature, Self::Humidity];

    pub const fn params(self) -> &'static SensorParams {
        match self {
            Self::Current => &CURRENT,
            Self::Temperature => &TEMPERATURE,
            Self::Humidity => &HUMIDITY,
        }
    }

    /// Numeric code used in the `sensor_type` field of a reading.
    pub const fn code(self) -> u8 {
        match self {
            Self::Current => 1,
            Self::Temperature => 2,
            Self::Humidity => 3,
        }
    }

    pub const fn unit(self) -> &'static str {
        self.params().unit
    }

    pub const fn default_value(self) -> f64 {
        self.params().default_value
    }

    /// Human-readable label used in log messages.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Current => "Current sensor",
            Self::Temperature => "Temperature sensor",
            Self::Humidity => "Humidity sensor",
        }
    }

    /// Format `value` with this type's decimal places, without the unit.
    pub fn format_value(self, value: f64) -> String {
        format!("{:.*}", self.params().decimal_places as usize, value)
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Current => "current",
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
        };
        f.write_str(s)
    }
}

impl FromStr for SensorType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "current" => Ok(Self::Current),
            "temperature" => Ok(Self::Temperature),
            "humidity" => Ok(Self::Humidity),
            other => Err(anyhow::anyhow!("unknown sensor type: {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Sensor
// ---------------------------------------------------------------------------

/// A configured virtual sensor. `id` is the stable identity; `sensor_id`
/// is the user-assigned number that appears in topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: Uuid,
    pub sensor_id: i64,
    pub name: String,
    pub sensor_type: SensorType,
    pub is_enabled: bool,
}

impl Sensor {
    pub fn new(sensor_id: i64, name: impl Into<String>, sensor_type: SensorType) -> Self {
        Self {
            id: Uuid::new_v4(),
            sensor_id,
            name: name.into(),
            sensor_type,
            is_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_table() {
        let c = SensorType::Current.params();
        assert_eq!((c.default_value, c.variation_range, c.trend_probability), (8.5, 0.5, 0.10));
        assert_eq!((c.min_value, c.max_value, c.decimal_places), (0.0, 999.0, 2));

        let t = SensorType::Temperature.params();
        assert_eq!((t.default_value, t.variation_range, t.trend_probability), (25.0, 2.0, 0.05));
        assert_eq!((t.min_value, t.max_value, t.decimal_places), (-50.0, 300.0, 1));

        let h = SensorType::Humidity.params();
        assert_eq!((h.default_value, h.variation_range, h.trend_probability), (55.0, 3.0, 0.08));
        assert_eq!((h.min_value, h.max_value, h.decimal_places), (0.0, 100.0, 1));
    }

    #[test]
    fn units_and_codes() {
        assert_eq!(SensorType::Current.unit(), "A");
        assert_eq!(SensorType::Temperature.unit(), "°C");
        assert_eq!(SensorType::Humidity.unit(), "%");
        let codes: Vec<u8> = SensorType::ALL.into_iter().map(SensorType::code).collect();
        assert_eq!(codes, vec![1, 2, 3]);
    }

    #[test]
    fn format_value_uses_decimal_places() {
        assert_eq!(SensorType::Current.format_value(8.5), "8.50");
        assert_eq!(SensorType::Temperature.format_value(25.0), "25.0");
    }

    #[test]
    fn from_str_matches_display() {
        for t in SensorType::ALL {
            assert_eq!(t.to_string().parse::<SensorType>().unwrap(), t);
        }
        assert!("pressure".parse::<SensorType>().is_err());
    }

    #[test]
    fn new_sensor_is_enabled_with_fresh_identity() {
        let a = Sensor::new(21, "A", SensorType::Current);
        let b = Sensor::new(21, "A", SensorType::Current);
        assert!(a.is_enabled);
        assert_ne!(a.id, b.id);
    }
}
