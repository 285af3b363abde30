use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Sensor, SensorType};
use crate::{
    error::{PublisherError, Result},
    event_log::{EventLog, LogKind},
};

#[derive(Debug)]
struct Inner {
    /// Insertion order is display and publish order.
    sensors: Vec<Sensor>,
    base_values: BTreeMap<SensorType, f64>,
}

/// Configured sensors plus the per-type base values the synthesizer walks
/// around.
///
/// Cheap to clone; clones share state. Mutations are recorded in the event log.
#[derive(Clone)]
pub struct SensorRegistry {
    inner: Arc<RwLock<Inner>>,
    log: EventLog,
}

impl SensorRegistry {
    pub fn new(log: EventLog) -> Self {
        let base_values = SensorType::ALL
            .into_iter()
            .map(|t| (t, t.default_value()))
            .collect();
        Self {
            inner: Arc::new(RwLock::new(Inner {
                sensors: Vec::new(),
                base_values,
            })),
            log,
        }
    }

    /// Append a new enabled sensor. Rejects a duplicate `(sensor_id, sensor_type)`.
    pub async fn add_sensor(
        &self,
        sensor_id: i64,
        name: impl Into<String>,
        sensor_type: SensorType,
    ) -> Result<Sensor> {
        let sensor = {
            let mut inner = self.inner.write().await;
            if inner
                .sensors
                .iter()
                .any(|s| s.sensor_id == sensor_id && s.sensor_type == sensor_type)
            {
                None
            } else {
                let sensor = Sensor::new(sensor_id, name, sensor_type);
                inner.sensors.push(sensor.clone());
                Some(sensor)
            }
        };

        match sensor {
            Some(sensor) => {
                self.log
                    .record(
                        LogKind::Success,
                        format!(
                            "{} added: ID {}, name '{}'",
                            sensor_type.label(),
                            sensor_id,
                            sensor.name
                        ),
                    )
                    .await;
                Ok(sensor)
            }
            None => {
                self.log
                    .record(
                        LogKind::Error,
                        format!("{} ID {sensor_id} already exists.", sensor_type.label()),
                    )
                    .await;
                Err(PublisherError::DuplicateSensor {
                    sensor_id,
                    sensor_type,
                })
            }
        }
    }

    /// Remove by identity. Absent ids are ignored.
    pub async fn remove_sensor(&self, id: Uuid) -> Option<Sensor> {
        let removed = {
            let mut inner = self.inner.write().await;
            let index = inner.sensors.iter().position(|s| s.id == id)?;
            inner.sensors.remove(index)
        };

        self.log
            .record(
                LogKind::Info,
                format!(
                    "{} removed: ID {}",
                    removed.sensor_type.label(),
                    removed.sensor_id
                ),
            )
            .await;
        Some(removed)
    }

    /// Flip `is_enabled`, returning the updated sensor. Absent ids are ignored.
    pub async fn toggle_sensor(&self, id: Uuid) -> Option<Sensor> {
        let mut inner = self.inner.write().await;
        let sensor = inner.sensors.iter_mut().find(|s| s.id == id)?;
        sensor.is_enabled = !sensor.is_enabled;
        Some(sensor.clone())
    }

    pub async fn get(&self, id: Uuid) -> Option<Sensor> {
        self.inner
            .read()
            .await
            .sensors
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    pub async fn sensors(&self) -> Vec<Sensor> {
        self.inner.read().await.sensors.clone()
    }

    pub async fn sensors_of_type(&self, sensor_type: SensorType) -> Vec<Sensor> {
        self.inner
            .read()
            .await
            .sensors
            .iter()
            .filter(|s| s.sensor_type == sensor_type)
            .cloned()
            .collect()
    }

    pub async fn enabled_sensors(&self) -> Vec<Sensor> {
        self.inner
            .read()
            .await
            .sensors
            .iter()
            .filter(|s| s.is_enabled)
            .cloned()
            .collect()
    }

    pub async fn base_values(&self) -> BTreeMap<SensorType, f64> {
        self.inner.read().await.base_values.clone()
    }

    /// Overwrite the base value. Not bounds-checked: only synthesized values
    /// are clamped.
    pub async fn update_base_value(&self, sensor_type: SensorType, value: f64) {
        self.inner
            .write()
            .await
            .base_values
            .insert(sensor_type, value);

        self.log
            .record(
                LogKind::Info,
                format!(
                    "{} base value updated: {}{}",
                    sensor_type.label(),
                    sensor_type.format_value(value),
                    sensor_type.unit()
                ),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (SensorRegistry, EventLog) {
        let log = EventLog::new();
        (SensorRegistry::new(log.clone()), log)
    }

    #[tokio::test]
    async fn duplicate_id_and_type_is_rejected() {
        let (reg, log) = registry();
        reg.add_sensor(21, "A", SensorType::Current).await.unwrap();

        let err = reg.add_sensor(21, "B", SensorType::Current).await.unwrap_err();
        assert!(matches!(
            err,
            PublisherError::DuplicateSensor { sensor_id: 21, sensor_type: SensorType::Current }
        ));
        assert_eq!(reg.sensors().await.len(), 1);
        assert_eq!(log.count(LogKind::Error).await, 1);
    }

    #[tokio::test]
    async fn same_id_different_type_is_allowed() {
        let (reg, log) = registry();
        reg.add_sensor(21, "A", SensorType::Current).await.unwrap();
        reg.add_sensor(21, "B", SensorType::Temperature).await.unwrap();
        assert_eq!(reg.sensors().await.len(), 2);
        assert_eq!(log.count(LogKind::Success).await, 2);
    }

    #[tokio::test]
    async fn insertion_order_is_preserved() {
        let (reg, _) = registry();
        reg.add_sensor(3, "c", SensorType::Humidity).await.unwrap();
        reg.add_sensor(1, "a", SensorType::Current).await.unwrap();
        reg.add_sensor(2, "b", SensorType::Humidity).await.unwrap();

        let ids: Vec<i64> = reg.sensors().await.iter().map(|s| s.sensor_id).collect();
        assert_eq!(ids, vec![3, 1, 2]);

        let humidity: Vec<i64> = reg
            .sensors_of_type(SensorType::Humidity)
            .await
            .iter()
            .map(|s| s.sensor_id)
            .collect();
        assert_eq!(humidity, vec![3, 2]);
    }

    #[tokio::test]
    async fn toggle_controls_enabled_sensors() {
        let (reg, _) = registry();
        let a = reg.add_sensor(1, "a", SensorType::Current).await.unwrap();
        let b = reg.add_sensor(2, "b", SensorType::Current).await.unwrap();

        let toggled = reg.toggle_sensor(a.id).await.unwrap();
        assert!(!toggled.is_enabled);

        let enabled = reg.enabled_sensors().await;
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].id, b.id);

        assert!(reg.toggle_sensor(a.id).await.unwrap().is_enabled);
        assert_eq!(reg.enabled_sensors().await.len(), 2);
    }

    #[tokio::test]
    async fn unknown_ids_are_noops() {
        let (reg, log) = registry();
        reg.add_sensor(1, "a", SensorType::Current).await.unwrap();
        let before = log.entries().await.len();

        assert!(reg.remove_sensor(Uuid::new_v4()).await.is_none());
        assert!(reg.toggle_sensor(Uuid::new_v4()).await.is_none());
        assert_eq!(reg.sensors().await.len(), 1);
        assert_eq!(log.entries().await.len(), before);
    }

    #[tokio::test]
    async fn remove_by_identity() {
        let (reg, log) = registry();
        let a = reg.add_sensor(1, "a", SensorType::Current).await.unwrap();
        reg.add_sensor(1, "a", SensorType::Humidity).await.unwrap();

        let removed = reg.remove_sensor(a.id).await.unwrap();
        assert_eq!(removed.sensor_type, SensorType::Current);
        assert!(reg.get(a.id).await.is_none());
        assert_eq!(reg.sensors().await.len(), 1);
        assert_eq!(log.entries().await[0].kind, LogKind::Info);
    }

    #[tokio::test]
    async fn base_values_start_at_defaults() {
        let (reg, _) = registry();
        let base_values = reg.base_values().await;
        for t in SensorType::ALL {
            assert_eq!(base_values[&t], t.default_value());
        }
    }

    #[tokio::test]
    async fn base_value_update_is_unchecked() {
        let (reg, log) = registry();
        reg.update_base_value(SensorType::Humidity, 150.0).await;
        let base_values = reg.base_values().await;
        assert_eq!(base_values[&SensorType::Humidity], 150.0);
        assert_eq!(base_values[&SensorType::Current], 8.5);

        let entry = &log.entries().await[0];
        assert_eq!(entry.kind, LogKind::Info);
        assert!(entry.message.contains("150.0%"));
    }

    #[tokio::test]
    async fn clones_share_state() {
        let (reg, _) = registry();
        let clone = reg.clone();
        reg.add_sensor(5, "x", SensorType::Temperature).await.unwrap();
        assert_eq!(clone.sensors().await.len(), 1);
    }
}
