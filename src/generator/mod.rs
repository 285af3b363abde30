use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use tokio::{
    sync::{broadcast::error::RecvError, Mutex, RwLock},
    task::JoinHandle,
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    config::{is_valid_interval, MqttConfig, TopicPreset},
    error::{PublisherError, Result},
    event_log::{EventLog, LogKind},
    mqtt::{ConnectionState, PublishClient, Qos},
    reading,
    sensors::{Sensor, SensorRegistry, SensorType, ValueSynthesizer},
};

/// Drives periodic and on-demand publication of synthesized readings.
///
/// Publishing is gated on the client being `Connected`. At most one periodic
/// loop exists at a time; `send_once` runs alongside it without touching it.
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Generator {
    inner: Arc<Inner>,
}

struct Inner {
    registry: SensorRegistry,
    client: Arc<dyn PublishClient>,
    log: EventLog,
    synthesizer: Mutex<ValueSynthesizer>,
    config: RwLock<MqttConfig>,
    task: Mutex<Option<GenerationTask>>,
    passes: AtomicU64,
}

struct GenerationTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Generator {
    pub fn new(
        registry: SensorRegistry,
        client: Arc<dyn PublishClient>,
        log: EventLog,
        config: MqttConfig,
    ) -> Self {
        Self::with_synthesizer(registry, client, log, config, ValueSynthesizer::new())
    }

    pub fn with_synthesizer(
        registry: SensorRegistry,
        client: Arc<dyn PublishClient>,
        log: EventLog,
        config: MqttConfig,
        synthesizer: ValueSynthesizer,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                client,
                log,
                synthesizer: Mutex::new(synthesizer),
                config: RwLock::new(config),
                task: Mutex::new(None),
                passes: AtomicU64::new(0),
            }),
        }
    }

    pub fn registry(&self) -> &SensorRegistry {
        &self.inner.registry
    }

    pub fn log(&self) -> &EventLog {
        &self.inner.log
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.client.state()
    }

    pub fn published_count(&self) -> u64 {
        self.inner.client.published_count()
    }

    /// Publish-all passes run so far, periodic and one-shot.
    pub fn pass_count(&self) -> u64 {
        self.inner.passes.load(Ordering::Relaxed)
    }

    pub async fn config(&self) -> MqttConfig {
        self.inner.config.read().await.clone()
    }

    pub async fn is_generating(&self) -> bool {
        self.inner
            .task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    // -----------------------------------------------------------------------
    // Connection
    // -----------------------------------------------------------------------

    pub async fn connect(&self) {
        let config = self.config().await;
        self.inner.client.connect(&config).await;
    }

    /// Stops generation first, then disconnects.
    pub async fn disconnect(&self) {
        self.stop().await;
        self.inner.client.disconnect().await;
    }

    // -----------------------------------------------------------------------
    // Generation
    // -----------------------------------------------------------------------

    /// Launch the periodic loop.
    ///
    /// Returns `Ok(false)` if a loop is already running, and
    /// `Err(NotConnected)` (after recording a warning) if the broker is not
    /// connected.
    pub async fn start(&self) -> Result<bool> {
        self.ensure_connected().await?;

        let mut task = self.inner.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            debug!("Generation already running; start ignored");
            return Ok(false);
        }

        self.inner
            .log
            .record(LogKind::Success, "Data generation started.")
            .await;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.clone().run(cancel.clone()));
        *task = Some(GenerationTask { cancel, handle });
        Ok(true)
    }

    /// Cancel the periodic loop. In-flight publishes are left to finish.
    /// Returns `false` if nothing was running.
    pub async fn stop(&self) -> bool {
        let Some(task) = self.inner.task.lock().await.take() else {
            return false;
        };
        task.cancel.cancel();

        self.inner
            .log
            .record(LogKind::Info, "Data generation stopped.")
            .await;
        true
    }

    /// One publish-all pass, independent of the periodic loop.
    pub async fn send_once(&self) -> Result<usize> {
        self.ensure_connected().await?;
        Ok(self.publish_all().await)
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.inner.client.state().is_connected() {
            return Ok(());
        }
        self.inner
            .log
            .record(LogKind::Warning, "Connect to the MQTT broker first.")
            .await;
        Err(PublisherError::NotConnected)
    }

    async fn run(self, cancel: CancellationToken) {
        info!("Generation loop started");

        while !cancel.is_cancelled() {
            self.publish_all().await;

            let interval = self.publish_interval().await;
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = time::sleep(interval) => {}
            }
        }

        info!("Generation loop stopped");
    }

    async fn publish_interval(&self) -> Duration {
        let secs = self.inner.config.read().await.publish_interval;
        Duration::from_secs_f64(secs)
    }

    /// Publish one reading per enabled sensor, in registry order, without
    /// waiting for broker acknowledgement. A reading that fails to encode is
    /// logged and skipped. Returns the number of readings handed off.
    pub async fn publish_all(&self) -> usize {
        self.inner.passes.fetch_add(1, Ordering::Relaxed);

        let sensors = self.inner.registry.enabled_sensors().await;
        let base_values = self.inner.registry.base_values().await;
        let config = self.config().await;

        let mut sent = 0;
        for sensor in sensors {
            let kind = sensor.sensor_type;
            let base = base_values
                .get(&kind)
                .copied()
                .unwrap_or_else(|| kind.default_value());
            let value = self.inner.synthesizer.lock().await.next(kind, base);

            if self.publish_reading(&config, &sensor, value).await {
                sent += 1;
            }
        }

        sent
    }

    async fn publish_reading(&self, config: &MqttConfig, sensor: &Sensor, value: f64) -> bool {
        let (topic, reading) = reading::build(config, sensor, value, Utc::now());
        let payload = match reading.to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                self.inner
                    .log
                    .record(
                        LogKind::Error,
                        format!("Failed to encode reading for sensor {}: {e}", sensor.sensor_id),
                    )
                    .await;
                return false;
            }
        };

        self.inner.client.publish(&topic, payload, Qos::AtLeastOnce).await;
        let kind = sensor.sensor_type;
        self.inner
            .log
            .record(
                LogKind::Send,
                format!(
                    "Sent: {topic} -> {} ({}{})",
                    sensor.name,
                    kind.format_value(value),
                    kind.unit()
                ),
            )
            .await;
        true
    }

    // -----------------------------------------------------------------------
    // Runtime configuration
    // -----------------------------------------------------------------------

    pub async fn set_topic_prefix(&self, prefix: impl Into<String>) {
        let prefix = prefix.into();
        self.inner.config.write().await.topic_prefix = prefix.clone();
        self.inner
            .log
            .record(LogKind::Info, format!("Topic prefix changed: {prefix}"))
            .await;
    }

    pub async fn apply_topic_preset(&self, preset: TopicPreset) {
        self.inner.config.write().await.topic_prefix = preset.prefix().to_owned();
        self.inner
            .log
            .record(LogKind::Info, format!("Topic prefix changed: {preset}"))
            .await;
    }

    /// Takes effect from the next sleep of a running loop.
    pub async fn set_publish_interval(&self, secs: f64) -> Result<()> {
        if !is_valid_interval(secs) {
            return Err(PublisherError::InvalidInterval(secs));
        }
        self.inner.config.write().await.publish_interval = secs;
        self.inner
            .log
            .record(LogKind::Info, format!("Publish interval set to {secs}s"))
            .await;
        Ok(())
    }

    /// Zero every type's trend. Base values are kept.
    pub async fn reset_trends(&self) {
        self.inner.synthesizer.lock().await.reset();
        self.inner
            .log
            .record(LogKind::Info, "Value trends reset.")
            .await;
    }

    pub async fn base_values(&self) -> BTreeMap<SensorType, f64> {
        self.inner.registry.base_values().await
    }

    // -----------------------------------------------------------------------
    // Connection watch
    // -----------------------------------------------------------------------

    /// Resolves to `true` once the client reports `Connected`, or `false` if
    /// the client goes away first.
    pub async fn wait_until_connected(&self) -> bool {
        let mut states = self.inner.client.subscribe_state();
        if self.connection_state().is_connected() {
            return true;
        }
        loop {
            match states.recv().await {
                Ok(state) if state.is_connected() => return true,
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {
                    if self.connection_state().is_connected() {
                        return true;
                    }
                }
                Err(RecvError::Closed) => return false,
            }
        }
    }

    /// Stop generation whenever the connection leaves `Connected`.
    ///
    /// Opt-in: by default a running loop keeps going (and its publishes are
    /// rejected by the client) until someone calls `stop`.
    pub fn spawn_disconnect_guard(&self) -> JoinHandle<()> {
        let generator = self.clone();
        let mut states = self.inner.client.subscribe_state();

        tokio::spawn(async move {
            loop {
                let state = match states.recv().await {
                    Ok(state) => state,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Disconnect guard lagged; using current state");
                        generator.connection_state()
                    }
                    Err(RecvError::Closed) => break,
                };
                if state.is_connected() || !generator.is_generating().await {
                    continue;
                }
                generator
                    .inner
                    .log
                    .record(
                        LogKind::Warning,
                        format!("Connection {state}; stopping data generation."),
                    )
                    .await;
                generator.stop().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::mqtt::testing::RecordingClient;

    struct Fixture {
        generator: Generator,
        client: Arc<RecordingClient>,
        log: EventLog,
    }

    fn fixture(connected: bool, interval: f64) -> Fixture {
        let log = EventLog::new();
        let client = Arc::new(if connected {
            RecordingClient::connected(log.clone())
        } else {
            RecordingClient::new(log.clone())
        });
        let registry = SensorRegistry::new(log.clone());
        let config = MqttConfig {
            publish_interval: interval,
            ..MqttConfig::default()
        };
        let generator = Generator::with_synthesizer(
            registry,
            client.clone(),
            log.clone(),
            config,
            ValueSynthesizer::seeded(1),
        );
        Fixture {
            generator,
            client,
            log,
        }
    }

    #[tokio::test]
    async fn start_while_disconnected_is_gated() {
        let f = fixture(false, 1.0);
        f.generator
            .registry()
            .add_sensor(21, "A", SensorType::Current)
            .await
            .unwrap();
        let warnings_before = f.log.count(LogKind::Warning).await;

        let err = f.generator.start().await.unwrap_err();
        assert!(matches!(err, PublisherError::NotConnected));
        assert!(!f.generator.is_generating().await);
        assert_eq!(f.log.count(LogKind::Warning).await, warnings_before + 1);
        assert!(f.client.published().is_empty());
        assert_eq!(f.generator.pass_count(), 0);
    }

    #[tokio::test]
    async fn send_once_while_disconnected_is_gated() {
        let f = fixture(false, 1.0);
        assert!(f.generator.send_once().await.is_err());
        assert_eq!(f.log.count(LogKind::Warning).await, 1);
        assert!(f.client.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_single_current_sensor() {
        let f = fixture(true, 1.0);
        f.generator
            .registry()
            .add_sensor(21, "Line A", SensorType::Current)
            .await
            .unwrap();

        assert!(f.generator.start().await.unwrap());
        time::sleep(Duration::from_millis(3300)).await;
        assert!(f.generator.stop().await);

        assert_eq!(f.generator.pass_count(), 4);
        let published = f.client.published();
        assert_eq!(published.len(), 4);
        for (topic, payload) in &published {
            assert_eq!(topic, "HS/21/data");
            let v: Value = serde_json::from_str(payload).unwrap();
            assert_eq!(v["sensor_type"], 1);
            assert!(v.get("temperature").is_none());
            assert!(v.get("humidity").is_none());
            let value = v["value"].as_f64().unwrap();
            assert_eq!(v["current"].as_f64().unwrap(), value);
            assert!((0.0..=999.0).contains(&value));
            assert!((7.9..=9.1).contains(&value), "{value}");
        }
        assert_eq!(f.log.count(LogKind::Send).await, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_does_not_spawn_another_loop() {
        let f = fixture(true, 1.0);
        f.generator
            .registry()
            .add_sensor(21, "A", SensorType::Current)
            .await
            .unwrap();

        assert!(f.generator.start().await.unwrap());
        assert!(!f.generator.start().await.unwrap());
        time::sleep(Duration::from_millis(3300)).await;
        f.generator.stop().await;

        // floor(3.3 / 1.0) + 1
        assert_eq!(f.generator.pass_count(), 4);
        assert_eq!(f.log.count(LogKind::Success).await, 2); // sensor added + started
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_further_cycles() {
        let f = fixture(true, 1.0);
        f.generator
            .registry()
            .add_sensor(21, "A", SensorType::Current)
            .await
            .unwrap();

        f.generator.start().await.unwrap();
        time::sleep(Duration::from_millis(1500)).await;
        assert!(f.generator.stop().await);
        let passes = f.generator.pass_count();

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(f.generator.pass_count(), passes);
        assert!(!f.generator.is_generating().await);
        assert!(!f.generator.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop_runs_a_new_loop() {
        let f = fixture(true, 2.0);
        f.generator
            .registry()
            .add_sensor(21, "A", SensorType::Current)
            .await
            .unwrap();

        f.generator.start().await.unwrap();
        time::sleep(Duration::from_millis(100)).await;
        f.generator.stop().await;
        assert!(f.generator.start().await.unwrap());
        time::sleep(Duration::from_millis(100)).await;
        f.generator.stop().await;

        assert_eq!(f.generator.pass_count(), 2);
    }

    #[tokio::test]
    async fn send_once_publishes_enabled_sensors_in_order() {
        let f = fixture(true, 1.0);
        let reg = f.generator.registry();
        reg.add_sensor(21, "I", SensorType::Current).await.unwrap();
        let t = reg.add_sensor(25, "T", SensorType::Temperature).await.unwrap();
        reg.add_sensor(26, "H", SensorType::Humidity).await.unwrap();
        reg.toggle_sensor(t.id).await.unwrap();

        assert_eq!(f.generator.send_once().await.unwrap(), 2);
        assert!(!f.generator.is_generating().await);

        let topics: Vec<String> = f.client.published().into_iter().map(|(t, _)| t).collect();
        assert_eq!(topics, vec!["HS/21/data", "HS/26/data"]);
    }

    #[tokio::test]
    async fn base_value_updates_shift_readings() {
        let f = fixture(true, 1.0);
        f.generator
            .registry()
            .add_sensor(25, "T", SensorType::Temperature)
            .await
            .unwrap();
        f.generator
            .registry()
            .update_base_value(SensorType::Temperature, 200.0)
            .await;

        f.generator.send_once().await.unwrap();
        let (_, payload) = &f.client.published()[0];
        let v: Value = serde_json::from_str(payload).unwrap();
        let value = v["temperature"].as_f64().unwrap();
        assert!((197.9..=202.1).contains(&value), "{value}");
    }

    #[tokio::test]
    async fn topic_prefix_changes_apply_to_next_pass() {
        let f = fixture(true, 1.0);
        f.generator
            .registry()
            .add_sensor(26, "H", SensorType::Humidity)
            .await
            .unwrap();

        f.generator.apply_topic_preset(TopicPreset::Test).await;
        f.generator.send_once().await.unwrap();
        f.generator.set_topic_prefix("LAB").await;
        f.generator.send_once().await.unwrap();

        let topics: Vec<String> = f.client.published().into_iter().map(|(t, _)| t).collect();
        assert_eq!(topics, vec!["THS/26/data", "LAB/26/data"]);
    }

    #[tokio::test]
    async fn invalid_interval_is_rejected() {
        let f = fixture(true, 1.0);
        assert!(matches!(
            f.generator.set_publish_interval(0.0).await,
            Err(PublisherError::InvalidInterval(_))
        ));
        f.generator.set_publish_interval(0.5).await.unwrap();
        assert_eq!(f.generator.config().await.publish_interval, 0.5);
    }

    #[tokio::test]
    async fn disconnect_stops_generation_first() {
        let f = fixture(true, 1.0);
        f.generator.start().await.unwrap();
        f.generator.disconnect().await;

        assert!(!f.generator.is_generating().await);
        assert_eq!(f.generator.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_keeps_running_on_connection_loss_by_default() {
        let f = fixture(true, 1.0);
        f.generator
            .registry()
            .add_sensor(21, "A", SensorType::Current)
            .await
            .unwrap();

        f.generator.start().await.unwrap();
        time::sleep(Duration::from_millis(500)).await;
        f.client.set_state(ConnectionState::Error("broker gone".into()));
        time::sleep(Duration::from_millis(1000)).await;

        assert!(f.generator.is_generating().await);
        assert_eq!(f.client.published().len(), 1);
        // The second pass was rejected by the client.
        assert_eq!(f.log.count(LogKind::Warning).await, 1);
        f.generator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_guard_stops_generation() {
        let f = fixture(true, 1.0);
        let guard = f.generator.spawn_disconnect_guard();

        f.generator.start().await.unwrap();
        time::sleep(Duration::from_millis(500)).await;
        f.client.set_state(ConnectionState::Error("broker gone".into()));
        time::sleep(Duration::from_millis(100)).await;

        assert!(!f.generator.is_generating().await);
        guard.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn send_once_alongside_running_loop_leaves_it_alone() {
        let f = fixture(true, 1.0);
        f.generator
            .registry()
            .add_sensor(21, "A", SensorType::Current)
            .await
            .unwrap();

        f.generator.start().await.unwrap();
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(f.generator.send_once().await.unwrap(), 1);
        assert!(f.generator.is_generating().await);

        time::sleep(Duration::from_millis(2800)).await;
        assert!(f.generator.stop().await);

        // Four periodic passes at 0, 1, 2, 3 s plus the one-shot.
        assert_eq!(f.generator.pass_count(), 5);
        assert_eq!(f.client.published().len(), 5);
    }

    #[tokio::test]
    async fn nan_base_value_publishes_a_finite_reading() {
        let f = fixture(true, 1.0);
        let reg = f.generator.registry();
        reg.add_sensor(26, "H", SensorType::Humidity).await.unwrap();
        reg.update_base_value(SensorType::Humidity, f64::NAN).await;

        assert_eq!(f.generator.send_once().await.unwrap(), 1);
        let (_, payload) = &f.client.published()[0];
        let v: Value = serde_json::from_str(payload).unwrap();
        let value = v["value"].as_f64().unwrap();
        assert!((0.0..=100.0).contains(&value), "{value}");
        assert_eq!(v["humidity"].as_f64().unwrap(), value);
        assert_eq!(f.log.count(LogKind::Error).await, 0);
    }

    #[tokio::test]
    async fn reading_that_fails_to_encode_is_skipped() {
        let f = fixture(true, 1.0);
        let config = f.generator.config().await;
        let broken = Sensor::new(21, "Broken", SensorType::Current);
        let healthy = Sensor::new(25, "Healthy", SensorType::Temperature);

        assert!(!f.generator.publish_reading(&config, &broken, f64::NAN).await);
        assert!(f.generator.publish_reading(&config, &healthy, 24.5).await);

        let topics: Vec<String> = f.client.published().into_iter().map(|(t, _)| t).collect();
        assert_eq!(topics, vec!["HS/25/data"]);
        assert_eq!(f.log.count(LogKind::Error).await, 1);
        assert_eq!(f.log.count(LogKind::Send).await, 1);
    }

    #[tokio::test]
    async fn reset_trends_zeroes_every_type() {
        let f = fixture(true, 1.0);
        {
            let mut synth = f.generator.inner.synthesizer.lock().await;
            for t in SensorType::ALL {
                synth.set_trend(t, 0.3);
            }
        }

        f.generator.reset_trends().await;

        let synth = f.generator.inner.synthesizer.lock().await;
        for t in SensorType::ALL {
            assert_eq!(synth.trend(t), 0.0);
        }
        drop(synth);
        assert_eq!(f.log.count(LogKind::Info).await, 1);
    }

    #[tokio::test]
    async fn state_stream_reports_every_transition() {
        let f = fixture(false, 1.0);
        let mut states = f.client.subscribe_state();

        f.generator.connect().await;
        f.generator.disconnect().await;

        let mut seen = Vec::new();
        while let Ok(state) = states.try_recv() {
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Disconnecting,
                ConnectionState::Disconnected,
            ]
        );
    }

    #[tokio::test]
    async fn wait_until_connected_resolves_on_connect() {
        let f = fixture(false, 1.0);
        let waiter = tokio::spawn({
            let generator = f.generator.clone();
            async move { generator.wait_until_connected().await }
        });
        tokio::task::yield_now().await;

        f.generator.connect().await;
        assert!(waiter.await.unwrap());
        assert!(fixture(true, 1.0).generator.wait_until_connected().await);
    }
}
