use std::sync::{
    atomic::{AtomicU64, Ordering},
    Mutex,
};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{ConnectionState, PublishClient, Qos, StateChannel};
use crate::{
    config::MqttConfig,
    event_log::{EventLog, LogKind},
};

/// In-memory [`PublishClient`] that connects instantly and records every
/// accepted publish. Connect and disconnect still pass through their
/// intermediate states.
pub struct RecordingClient {
    log: EventLog,
    state: StateChannel,
    published: Mutex<Vec<(String, String)>>,
    count: AtomicU64,
}

impl RecordingClient {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            state: StateChannel::default(),
            published: Mutex::new(Vec::new()),
            count: AtomicU64::new(0),
        }
    }

    pub fn connected(log: EventLog) -> Self {
        let client = Self::new(log);
        client.set_state(ConnectionState::Connected);
        client
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.set(state);
    }

    /// `(topic, payload)` pairs in publish order.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl PublishClient for RecordingClient {
    async fn connect(&self, _config: &MqttConfig) {
        self.set_state(ConnectionState::Connecting);
        self.set_state(ConnectionState::Connected);
    }

    async fn disconnect(&self) {
        if self.state().is_connected() {
            self.set_state(ConnectionState::Disconnecting);
            self.set_state(ConnectionState::Disconnected);
        }
    }

    async fn publish(&self, topic: &str, payload: String, _qos: Qos) {
        if !self.state().is_connected() {
            self.log
                .record(LogKind::Warning, "Publish attempted while not connected.")
                .await;
            return;
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_owned(), payload));
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn state(&self) -> ConnectionState {
        self.state.get()
    }

    fn subscribe_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn published_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}
