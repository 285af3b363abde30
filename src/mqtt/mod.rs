pub mod client;
#[cfg(test)]
pub mod testing;

use std::fmt;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use crate::config::MqttConfig;

pub use client::MqttPublisher;

/// Broker connection lifecycle. Owned by the [`PublishClient`]; everyone
/// else observes it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Error(String),
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Disconnecting => f.write_str("disconnecting"),
            Self::Error(message) => write!(f, "error: {message}"),
        }
    }
}

/// Buffered transitions per subscriber before it starts lagging.
const STATE_CHANNEL_CAPACITY: usize = 32;

/// Current connection state plus a stream of every transition into it.
#[derive(Debug)]
pub struct StateChannel {
    current: watch::Sender<ConnectionState>,
    transitions: broadcast::Sender<ConnectionState>,
}

impl Default for StateChannel {
    fn default() -> Self {
        let (current, _) = watch::channel(ConnectionState::Disconnected);
        let (transitions, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self {
            current,
            transitions,
        }
    }
}

impl StateChannel {
    pub fn get(&self) -> ConnectionState {
        self.current.borrow().clone()
    }

    pub fn set(&self, state: ConnectionState) {
        self.current.send_replace(state.clone());
        // No subscribers is fine.
        let _ = self.transitions.send(state);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionState> {
        self.transitions.subscribe()
    }
}

/// Delivery guarantee requested for a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl From<Qos> for rumqttc::QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => rumqttc::QoS::AtMostOnce,
            Qos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            Qos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Capability interface to the broker transport.
///
/// Failures never surface as return values: they become state transitions
/// (`Error(reason)`) and event-log entries.
#[async_trait]
pub trait PublishClient: Send + Sync {
    /// Begin connecting. Progress is reported through [`subscribe_state`](Self::subscribe_state).
    async fn connect(&self, config: &MqttConfig);

    /// Begin disconnecting. Only meaningful while `Connected`.
    async fn disconnect(&self);

    /// Hand `payload` to the transport without waiting for acknowledgement.
    /// Rejected with a warning event when not connected.
    async fn publish(&self, topic: &str, payload: String, qos: Qos);

    fn state(&self) -> ConnectionState;

    /// Receiver of every state transition from now on, in order.
    fn subscribe_state(&self) -> broadcast::Receiver<ConnectionState>;

    /// Publish packets written to the broker since startup.
    fn published_count(&self) -> u64;
}
