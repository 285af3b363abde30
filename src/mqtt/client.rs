use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use super::{ConnectionState, PublishClient, Qos, StateChannel};
use crate::{
    config::MqttConfig,
    error::PublisherError,
    event_log::{EventLog, LogKind},
};

/// Capacity of the request channel between the client handle and its event loop.
const REQUEST_CAPACITY: usize = 100;

/// [`PublishClient`] backed by `rumqttc`.
///
/// One connection at a time; the event loop runs on its own task and is the
/// only writer of connection state once a connect has started. Every connect
/// opens a new session, and an event loop left over from an earlier session
/// never touches state or the client handle again. No automatic reconnect:
/// after an error the caller connects again.
#[derive(Clone)]
pub struct MqttPublisher {
    inner: Arc<Inner>,
}

struct Inner {
    log: EventLog,
    state: StateChannel,
    connection: Mutex<Connection>,
    published: AtomicU64,
}

#[derive(Default)]
struct Connection {
    session: u64,
    client: Option<AsyncClient>,
}

impl MqttPublisher {
    pub fn new(log: EventLog) -> Self {
        Self {
            inner: Arc::new(Inner {
                log,
                state: StateChannel::default(),
                connection: Mutex::new(Connection::default()),
                published: AtomicU64::new(0),
            }),
        }
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        debug!(state = %state, "MQTT connection state changed");
        self.state.set(state);
    }

    /// Install `client` as the live connection and return its session.
    async fn begin(&self, client: AsyncClient) -> u64 {
        let mut connection = self.connection.lock().await;
        connection.session += 1;
        connection.client = Some(client);
        self.set_state(ConnectionState::Connecting);
        connection.session
    }

    /// Apply `state` on behalf of `session`. Returns `false`, leaving the
    /// state untouched, once a newer connect has replaced that session.
    async fn settle(&self, session: u64, state: ConnectionState) -> bool {
        let connection = self.connection.lock().await;
        if connection.session != session {
            debug!(session, current = connection.session, "Ignoring state from a replaced connection");
            return false;
        }
        self.set_state(state);
        true
    }

    /// Drop the client handle if `session` still owns it.
    async fn release(&self, session: u64) {
        let mut connection = self.connection.lock().await;
        if connection.session == session {
            connection.client = None;
        }
    }

    /// Drives the connection of `session` until it closes, fails or is replaced.
    async fn drive(self: Arc<Self>, session: u64, mut eventloop: EventLoop) {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code != ConnectReturnCode::Success {
                        self.fail(session, format!("connection refused: {:?}", ack.code))
                            .await;
                        break;
                    }
                    if !self.settle(session, ConnectionState::Connected).await {
                        break;
                    }
                    self.log
                        .record(LogKind::Success, "Connected to the MQTT broker.")
                        .await;
                }
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                    let count = self.published.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!(pkid, count, "Publish written to broker");
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    self.closed(session).await;
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    let disconnecting = self.state.get() == ConnectionState::Disconnecting;
                    if disconnecting {
                        self.closed(session).await;
                    } else {
                        self.fail(session, e.to_string()).await;
                    }
                    break;
                }
            }
        }

        self.release(session).await;
        debug!(session, "MQTT event loop finished");
    }

    async fn closed(&self, session: u64) {
        if self.settle(session, ConnectionState::Disconnected).await {
            self.log
                .record(LogKind::Info, "Disconnected from the MQTT broker.")
                .await;
        }
    }

    async fn fail(&self, session: u64, reason: String) {
        let err = PublisherError::Transport(reason.clone());
        if self.settle(session, ConnectionState::Error(reason)).await {
            self.log
                .record(LogKind::Error, format!("MQTT connection lost: {err}"))
                .await;
        }
    }
}

#[async_trait]
impl PublishClient for MqttPublisher {
    async fn connect(&self, config: &MqttConfig) {
        let current = self.state();
        if matches!(current, ConnectionState::Connected | ConnectionState::Connecting) {
            self.inner
                .log
                .record(LogKind::Warning, "Already connected or connecting.")
                .await;
            return;
        }

        let client_id = format!("{}_{}", config.client_id, Utc::now().timestamp());
        let mut options = MqttOptions::new(&client_id, &config.broker_address, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_clean_session(true);
        if let Some(username) = &config.username {
            options.set_credentials(username, config.password.clone().unwrap_or_default());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let session = self.inner.begin(client).await;

        info!(
            host = %config.broker_address,
            port = config.port,
            client_id = %client_id,
            session,
            "Connecting to MQTT broker"
        );
        self.inner
            .log
            .record(
                LogKind::Info,
                format!(
                    "Connecting to MQTT broker {}:{}",
                    config.broker_address, config.port
                ),
            )
            .await;

        tokio::spawn(self.inner.clone().drive(session, eventloop));
    }

    async fn disconnect(&self) {
        if !self.state().is_connected() {
            debug!("Disconnect ignored: not connected");
            return;
        }

        let (session, client) = {
            let connection = self.inner.connection.lock().await;
            let Some(client) = connection.client.clone() else {
                return;
            };
            self.inner.set_state(ConnectionState::Disconnecting);
            (connection.session, client)
        };

        if let Err(e) = client.disconnect().await {
            self.inner.fail(session, e.to_string()).await;
        }
    }

    async fn publish(&self, topic: &str, payload: String, qos: Qos) {
        let client = if self.state().is_connected() {
            self.inner.connection.lock().await.client.clone()
        } else {
            None
        };

        let Some(client) = client else {
            self.inner
                .log
                .record(LogKind::Warning, "Publish attempted while not connected.")
                .await;
            return;
        };

        if let Err(e) = client.try_publish(topic, qos.into(), false, payload) {
            self.inner
                .log
                .record(LogKind::Error, format!("Publish to {topic} failed: {e}"))
                .await;
        }
    }

    fn state(&self) -> ConnectionState {
        self.inner.state.get()
    }

    fn subscribe_state(&self) -> broadcast::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    fn published_count(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }
}
