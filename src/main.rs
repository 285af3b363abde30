use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{net::TcpListener, signal, time};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sensor_publisher::{
    api,
    config::Config,
    event_log::EventLog,
    mqtt::{MqttPublisher, PublishClient},
    sensors::SensorRegistry,
    Generator,
};

/// How long `AUTO_START` waits for the broker to accept the connection.
const AUTO_START_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (ignore error if file absent; env vars may be set externally)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    info!(
        broker = %config.mqtt.broker_address,
        port = config.mqtt.port,
        topic_format = %config.mqtt.topic_format(),
        interval_secs = config.mqtt.publish_interval,
        "Configuration loaded"
    );

    // Shared event log; the API serves it, tracing mirrors it
    let log = EventLog::new();

    let registry = SensorRegistry::new(log.clone());
    for spec in &config.sensors {
        if let Err(e) = registry
            .add_sensor(spec.sensor_id, spec.name.clone(), spec.sensor_type)
            .await
        {
            warn!(error = %e, "Skipping configured sensor");
        }
    }

    let client: Arc<dyn PublishClient> = Arc::new(MqttPublisher::new(log.clone()));
    let generator = Generator::new(registry, client, log, config.mqtt.clone());

    if config.stop_on_disconnect {
        generator.spawn_disconnect_guard();
    }

    if config.auto_connect {
        generator.connect().await;
        if config.auto_start {
            let generator = generator.clone();
            tokio::spawn(async move {
                let connected = matches!(
                    time::timeout(AUTO_START_TIMEOUT, generator.wait_until_connected()).await,
                    Ok(true)
                );
                if !connected {
                    warn!("Broker not connected in time; generation not auto-started");
                } else if let Err(e) = generator.start().await {
                    warn!(error = %e, "Auto-start failed");
                }
            });
        }
    }

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP control API listening");

    axum::serve(listener, api::router(generator.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    generator.disconnect().await;
    info!("Publisher stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
