use std::convert::Infallible;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use tokio_stream::{wrappers::BroadcastStream, Stream, StreamExt};
use utoipa::OpenApi;
use uuid::Uuid;

use super::{
    dto::{
        AddSensorRequest, BaseValueDto, BaseValueRequest, ConnectionStateDto, GenerationDto,
        PublishIntervalRequest, SendOnceDto, SensorDto, SensorQuery, StatusDto,
        TopicPrefixRequest,
    },
    errors::AppError,
};
use crate::{
    config::{MqttConfig, TopicPreset, PUBLISH_INTERVAL_PRESETS},
    error::PublisherError,
    event_log::{LogEntry, LogKind},
    generator::Generator,
    reading::Reading,
    sensors::SensorType,
};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Snapshot of connection, generation, configuration and sensors.
#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, description = "Current publisher status", body = StatusDto),
    ),
    tag = "status"
)]
pub async fn get_status(State(generator): State<Generator>) -> Json<StatusDto> {
    let config = generator.config().await;
    Json(StatusDto {
        connection: generator.connection_state().into(),
        generating: generator.is_generating().await,
        message_count: generator.published_count(),
        pass_count: generator.pass_count(),
        topic_format: config.topic_format(),
        config,
        publish_interval_presets: PUBLISH_INTERVAL_PRESETS.to_vec(),
        sensors: generator
            .registry()
            .sensors()
            .await
            .into_iter()
            .map(Into::into)
            .collect(),
        base_values: generator.base_values().await,
    })
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// Start connecting to the broker. Poll `/status` for the outcome.
#[utoipa::path(
    post,
    path = "/connection/connect",
    responses(
        (status = 202, description = "Connection attempt started", body = ConnectionStateDto),
    ),
    tag = "connection"
)]
pub async fn connect(State(generator): State<Generator>) -> (StatusCode, Json<ConnectionStateDto>) {
    generator.connect().await;
    (StatusCode::ACCEPTED, Json(generator.connection_state().into()))
}

/// Stop generation, then disconnect from the broker.
#[utoipa::path(
    post,
    path = "/connection/disconnect",
    responses(
        (status = 202, description = "Disconnect started", body = ConnectionStateDto),
    ),
    tag = "connection"
)]
pub async fn disconnect(
    State(generator): State<Generator>,
) -> (StatusCode, Json<ConnectionStateDto>) {
    generator.disconnect().await;
    (StatusCode::ACCEPTED, Json(generator.connection_state().into()))
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Start periodic generation. Starting twice is a no-op.
#[utoipa::path(
    post,
    path = "/generation/start",
    responses(
        (status = 200, description = "Generation running", body = GenerationDto),
        (status = 409, description = "Not connected to the broker"),
    ),
    tag = "generation"
)]
pub async fn start_generation(
    State(generator): State<Generator>,
) -> Result<Json<GenerationDto>, AppError> {
    let changed = generator.start().await?;
    Ok(Json(GenerationDto {
        generating: true,
        changed,
    }))
}

/// Stop periodic generation.
#[utoipa::path(
    post,
    path = "/generation/stop",
    responses(
        (status = 200, description = "Generation stopped", body = GenerationDto),
    ),
    tag = "generation"
)]
pub async fn stop_generation(State(generator): State<Generator>) -> Json<GenerationDto> {
    let changed = generator.stop().await;
    Json(GenerationDto {
        generating: false,
        changed,
    })
}

/// Publish one reading for every enabled sensor right now.
#[utoipa::path(
    post,
    path = "/generation/send-once",
    responses(
        (status = 200, description = "Readings handed to the broker client", body = SendOnceDto),
        (status = 409, description = "Not connected to the broker"),
    ),
    tag = "generation"
)]
pub async fn send_once(State(generator): State<Generator>) -> Result<Json<SendOnceDto>, AppError> {
    let published = generator.send_once().await?;
    Ok(Json(SendOnceDto { published }))
}

/// Zero the trend of every sensor type. Base values are kept.
#[utoipa::path(
    post,
    path = "/generation/reset-trends",
    responses(
        (status = 204, description = "Trends reset"),
    ),
    tag = "generation"
)]
pub async fn reset_trends(State(generator): State<Generator>) -> StatusCode {
    generator.reset_trends().await;
    StatusCode::NO_CONTENT
}

// ---------------------------------------------------------------------------
// Sensors
// ---------------------------------------------------------------------------

/// Sensors in display order, optionally only those of one type.
#[utoipa::path(
    get,
    path = "/sensors",
    params(
        ("sensor_type" = Option<SensorType>, Query, description = "Only sensors of this type"),
    ),
    responses(
        (status = 200, description = "Configured sensors", body = Vec<SensorDto>),
    ),
    tag = "sensors"
)]
pub async fn list_sensors(
    State(generator): State<Generator>,
    Query(query): Query<SensorQuery>,
) -> Json<Vec<SensorDto>> {
    let registry = generator.registry();
    let sensors = match query.sensor_type {
        Some(sensor_type) => registry.sensors_of_type(sensor_type).await,
        None => registry.sensors().await,
    };
    Json(sensors.into_iter().map(Into::into).collect())
}

/// One sensor by its identity.
#[utoipa::path(
    get,
    path = "/sensors/{id}",
    params(
        ("id" = Uuid, Path, description = "Sensor identity"),
    ),
    responses(
        (status = 200, description = "Sensor", body = SensorDto),
        (status = 404, description = "Unknown sensor"),
    ),
    tag = "sensors"
)]
pub async fn get_sensor(
    State(generator): State<Generator>,
    Path(id): Path<Uuid>,
) -> Result<Json<SensorDto>, AppError> {
    let sensor = generator
        .registry()
        .get(id)
        .await
        .ok_or(PublisherError::SensorNotFound(id))?;
    Ok(Json(sensor.into()))
}

/// Register a sensor. `(sensor_id, sensor_type)` must be unique.
#[utoipa::path(
    post,
    path = "/sensors",
    request_body = AddSensorRequest,
    responses(
        (status = 201, description = "Sensor added", body = SensorDto),
        (status = 409, description = "Duplicate sensor id for this type"),
    ),
    tag = "sensors"
)]
pub async fn add_sensor(
    State(generator): State<Generator>,
    Json(req): Json<AddSensorRequest>,
) -> Result<(StatusCode, Json<SensorDto>), AppError> {
    let sensor = generator
        .registry()
        .add_sensor(req.sensor_id, req.name, req.sensor_type)
        .await?;
    Ok((StatusCode::CREATED, Json(sensor.into())))
}

/// Remove a sensor by its identity.
#[utoipa::path(
    delete,
    path = "/sensors/{id}",
    params(
        ("id" = Uuid, Path, description = "Sensor identity"),
    ),
    responses(
        (status = 204, description = "Sensor removed"),
        (status = 404, description = "Unknown sensor"),
    ),
    tag = "sensors"
)]
pub async fn delete_sensor(
    State(generator): State<Generator>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    generator
        .registry()
        .remove_sensor(id)
        .await
        .ok_or(PublisherError::SensorNotFound(id))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Flip a sensor between enabled and disabled.
#[utoipa::path(
    post,
    path = "/sensors/{id}/toggle",
    params(
        ("id" = Uuid, Path, description = "Sensor identity"),
    ),
    responses(
        (status = 200, description = "Updated sensor", body = SensorDto),
        (status = 404, description = "Unknown sensor"),
    ),
    tag = "sensors"
)]
pub async fn toggle_sensor(
    State(generator): State<Generator>,
    Path(id): Path<Uuid>,
) -> Result<Json<SensorDto>, AppError> {
    let sensor = generator
        .registry()
        .toggle_sensor(id)
        .await
        .ok_or(PublisherError::SensorNotFound(id))?;
    Ok(Json(sensor.into()))
}

/// Set the value a sensor type's readings vary around.
#[utoipa::path(
    put,
    path = "/base-values/{sensor_type}",
    params(
        ("sensor_type" = SensorType, Path, description = "Sensor type"),
    ),
    request_body = BaseValueRequest,
    responses(
        (status = 200, description = "Base value updated", body = BaseValueDto),
    ),
    tag = "sensors"
)]
pub async fn update_base_value(
    State(generator): State<Generator>,
    Path(sensor_type): Path<SensorType>,
    Json(req): Json<BaseValueRequest>,
) -> Json<BaseValueDto> {
    generator
        .registry()
        .update_base_value(sensor_type, req.value)
        .await;
    Json(BaseValueDto {
        sensor_type,
        value: req.value,
    })
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Change the topic prefix. Preset names resolve to their prefix.
#[utoipa::path(
    put,
    path = "/config/topic-prefix",
    request_body = TopicPrefixRequest,
    responses(
        (status = 200, description = "Updated configuration", body = MqttConfig),
    ),
    tag = "config"
)]
pub async fn set_topic_prefix(
    State(generator): State<Generator>,
    Json(req): Json<TopicPrefixRequest>,
) -> Json<MqttConfig> {
    match req.topic_prefix.parse::<TopicPreset>() {
        Ok(preset) => generator.apply_topic_preset(preset).await,
        Err(_) => generator.set_topic_prefix(req.topic_prefix).await,
    }
    Json(generator.config().await)
}

/// Change the delay between publish-all passes.
#[utoipa::path(
    put,
    path = "/config/publish-interval",
    request_body = PublishIntervalRequest,
    responses(
        (status = 200, description = "Updated configuration", body = MqttConfig),
        (status = 400, description = "Interval is not a positive number"),
    ),
    tag = "config"
)]
pub async fn set_publish_interval(
    State(generator): State<Generator>,
    Json(req): Json<PublishIntervalRequest>,
) -> Result<Json<MqttConfig>, AppError> {
    generator.set_publish_interval(req.publish_interval).await?;
    Ok(Json(generator.config().await))
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

/// Recent events, newest first (at most 100).
#[utoipa::path(
    get,
    path = "/logs",
    responses(
        (status = 200, description = "Event log", body = Vec<LogEntry>),
    ),
    tag = "logs"
)]
pub async fn get_logs(State(generator): State<Generator>) -> Json<Vec<LogEntry>> {
    Json(generator.log().entries().await)
}

/// Live event log as Server-Sent Events, one JSON entry per event.
///
/// Only entries recorded after the client connects are sent; entries missed
/// by a lagging client are skipped.
#[utoipa::path(
    get,
    path = "/logs/stream",
    responses(
        (status = 200, description = "text/event-stream of log entries", body = LogEntry),
    ),
    tag = "logs"
)]
pub async fn stream_logs(
    State(generator): State<Generator>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(generator.log().subscribe()).filter_map(|result| {
        result
            .ok()
            .and_then(|entry| Event::default().json_data(entry).ok())
            .map(Ok)
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Empty the event log.
#[utoipa::path(
    delete,
    path = "/logs",
    responses(
        (status = 204, description = "Event log cleared"),
    ),
    tag = "logs"
)]
pub async fn clear_logs(State(generator): State<Generator>) -> StatusCode {
    generator.log().clear().await;
    StatusCode::NO_CONTENT
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
    tag = "system"
)]
pub async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

// ---------------------------------------------------------------------------
// OpenAPI spec
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        get_status,
        connect,
        disconnect,
        start_generation,
        stop_generation,
        send_once,
        reset_trends,
        list_sensors,
        get_sensor,
        add_sensor,
        delete_sensor,
        toggle_sensor,
        update_base_value,
        set_topic_prefix,
        set_publish_interval,
        get_logs,
        stream_logs,
        clear_logs,
        health
    ),
    components(schemas(
        StatusDto,
        ConnectionStateDto,
        GenerationDto,
        SendOnceDto,
        SensorDto,
        AddSensorRequest,
        BaseValueRequest,
        BaseValueDto,
        TopicPrefixRequest,
        PublishIntervalRequest,
        MqttConfig,
        SensorType,
        LogEntry,
        LogKind,
        Reading
    )),
    tags(
        (name = "status",     description = "Publisher status"),
        (name = "connection", description = "Broker connection control"),
        (name = "generation", description = "Reading generation control"),
        (name = "sensors",    description = "Sensor registry"),
        (name = "config",     description = "Runtime configuration"),
        (name = "logs",       description = "Event log"),
        (name = "system",     description = "System endpoints"),
    ),
    info(
        title = "Sensor Publisher API",
        version = "0.1.0",
        description = "Control API for the synthetic sensor-data publisher"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
