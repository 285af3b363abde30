pub mod dto;
pub mod errors;
pub mod handlers;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use crate::generator::Generator;
use handlers::ApiDoc;

pub fn router(generator: Generator) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route("/status", get(handlers::get_status))
        .route("/connection/connect", post(handlers::connect))
        .route("/connection/disconnect", post(handlers::disconnect))
        .route("/generation/start", post(handlers::start_generation))
        .route("/generation/stop", post(handlers::stop_generation))
        .route("/generation/send-once", post(handlers::send_once))
        .route("/generation/reset-trends", post(handlers::reset_trends))
        .route(
            "/sensors",
            get(handlers::list_sensors).post(handlers::add_sensor),
        )
        .route(
            "/sensors/{id}",
            get(handlers::get_sensor).delete(handlers::delete_sensor),
        )
        .route("/sensors/{id}/toggle", post(handlers::toggle_sensor))
        .route(
            "/base-values/{sensor_type}",
            put(handlers::update_base_value),
        )
        .route("/config/topic-prefix", put(handlers::set_topic_prefix))
        .route(
            "/config/publish-interval",
            put(handlers::set_publish_interval),
        )
        .route(
            "/logs",
            get(handlers::get_logs).delete(handlers::clear_logs),
        )
        .route("/logs/stream", get(handlers::stream_logs))
        .with_state(generator)
        .split_for_parts();

    router
        .route("/health", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
}
