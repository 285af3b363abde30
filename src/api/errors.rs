use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::error::PublisherError;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<PublisherError>() {
            Some(PublisherError::DuplicateSensor { .. }) => StatusCode::CONFLICT,
            Some(PublisherError::NotConnected) => StatusCode::CONFLICT,
            Some(PublisherError::SensorNotFound(_)) => StatusCode::NOT_FOUND,
            Some(PublisherError::InvalidInterval(_)) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}
