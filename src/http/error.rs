use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::op_log::is_client_error;
use crate::security::error_map::PublicError;
use crate::AppError;

pub const INVALID_REQUEST: &str = "VALIDATION/INVALID_REQUEST";

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.kind().status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if !is_client_error(&self) {
            tracing::error!(
                target: "kinboard",
                event = "http_error",
                status = status.as_u16(),
                code = self.code(),
                context = ?self.context(),
                error = %self
            );
        }
        (status, Json(PublicError::from(&self))).into_response()
    }
}

fn invalid_request(message: String) -> AppError {
    AppError::new(INVALID_REQUEST, message)
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        invalid_request(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        invalid_request(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        invalid_request(rejection.body_text())
    }
}
