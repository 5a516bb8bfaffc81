use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::CreateError;

/// Standardised API error response.
///
/// Every error leaving the HTTP layer serialises as
/// `{ "error": "<kind>", "detail": "<message>" }`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ApiErrorBody,
}

#[derive(Debug, Clone, Serialize)]
struct ApiErrorBody {
    error: &'static str,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, error: &'static str, detail: impl Into<String>) -> Self {
        Self {
            status,
            body: ApiErrorBody {
                error,
                detail: detail.into(),
            },
        }
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid-request", detail)
    }

    pub fn slug_in_use(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "slug-in-use", detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not-found", detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<CreateError> for ApiError {
    fn from(err: CreateError) -> Self {
        match err {
            CreateError::Invalid(detail) => Self::invalid_request(detail),
            CreateError::SlugInUse(slug) => {
                Self::slug_in_use(format!("slug already in use: {slug}"))
            }
        }
    }
}
