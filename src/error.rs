use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Error surface of the HTTP API. Every variant renders the same
/// `{"status":"error","message":...}` envelope so callers can parse failures
/// uniformly.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("Authorization header is missing.")]
    MissingAuthorization,

    #[error("Invalid Authorization header format. Expected: Bearer <prefix>.<secret>")]
    InvalidTokenFormat,

    #[error("Forbidden. The provided token is not valid for the specified profile.")]
    Unauthorized,

    #[error("Not Found. No email found with the specified message_id.")]
    NotFound,

    #[error("Method Not Allowed. Only {0} requests are accepted.")]
    MethodNotAllowed(&'static str),

    #[error("Too Many Requests. Rate limit exceeded for this IP on this profile. Please try again later.")]
    RateLimited,

    #[error("Internal Server Error. Could not process the request.")]
    Persistence(#[from] sqlx::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::MissingAuthorization | Self::InvalidTokenFormat => StatusCode::UNAUTHORIZED,
            Self::Unauthorized => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Raw database errors stay server-side; callers get the generic text
        // from the variant's Display.
        if let Self::Persistence(ref e) = self {
            tracing::error!(error = %e, "persistence failure");
        }
        let body = Json(json!({ "status": "error", "message": self.to_string() }));
        (self.status(), body).into_response()
    }
}
