use axum::{http::StatusCode, response::IntoResponse, Json};
use scanhub_core::CoordinatorError;

pub type ApiResult<T> = Result<T, ApiError>;

/// HTTP-facing error wrapper (spec §7 propagation policy).
///
/// Maps each `CoordinatorError` variant onto exactly one status code; database
/// errors that aren't already classified as `DuplicateScan`/`NotFound` surface as
/// either a 503 (transient, e.g. pool exhaustion) or a 500.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        match &err {
            CoordinatorError::DuplicateScan => Self {
                status: StatusCode::CONFLICT,
                message: err.to_string(),
            },
            CoordinatorError::NotFound => Self {
                status: StatusCode::NOT_FOUND,
                message: err.to_string(),
            },
            CoordinatorError::WrongState => Self {
                status: StatusCode::BAD_REQUEST,
                message: err.to_string(),
            },
            CoordinatorError::NotOwned => Self {
                status: StatusCode::CONFLICT,
                message: err.to_string(),
            },
            CoordinatorError::AlreadyReported => Self {
                status: StatusCode::CONFLICT,
                message: err.to_string(),
            },
            CoordinatorError::UnknownRule(_) => Self {
                status: StatusCode::BAD_REQUEST,
                message: err.to_string(),
            },
            // Handlers that call `RulesetProvider::refresh` catch this variant themselves
            // and fall back to the cached snapshot (spec §7: 200, logged, not surfaced).
            // Reaching this arm means some other call site let it propagate unhandled.
            CoordinatorError::RulesetStale(source) => {
                tracing::error!(error = %source, "ruleset refresh failed unhandled");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "internal error".to_string(),
                }
            }
            CoordinatorError::ReporterFailure(source) => {
                tracing::error!(error = %source, "reporter call failed");
                Self {
                    status: StatusCode::BAD_GATEWAY,
                    message: err.to_string(),
                }
            }
            CoordinatorError::Database(inner) if err.is_transient() => {
                tracing::error!(error = %inner, "transient database error");
                Self {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    message: "database temporarily unavailable".to_string(),
                }
            }
            CoordinatorError::Database(inner) => {
                tracing::error!(error = %inner, "database error");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "internal error".to_string(),
                }
            }
            CoordinatorError::Other(inner) => {
                tracing::error!(error = %inner, "internal error");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "internal error".to_string(),
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}
