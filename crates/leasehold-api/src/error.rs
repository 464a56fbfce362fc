//! Mapping from domain errors to HTTP responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use leasehold_core::Error;
use serde::Serialize;
use std::str::FromStr;
use tracing::error;

/// Body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
}

impl ErrorBody {
    fn message(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            field: None,
            reason: None,
            status: None,
        }
    }
}

#[derive(Debug)]
pub struct ApiError(pub Error);

pub type ApiResult<T> = Result<T, ApiError>;

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

pub fn status_code(err: &Error) -> StatusCode {
    match err {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::Validation(_) | Error::NotProvisioned(_) => StatusCode::BAD_REQUEST,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::SecurityMismatch { .. }
        | Error::Expired(_)
        | Error::Suspended(_)
        | Error::Inactive(_) => StatusCode::FORBIDDEN,
        Error::Unauthorized => StatusCode::UNAUTHORIZED,
        Error::RemoteExecution(_) => StatusCode::BAD_GATEWAY,
        Error::Database(_) | Error::Io(_) | Error::Serialization(_) | Error::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_code(&self.0);
        let body = match &self.0 {
            Error::Validation(field) => ErrorBody {
                error: "validation failed".to_string(),
                field: Some(field.field.clone()),
                reason: Some(field.reason.clone()),
                status: None,
            },
            Error::Expired(_) => ErrorBody {
                status: Some("expired"),
                ..ErrorBody::message(self.0.to_string())
            },
            Error::Suspended(_) => ErrorBody {
                status: Some("suspended"),
                ..ErrorBody::message(self.0.to_string())
            },
            Error::Inactive(_) => ErrorBody {
                status: Some("inactive"),
                ..ErrorBody::message(self.0.to_string())
            },
            // Never echo the bound fingerprint back to the caller.
            Error::SecurityMismatch { .. } => ErrorBody::message("hardware id mismatch"),
            other if status == StatusCode::INTERNAL_SERVER_ERROR => {
                error!(error = %other, "Request failed");
                ErrorBody::message("internal server error")
            }
            other => ErrorBody::message(other.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

/// Parse a path id, reporting a bad one as a validation error.
pub fn parse_id<T: FromStr>(field: &'static str, raw: &str) -> ApiResult<T> {
    raw.parse()
        .map_err(|_| ApiError(Error::invalid(field, "not a valid id")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use leasehold_core::ids::ServerId;

    #[test]
    fn test_status_codes() {
        assert_eq!(status_code(&Error::not_found("license", "x")), StatusCode::NOT_FOUND);
        assert_eq!(status_code(&Error::invalid("days", "bad")), StatusCode::BAD_REQUEST);
        assert_eq!(status_code(&Error::Expired("x".into())), StatusCode::FORBIDDEN);
        assert_eq!(
            status_code(&Error::RemoteExecution("x".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_code(&Error::NotProvisioned("x".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_error_body_omits_empty_fields() {
        let body = serde_json::to_value(ErrorBody::message("nope")).unwrap();
        assert_eq!(body, serde_json::json!({ "error": "nope" }));
    }

    #[test]
    fn test_parse_id() {
        let id = ServerId::new();
        assert_eq!(parse_id::<ServerId>("id", &id.to_string()).unwrap(), id);
        assert!(parse_id::<ServerId>("id", "srv_nope").is_err());
    }
}
