//! Request extractors whose rejections use the API error body.

use axum::extract::{FromRequest, rejection::JsonRejection};
use leasehold_core::Error;
use leasehold_core::validation::FieldError;

use crate::error::ApiError;

/// `axum::Json` that answers a bad body with 400 and `{error, field, reason}`.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

const DESERIALIZE_PREFIX: &str = "Failed to deserialize the JSON body into the target type: ";

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let text = rejection.body_text();
        let field = match &rejection {
            JsonRejection::JsonDataError(_) => field_from_data_error(&text),
            _ => None,
        };
        let reason = text
            .strip_prefix(DESERIALIZE_PREFIX)
            .unwrap_or(&text)
            .to_string();
        ApiError(Error::Validation(FieldError::new(
            field.unwrap_or_else(|| "body".to_string()),
            reason,
        )))
    }
}

/// Name the offending field in a serde data error.
///
/// Handles ``missing field `x` `` and the `path: message` form of nested errors.
fn field_from_data_error(text: &str) -> Option<String> {
    let detail = text.strip_prefix(DESERIALIZE_PREFIX).unwrap_or(text);
    if let Some(rest) = detail.strip_prefix("missing field `") {
        return rest.split('`').next().map(str::to_string);
    }
    let (path, _) = detail.split_once(": ")?;
    let is_path = !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '[' | ']'));
    is_path.then(|| path.to_string())
}
