//! Read-once exchange of small payloads.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use leasehold_core::Error;
use serde::Serialize;
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Largest payload accepted by `POST /api/exchange`.
pub const MAX_EXCHANGE_BYTES: usize = 1024 * 1024;

#[derive(Serialize)]
pub struct ExchangeResponse {
    pub key: String,
    /// Seconds until the entry is gone.
    pub expires_in: u64,
}

pub async fn put(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<ExchangeResponse>)> {
    if body.is_empty() {
        return Err(ApiError(Error::invalid("body", "must not be empty")));
    }
    let key = state.exchange.put(body.to_vec());
    Ok((
        StatusCode::CREATED,
        Json(ExchangeResponse {
            key,
            expires_in: state.exchange.ttl().as_secs(),
        }),
    ))
}

pub async fn take(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Response {
    match state.exchange.take(&key) {
        Some(bytes) => (
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        None => ApiError(Error::not_found("exchange entry", key)).into_response(),
    }
}
