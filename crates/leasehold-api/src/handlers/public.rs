//! Endpoints called by targets: provisioning, verification and onboarding.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use leasehold_core::codec::LicensePayload;
use leasehold_licensing::{ProvisionResult, VerifyOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ApiResult, status_code};
use crate::extract::ApiJson;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LicenseClaim {
    pub license_id: String,
    pub hardware_id: String,
}

pub async fn provision(
    State(state): State<Arc<AppState>>,
    ApiJson(claim): ApiJson<LicenseClaim>,
) -> ApiResult<Json<ProvisionResult>> {
    let result = state
        .licenses
        .provision(&claim.license_id, &claim.hardware_id)
        .await?;
    Ok(Json(result))
}

pub async fn verify(
    State(state): State<Arc<AppState>>,
    ApiJson(claim): ApiJson<LicenseClaim>,
) -> ApiResult<Json<VerifyOutcome>> {
    let outcome = state
        .licenses
        .verify(&claim.license_id, &claim.hardware_id)
        .await?;
    Ok(Json(outcome))
}

pub async fn license_data(
    State(state): State<Arc<AppState>>,
    Path(license_id): Path<String>,
) -> ApiResult<Json<LicensePayload>> {
    Ok(Json(state.licenses.license_data(&license_id).await?))
}

pub async fn license_blob(
    State(state): State<Arc<AppState>>,
    Path(license_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let blob = state.licenses.license_blob(&license_id).await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], blob))
}

pub async fn patch_run(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let script = state.patches.run_script(&token).await?;
    Ok(([(header::CONTENT_TYPE, "text/x-shellscript")], script))
}

#[derive(Debug, Deserialize)]
pub struct ActivateParams {
    pub token: String,
    #[serde(default)]
    pub raw_hwid: String,
    pub hostname: Option<String>,
    pub ip: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActivateResponse {
    pub success: bool,
    pub message: String,
}

pub async fn patch_activate(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ActivateParams>,
) -> impl IntoResponse {
    match state
        .patches
        .activate(
            &params.token,
            &params.raw_hwid,
            params.hostname.as_deref(),
            params.ip.as_deref(),
        )
        .await
    {
        Ok(_) => (
            StatusCode::OK,
            Json(ActivateResponse {
                success: true,
                message: "host registered, a license will be issued by an administrator"
                    .to_string(),
            }),
        ),
        Err(e) => (
            status_code(&e),
            Json(ActivateResponse {
                success: false,
                message: e.to_string(),
            }),
        ),
    }
}
