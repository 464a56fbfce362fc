//! License administration handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use leasehold_core::activity::ActivityLog;
use leasehold_core::ids::{LicenseRecordId, ServerId};
use leasehold_core::license::{License, LicenseEdit, LicenseStatus, NewLicense};
use leasehold_core::ports::DeployReport;
use leasehold_licensing::Stats;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ApiResult, parse_id};
use crate::extract::ApiJson;
use crate::state::AppState;

#[derive(Serialize)]
pub struct LicenseResponse {
    pub id: String,
    pub license_id: String,
    pub server_id: Option<String>,
    pub hardware_id: Option<String>,
    pub status: LicenseStatus,
    pub expires_at: String,
    pub max_users: i32,
    pub max_sites: i32,
    pub client_id: Option<String>,
    pub notes: Option<String>,
    pub last_verified_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&License> for LicenseResponse {
    fn from(license: &License) -> Self {
        Self {
            id: license.id.to_string(),
            license_id: license.license_id.clone(),
            server_id: license.server_id.map(|s| s.to_string()),
            hardware_id: license.hardware_id.clone(),
            status: license.status,
            expires_at: license.expires_at.to_rfc3339(),
            max_users: license.max_users,
            max_sites: license.max_sites,
            client_id: license.client_id.clone(),
            notes: license.notes.clone(),
            last_verified_at: license.last_verified_at.map(|t| t.to_rfc3339()),
            created_at: license.created_at.to_rfc3339(),
            updated_at: license.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct ActivityResponse {
    pub id: String,
    pub license_id: Option<String>,
    pub server_id: Option<String>,
    pub action: &'static str,
    pub details: String,
    pub created_at: String,
}

impl From<&ActivityLog> for ActivityResponse {
    fn from(entry: &ActivityLog) -> Self {
        Self {
            id: entry.id.to_string(),
            license_id: entry.license_id.map(|l| l.to_string()),
            server_id: entry.server_id.map(|s| s.to_string()),
            action: entry.action.as_str(),
            details: entry.details.clone(),
            created_at: entry.created_at.to_rfc3339(),
        }
    }
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: LicenseStatus,
}

#[derive(Deserialize)]
pub struct ExtendRequest {
    pub days: i64,
}

#[derive(Deserialize)]
pub struct TransferRequest {
    pub server_id: String,
}

pub async fn list_licenses(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<LicenseResponse>>> {
    let licenses = state.licenses.list().await?;
    Ok(Json(licenses.iter().map(LicenseResponse::from).collect()))
}

pub async fn create_license(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<NewLicense>,
) -> ApiResult<(StatusCode, Json<LicenseResponse>)> {
    let license = state.licenses.create(request).await?;
    Ok((StatusCode::CREATED, Json(LicenseResponse::from(&license))))
}

pub async fn get_license(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<LicenseResponse>> {
    let id: LicenseRecordId = parse_id("id", &id)?;
    let license = state.licenses.get(id).await?;
    Ok(Json(LicenseResponse::from(&license)))
}

pub async fn edit_license(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<LicenseEdit>,
) -> ApiResult<Json<LicenseResponse>> {
    let id: LicenseRecordId = parse_id("id", &id)?;
    let license = state.licenses.edit(id, request).await?;
    Ok(Json(LicenseResponse::from(&license)))
}

pub async fn delete_license(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id: LicenseRecordId = parse_id("id", &id)?;
    state.licenses.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<StatusRequest>,
) -> ApiResult<Json<LicenseResponse>> {
    let id: LicenseRecordId = parse_id("id", &id)?;
    let license = state.licenses.set_status(id, request.status).await?;
    Ok(Json(LicenseResponse::from(&license)))
}

pub async fn extend_license(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<ExtendRequest>,
) -> ApiResult<Json<LicenseResponse>> {
    let id: LicenseRecordId = parse_id("id", &id)?;
    let license = state.licenses.extend(id, request.days).await?;
    Ok(Json(LicenseResponse::from(&license)))
}

pub async fn transfer_license(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<TransferRequest>,
) -> ApiResult<Json<LicenseResponse>> {
    let id: LicenseRecordId = parse_id("id", &id)?;
    let server_id: ServerId = parse_id("server_id", &request.server_id)?;
    let license = state.licenses.transfer(id, server_id).await?;
    Ok(Json(LicenseResponse::from(&license)))
}

pub async fn deploy_license(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeployReport>> {
    let id: LicenseRecordId = parse_id("id", &id)?;
    Ok(Json(state.licenses.deploy(id).await?))
}

pub async fn undeploy_license(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeployReport>> {
    let id: LicenseRecordId = parse_id("id", &id)?;
    Ok(Json(state.licenses.undeploy(id).await?))
}

pub async fn license_activity(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ActivityResponse>>> {
    let id: LicenseRecordId = parse_id("id", &id)?;
    let entries = state.licenses.license_activity(id).await?;
    Ok(Json(entries.iter().map(ActivityResponse::from).collect()))
}

pub async fn install_script(
    State(state): State<Arc<AppState>>,
    Path(license_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let script = state.licenses.install_script(&license_id).await?;
    Ok(([(header::CONTENT_TYPE, "text/x-shellscript")], script))
}

pub async fn activity_logs(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<ActivityResponse>>> {
    let entries = state.licenses.activity().await?;
    Ok(Json(entries.iter().map(ActivityResponse::from).collect()))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<Stats>> {
    Ok(Json(state.licenses.stats().await?))
}
