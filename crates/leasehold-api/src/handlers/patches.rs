//! Patch token handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use leasehold_core::ids::PatchTokenId;
use leasehold_core::license::TokenEntitlement;
use leasehold_core::patch::{NewPatchToken, PatchStatus, PatchToken};
use serde::Serialize;
use std::sync::Arc;

use crate::error::{ApiResult, parse_id};
use crate::extract::ApiJson;
use crate::handlers::licenses::LicenseResponse;
use crate::state::AppState;

#[derive(Serialize)]
pub struct PatchResponse {
    pub id: String,
    pub token: String,
    /// One-liner the operator runs on the target.
    pub command: String,
    pub person_name: String,
    pub max_users: i32,
    pub max_sites: i32,
    pub duration_days: i32,
    pub status: PatchStatus,
    pub license_id: Option<String>,
    pub server_id: Option<String>,
    pub notes: Option<String>,
    pub target_ip: Option<String>,
    pub activated_hostname: Option<String>,
    pub activated_ip: Option<String>,
    pub hardware_id: Option<String>,
    pub used_at: Option<String>,
    pub created_at: String,
}

impl PatchResponse {
    fn new(token: &PatchToken, public_url: &str) -> Self {
        Self {
            id: token.id.to_string(),
            token: token.token.clone(),
            command: format!(
                "curl -fsSL {}/api/patch-run/{} | sudo sh",
                public_url.trim_end_matches('/'),
                token.token
            ),
            person_name: token.person_name.clone(),
            max_users: token.max_users,
            max_sites: token.max_sites,
            duration_days: token.duration_days,
            status: token.status,
            license_id: token.license_id.map(|l| l.to_string()),
            server_id: token.server_id.map(|s| s.to_string()),
            notes: token.notes.clone(),
            target_ip: token.target_ip.clone(),
            activated_hostname: token.activated_hostname.clone(),
            activated_ip: token.activated_ip.clone(),
            hardware_id: token.hardware_id.clone(),
            used_at: token.used_at.map(|t| t.to_rfc3339()),
            created_at: token.created_at.to_rfc3339(),
        }
    }
}

fn responses(tokens: &[PatchToken], public_url: &str) -> Vec<PatchResponse> {
    tokens
        .iter()
        .map(|t| PatchResponse::new(t, public_url))
        .collect()
}

pub async fn list_patches(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<PatchResponse>>> {
    let tokens = state.patches.list().await?;
    Ok(Json(responses(&tokens, &state.public_url)))
}

pub async fn available_patches(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<PatchResponse>>> {
    let tokens = state.patches.available().await?;
    Ok(Json(responses(&tokens, &state.public_url)))
}

pub async fn create_patch(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<NewPatchToken>,
) -> ApiResult<(StatusCode, Json<PatchResponse>)> {
    let token = state.patches.create_token(request).await?;
    Ok((
        StatusCode::CREATED,
        Json(PatchResponse::new(&token, &state.public_url)),
    ))
}

pub async fn revoke_patch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<PatchResponse>> {
    let id: PatchTokenId = parse_id("id", &id)?;
    let token = state.patches.revoke(id).await?;
    Ok(Json(PatchResponse::new(&token, &state.public_url)))
}

pub async fn issue_license(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<TokenEntitlement>,
) -> ApiResult<(StatusCode, Json<LicenseResponse>)> {
    let id: PatchTokenId = parse_id("id", &id)?;
    let license = state.licenses.create_from_token(id, request).await?;
    Ok((StatusCode::CREATED, Json(LicenseResponse::from(&license))))
}
