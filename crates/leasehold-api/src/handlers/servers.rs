//! Server handlers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use leasehold_core::ids::ServerId;
use leasehold_core::ports::ProbeResult;
use leasehold_core::server::{NewServer, PASSWORD_MASK, Server, ServerUpdate};
use serde::Serialize;
use std::sync::Arc;

use crate::error::{ApiResult, parse_id};
use crate::extract::ApiJson;
use crate::state::AppState;

#[derive(Serialize)]
pub struct ServerResponse {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Always masked.
    pub password: &'static str,
    pub is_connected: bool,
    pub last_checked: Option<String>,
    pub hardware_id: Option<String>,
    pub created_at: String,
}

impl From<&Server> for ServerResponse {
    fn from(server: &Server) -> Self {
        Self {
            id: server.id.to_string(),
            name: server.name.clone(),
            host: server.host.clone(),
            port: server.port,
            username: server.username.clone(),
            password: PASSWORD_MASK,
            is_connected: server.is_connected,
            last_checked: server.last_checked.map(|t| t.to_rfc3339()),
            hardware_id: server.hardware_id.clone(),
            created_at: server.created_at.to_rfc3339(),
        }
    }
}

pub async fn list_servers(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<ServerResponse>>> {
    let servers = state.servers.list().await?;
    Ok(Json(servers.iter().map(ServerResponse::from).collect()))
}

pub async fn create_server(
    State(state): State<Arc<AppState>>,
    ApiJson(request): ApiJson<NewServer>,
) -> ApiResult<(StatusCode, Json<ServerResponse>)> {
    let server = state.servers.create(request).await?;
    Ok((StatusCode::CREATED, Json(ServerResponse::from(&server))))
}

pub async fn get_server(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ServerResponse>> {
    let id: ServerId = parse_id("id", &id)?;
    let server = state.servers.get(id).await?;
    Ok(Json(ServerResponse::from(&server)))
}

pub async fn update_server(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(request): ApiJson<ServerUpdate>,
) -> ApiResult<Json<ServerResponse>> {
    let id: ServerId = parse_id("id", &id)?;
    let server = state.servers.update(id, request).await?;
    Ok(Json(ServerResponse::from(&server)))
}

pub async fn delete_server(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id: ServerId = parse_id("id", &id)?;
    state.servers.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn test_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProbeResult>> {
    let id: ServerId = parse_id("id", &id)?;
    Ok(Json(state.servers.test_connection(id).await?))
}
