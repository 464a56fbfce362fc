//! API route definitions.

use axum::{
    Router, middleware,
    routing::{delete, get, patch, post},
};
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{exchange, health, licenses, patches, public, servers};
use crate::middleware::{cors_layer, request_id, require_admin};
use crate::state::AppState;

/// Create the API router without outer layers.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest(
            "/api",
            public_routes().merge(admin_routes(state.clone())),
        )
        .with_state(state)
}

/// The router with tracing, request ids and CORS.
pub fn build_app(state: Arc<AppState>) -> Router {
    create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id))
        .layer(cors_layer())
}

fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/provision", post(public::provision))
        .route("/verify", post(public::verify))
        .route("/license-data/{license_id}", get(public::license_data))
        .route("/license-blob/{license_id}", get(public::license_blob))
        .route("/patch-run/{token}", get(public::patch_run))
        .route("/patch-activate", get(public::patch_activate))
        .route("/exchange/{key}", get(exchange::take))
}

fn admin_routes(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .nest("/servers", server_routes())
        .nest("/licenses", license_routes())
        .nest("/patches", patch_routes())
        .route("/install-script/{license_id}", get(licenses::install_script))
        .route("/activity-logs", get(licenses::activity_logs))
        .route("/stats", get(licenses::stats))
        .route(
            "/exchange",
            post(exchange::put).layer(RequestBodyLimitLayer::new(exchange::MAX_EXCHANGE_BYTES)),
        )
        .route_layer(middleware::from_fn_with_state(state, require_admin))
}

fn server_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(servers::list_servers).post(servers::create_server))
        .route(
            "/{id}",
            get(servers::get_server)
                .patch(servers::update_server)
                .delete(servers::delete_server),
        )
        .route("/{id}/test", post(servers::test_connection))
}

fn license_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(licenses::list_licenses).post(licenses::create_license))
        .route(
            "/{id}",
            get(licenses::get_license)
                .patch(licenses::edit_license)
                .delete(licenses::delete_license),
        )
        .route("/{id}/status", patch(licenses::set_status))
        .route("/{id}/extend", post(licenses::extend_license))
        .route("/{id}/transfer", post(licenses::transfer_license))
        .route("/{id}/deploy", post(licenses::deploy_license))
        .route("/{id}/undeploy", post(licenses::undeploy_license))
        .route("/{id}/activity", get(licenses::license_activity))
}

fn patch_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(patches::list_patches).post(patches::create_patch))
        .route("/available", get(patches::available_patches))
        .route("/{id}", delete(patches::revoke_patch))
        .route("/{id}/license", post(patches::issue_license))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use leasehold_cache::EphemeralExchange;
    use leasehold_cache::exchange::MAX_TTL;
    use leasehold_core::clock::MockClock;
    use leasehold_core::codec::{DEFAULT_KEY_PREFIX, RotatingXorCodec};
    use leasehold_db::MemoryStore;
    use leasehold_deploy::{DeploymentOrchestrator, RecordingExecutor, ScriptRenderer};
    use leasehold_licensing::{LicenseService, PatchService, Repositories, ServerService};
    use tower::ServiceExt;

    fn app() -> Router {
        let clock = Arc::new(MockClock::from_rfc3339("2026-02-01T00:00:00Z"));
        let repos = Repositories::from_store(Arc::new(MemoryStore::new()));
        let scripts = ScriptRenderer::new("https://licenses.example.com", DEFAULT_KEY_PREFIX);
        let deployer = Arc::new(DeploymentOrchestrator::new(
            Arc::new(RecordingExecutor::new()),
            scripts.clone(),
        ));
        let codec = Arc::new(RotatingXorCodec::new(DEFAULT_KEY_PREFIX, clock.clone()));
        let state = AppState::new(
            Arc::new(LicenseService::new(
                repos.clone(),
                deployer.clone(),
                codec,
                scripts.clone(),
                clock.clone(),
            )),
            Arc::new(ServerService::new(repos.clone(), deployer, clock.clone())),
            Arc::new(PatchService::new(
                repos.patch_tokens.clone(),
                repos.activity.clone(),
                scripts,
                clock.clone(),
            )),
            Arc::new(EphemeralExchange::new(clock, MAX_TTL)),
            "s3cret",
            "https://licenses.example.com",
        );
        create_router(Arc::new(state))
    }

    async fn status(request: Request<Body>) -> StatusCode {
        app().oneshot(request).await.unwrap().status()
    }

    async fn json_response(request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, "Bearer s3cret")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_public_routes_open() {
        let request = Request::get("/api/health").body(Body::empty()).unwrap();
        assert_eq!(status(request).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_routes_guarded() {
        let request = Request::get("/api/stats").body(Body::empty()).unwrap();
        assert_eq!(status(request).await, StatusCode::UNAUTHORIZED);

        let request = Request::get("/api/stats")
            .header(header::AUTHORIZATION, "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status(request).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let request = Request::get("/api/nope")
            .header(header::AUTHORIZATION, "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        assert_eq!(status(request).await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_field_is_a_validation_error() {
        let (status, body) =
            json_response(post_json("/api/provision", r#"{"license_id":"LIC-1"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation failed");
        assert_eq!(body["field"], "hardware_id");
        assert!(body["reason"].as_str().unwrap().contains("missing field"));
    }

    #[tokio::test]
    async fn test_wrong_type_names_the_field() {
        let (status, body) = json_response(post_json(
            "/api/licenses",
            r#"{"license_id":"LIC-2","expires_at":"2026-06-01T00:00:00Z","max_users":"ten"}"#,
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "max_users");
    }

    #[tokio::test]
    async fn test_malformed_json_is_a_validation_error() {
        let (status, body) = json_response(post_json("/api/verify", "{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "body");

        let request = Request::post("/api/verify")
            .body(Body::from(r#"{"license_id":"a","hardware_id":"b"}"#))
            .unwrap();
        let (status, body) = json_response(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "body");
    }
}
