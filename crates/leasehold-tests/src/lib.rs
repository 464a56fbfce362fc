//! Integration test infrastructure for Leasehold.
//!
//! API tests run the real router on the in-memory store, with a mock clock
//! and a recording remote executor. Repository tests run against PostgreSQL
//! in a testcontainer and need the `integration` feature.
//!
//! # Usage
//!
//! ```ignore
//! use leasehold_tests::TestApp;
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let app = TestApp::spawn().await.unwrap();
//!     let resp = app.client.admin_get("/api/licenses").await.unwrap();
//! }
//! ```

pub mod containers;
pub mod context;
pub mod fixtures;
pub mod helpers;

pub use context::TestContext;
pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,leasehold_tests=debug")),
        )
        .with_test_writer()
        .try_init();
}
