//! PostgreSQL repository implementations.

mod activity;
mod license;
mod patch;
mod server;

pub use activity::PgActivityLogRepository;
pub use license::PgLicenseRepository;
pub use patch::PgPatchTokenRepository;
pub use server::PgServerRepository;
