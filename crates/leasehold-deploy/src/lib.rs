//! Remote deployment of the Leasehold license agent.

pub mod executor;
pub mod orchestrator;
pub mod scripts;
pub mod ssh;

#[cfg(any(test, feature = "test-seams"))]
pub mod recording;

pub use executor::{CommandOutput, RemoteExecutor, RemoteTarget};
pub use orchestrator::{DeployTimeouts, DeploymentOrchestrator};
pub use scripts::ScriptRenderer;
pub use ssh::Ssh2Executor;

#[cfg(any(test, feature = "test-seams"))]
pub use recording::RecordingExecutor;
