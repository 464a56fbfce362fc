//! Installs, refreshes and removes the license agent on a target.

use crate::executor::{RemoteExecutor, RemoteTarget};
use crate::scripts::{ScriptRenderer, shell_quote};
use async_trait::async_trait;
use base64::Engine;
use leasehold_core::fingerprint::{FingerprintSources, digest_raw, short_hwid};
use leasehold_core::license::License;
use leasehold_core::ports::{DeployReport, Deployer, ProbeResult};
use leasehold_core::server::Server;
use leasehold_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployTimeouts {
    pub probe: Duration,
    pub deploy: Duration,
    pub undeploy: Duration,
}

impl Default for DeployTimeouts {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(15),
            deploy: Duration::from_secs(120),
            undeploy: Duration::from_secs(60),
        }
    }
}

pub struct DeploymentOrchestrator {
    executor: Arc<dyn RemoteExecutor>,
    scripts: ScriptRenderer,
    timeouts: DeployTimeouts,
}

impl DeploymentOrchestrator {
    pub fn new(executor: Arc<dyn RemoteExecutor>, scripts: ScriptRenderer) -> Self {
        Self {
            executor,
            scripts,
            timeouts: DeployTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: DeployTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn scripts(&self) -> &ScriptRenderer {
        &self.scripts
    }

    /// Read the raw fingerprint of a target.
    async fn read_fingerprint(&self, target: &RemoteTarget) -> Result<Option<String>> {
        let output = self
            .executor
            .exec(target, &self.scripts.probe_script(), self.timeouts.probe)
            .await?;
        if !output.success() {
            return Err(Error::RemoteExecution(output.failure_message()));
        }
        let sources = FingerprintSources::parse_probe_output(&output.stdout);
        Ok((!sources.is_empty()).then(|| sources.raw()))
    }
}

/// Ship `script` base64-encoded through a temp file, run it with bash, then delete it.
pub fn wrap_for_transfer(script: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(script);
    format!(
        "tmp=$(mktemp /tmp/leasehold.XXXXXX) || exit 1\n\
         printf '%s' {} | base64 -d > \"$tmp\"\n\
         bash \"$tmp\"\nrc=$?\nrm -f \"$tmp\"\nexit $rc\n",
        shell_quote(&encoded)
    )
}

#[async_trait]
impl Deployer for DeploymentOrchestrator {
    async fn probe(&self, server: &Server) -> ProbeResult {
        let target = RemoteTarget::from(server);
        match self.read_fingerprint(&target).await {
            Ok(hardware_id) => ProbeResult {
                connected: true,
                hardware_id,
                error: None,
            },
            Err(e) => {
                warn!(server = %server.name, error = %e, "Connectivity probe failed");
                ProbeResult {
                    connected: false,
                    hardware_id: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn deploy(&self, server: &Server, license: &License) -> Result<DeployReport> {
        let target = RemoteTarget::from(server);

        let raw = match self.read_fingerprint(&target).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(DeployReport::failed("target exposes no hardware identifiers")),
            Err(e) => return Ok(DeployReport::failed(e.to_string())),
        };
        let observed = digest_raw(&raw, &license.hwid_salt);

        if let Some(bound) = &license.hardware_id
            && *bound != observed
        {
            warn!(
                license_id = %license.license_id,
                server = %server.name,
                expected = short_hwid(bound),
                received = short_hwid(&observed),
                "Target fingerprint does not match license, refusing to deploy"
            );
            return Err(Error::SecurityMismatch {
                license_id: license.license_id.clone(),
                expected: bound.clone(),
                received: observed,
            });
        }

        let command = wrap_for_transfer(&self.scripts.deploy_payload(license));
        let output = match self
            .executor
            .exec(&target, &command, self.timeouts.deploy)
            .await
        {
            Ok(output) => output,
            Err(e) => return Ok(DeployReport::failed(e.to_string())),
        };

        if !output.success() {
            warn!(license_id = %license.license_id, server = %server.name, "Deploy script failed");
            return Ok(DeployReport::failed(output.failure_message()));
        }

        info!(
            license_id = %license.license_id,
            server = %server.name,
            hwid = short_hwid(&observed),
            "Agent deployed"
        );
        Ok(DeployReport::ok(Some(observed)))
    }

    async fn undeploy(&self, server: &Server) -> Result<DeployReport> {
        let target = RemoteTarget::from(server);
        let command = wrap_for_transfer(&self.scripts.undeploy_script());
        match self
            .executor
            .exec(&target, &command, self.timeouts.undeploy)
            .await
        {
            Ok(output) if output.success() => {
                info!(server = %server.name, "Agent removed");
                Ok(DeployReport::ok(None))
            }
            Ok(output) => Ok(DeployReport::failed(output.failure_message())),
            Err(e) => Ok(DeployReport::failed(e.to_string())),
        }
    }
}
