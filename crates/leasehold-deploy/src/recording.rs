//! In-process executor that records commands instead of running them.

use crate::executor::{CommandOutput, RemoteExecutor, RemoteTarget};
use crate::scripts::PROBE_MARKER;
use async_trait::async_trait;
use base64::Engine;
use leasehold_core::fingerprint::{FingerprintSource, FingerprintSources};
use leasehold_core::{Error, Result};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct Behaviour {
    fingerprint: FingerprintSources,
    script_failure: Option<String>,
    unreachable: bool,
}

/// Answers probes with a configured fingerprint and every other command with success.
#[derive(Default)]
pub struct RecordingExecutor {
    behaviour: Mutex<Behaviour>,
    commands: Mutex<Vec<(RemoteTarget, String)>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fingerprint(self, sources: FingerprintSources) -> Self {
        self.set_fingerprint(sources);
        self
    }

    /// Simulate a hardware change on the target.
    pub fn set_fingerprint(&self, sources: FingerprintSources) {
        self.behaviour.lock().expect("recording lock poisoned").fingerprint = sources;
    }

    /// Make every non-probe command exit 1 with `stderr`.
    pub fn fail_scripts(&self, stderr: impl Into<String>) {
        self.behaviour.lock().expect("recording lock poisoned").script_failure = Some(stderr.into());
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.behaviour.lock().expect("recording lock poisoned").unreachable = unreachable;
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .expect("recording lock poisoned")
            .iter()
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn targets(&self) -> Vec<RemoteTarget> {
        self.commands
            .lock()
            .expect("recording lock poisoned")
            .iter()
            .map(|(t, _)| t.clone())
            .collect()
    }

    /// Recover the script shipped by `wrap_for_transfer`.
    pub fn decode_transfer(command: &str) -> Option<String> {
        let start = command.find("printf '%s' '")? + "printf '%s' '".len();
        let end = start + command[start..].find('\'')?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&command[start..end])
            .ok()?;
        String::from_utf8(bytes).ok()
    }

    fn probe_output(sources: &FingerprintSources) -> String {
        FingerprintSource::ALL
            .iter()
            .map(|s| format!("{}={}\n", s.key(), sources.get(*s)))
            .collect()
    }
}

#[async_trait]
impl RemoteExecutor for RecordingExecutor {
    async fn exec(
        &self,
        target: &RemoteTarget,
        command: &str,
        _timeout: Duration,
    ) -> Result<CommandOutput> {
        self.commands
            .lock()
            .expect("recording lock poisoned")
            .push((target.clone(), command.to_string()));

        let behaviour = self.behaviour.lock().expect("recording lock poisoned");
        if behaviour.unreachable {
            return Err(Error::RemoteExecution(format!("connect to {target}: refused")));
        }
        if command.starts_with(PROBE_MARKER) {
            return Ok(CommandOutput {
                exit_code: 0,
                stdout: Self::probe_output(&behaviour.fingerprint),
                stderr: String::new(),
            });
        }
        Ok(match &behaviour.script_failure {
            Some(stderr) => CommandOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: stderr.clone(),
            },
            None => CommandOutput::default(),
        })
    }
}
