//! Server configuration.
//!
//! Layers, lowest first: built-in defaults, an optional YAML file
//! (`leasehold.yaml` or `--config`), then `LEASEHOLD__*` environment
//! variables, e.g. `LEASEHOLD__HEARTBEAT__THRESHOLD_SECS=3600`.

use anyhow::{Context, bail};
use config::{Config, Environment, File};
use leasehold_core::codec::DEFAULT_KEY_PREFIX;
use leasehold_deploy::scripts::{DEFAULT_AGENT_PORT, DEFAULT_INSTALL_DIR};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "leasehold.yaml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecConfig {
    pub key_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub port: u16,
    pub install_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub period_secs: u64,
    pub threshold_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    pub ttl_secs: u64,
    pub sweep_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    pub probe_timeout_secs: u64,
    pub deploy_timeout_secs: u64,
    pub undeploy_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: String,
    /// Base URL targets use to reach this server.
    pub public_url: String,
    /// PostgreSQL URL. Absent means the in-memory store.
    pub database_url: Option<String>,
    pub admin_token: String,
    pub log: LogConfig,
    pub codec: CodecConfig,
    pub agent: AgentConfig,
    pub heartbeat: HeartbeatConfig,
    pub exchange: ExchangeConfig,
    pub ssh: SshConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            public_url: "http://localhost:8080".to_string(),
            database_url: None,
            admin_token: String::new(),
            log: LogConfig {
                format: LogFormat::Text,
            },
            codec: CodecConfig {
                key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            },
            agent: AgentConfig {
                port: DEFAULT_AGENT_PORT,
                install_dir: DEFAULT_INSTALL_DIR.to_string(),
            },
            heartbeat: HeartbeatConfig {
                period_secs: 30 * 60,
                threshold_secs: 12 * 3600,
            },
            exchange: ExchangeConfig {
                ttl_secs: 30,
                sweep_secs: 5,
            },
            ssh: SshConfig {
                probe_timeout_secs: 15,
                deploy_timeout_secs: 120,
                undeploy_timeout_secs: 60,
            },
        }
    }
}

impl ServerConfig {
    /// Load and validate. An explicit `path` must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config: ServerConfig = Config::builder()
            .add_source(Config::try_from(&ServerConfig::default())?)
            .add_source(file)
            .add_source(
                Environment::with_prefix("LEASEHOLD")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.admin_token.trim().is_empty() {
            bail!("admin_token must be set (LEASEHOLD__ADMIN_TOKEN)");
        }
        let url = url::Url::parse(&self.public_url)
            .with_context(|| format!("public_url '{}' is not a URL", self.public_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("public_url must use http or https");
        }
        if self.codec.key_prefix.is_empty() {
            bail!("codec.key_prefix must not be empty");
        }
        if self.heartbeat.period_secs == 0 || self.exchange.sweep_secs == 0 {
            bail!("heartbeat.period_secs and exchange.sweep_secs must be positive");
        }
        Ok(())
    }

    /// `public_url` without a trailing slash.
    pub fn public_url(&self) -> &str {
        self.public_url.trim_end_matches('/')
    }

    pub fn heartbeat_period(&self) -> Duration {
        Duration::from_secs(self.heartbeat.period_secs)
    }

    pub fn heartbeat_threshold(&self) -> Duration {
        Duration::from_secs(self.heartbeat.threshold_secs)
    }

    pub fn exchange_ttl(&self) -> Duration {
        Duration::from_secs(self.exchange.ttl_secs)
    }

    pub fn exchange_sweep(&self) -> Duration {
        Duration::from_secs(self.exchange.sweep_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn valid() -> ServerConfig {
        ServerConfig {
            admin_token: "s3cret".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.agent.port, 4000);
        assert_eq!(config.heartbeat_threshold(), Duration::from_secs(43_200));
        assert_eq!(config.exchange_ttl(), Duration::from_secs(30));
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());
        assert!(ServerConfig::default().validate().is_err());

        let mut bad_url = valid();
        bad_url.public_url = "ftp://example.com".to_string();
        assert!(bad_url.validate().is_err());
    }

    #[test]
    fn test_public_url_trims_slash() {
        let mut config = valid();
        config.public_url = "https://licenses.example.com/".to_string();
        assert_eq!(config.public_url(), "https://licenses.example.com");
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        assert!(ServerConfig::load(Some(Path::new("/nonexistent/leasehold.yaml"))).is_err());
    }
}
