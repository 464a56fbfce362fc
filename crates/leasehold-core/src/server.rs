//! Deployment targets.

use crate::ids::ServerId;
use crate::validation::{
    FieldError, Validate, require_at_least, require_max_len, require_non_empty,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const PASSWORD_MASK: &str = "********";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: ServerId,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub is_connected: bool,
    pub last_checked: Option<DateTime<Utc>>,
    /// Raw, unsalted fingerprint seen by the last connectivity probe.
    pub hardware_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewServer {
    pub name: String,
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
}

fn default_ssh_port() -> u16 {
    22
}

impl Validate for NewServer {
    fn validate(&self) -> Result<(), FieldError> {
        require_non_empty("name", &self.name)?;
        require_max_len("name", &self.name, 256)?;
        require_non_empty("host", &self.host)?;
        require_max_len("host", &self.host, 253)?;
        require_at_least("port", self.port.into(), 1)?;
        require_non_empty("username", &self.username)?;
        require_non_empty("password", &self.password)?;
        Ok(())
    }
}

/// Partial server update. A masked or empty password keeps the stored one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerUpdate {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ServerUpdate {
    pub fn apply(&self, server: &mut Server) {
        if let Some(name) = &self.name {
            server.name = name.clone();
        }
        if let Some(host) = &self.host {
            server.host = host.clone();
        }
        if let Some(port) = self.port {
            server.port = port;
        }
        if let Some(username) = &self.username {
            server.username = username.clone();
        }
        if let Some(password) = &self.password
            && !password.is_empty()
            && password != PASSWORD_MASK
        {
            server.password = password.clone();
        }
    }
}

impl Validate for ServerUpdate {
    fn validate(&self) -> Result<(), FieldError> {
        if let Some(name) = &self.name {
            require_non_empty("name", name)?;
        }
        if let Some(host) = &self.host {
            require_non_empty("host", host)?;
        }
        if let Some(port) = self.port {
            require_at_least("port", port.into(), 1)?;
        }
        if let Some(username) = &self.username {
            require_non_empty("username", username)?;
        }
        Ok(())
    }
}
