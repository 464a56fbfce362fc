//! Typed validation of inbound records.
//!
//! Request types implement [`Validate`] and report the first offending field
//! as a [`FieldError`] instead of a free-text message.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub reason: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

impl std::error::Error for FieldError {}

/// Types that can check their own invariants before they reach a service.
pub trait Validate {
    fn validate(&self) -> Result<(), FieldError>;
}

/// Reject empty or whitespace-only strings.
pub fn require_non_empty(field: &'static str, value: &str) -> Result<(), FieldError> {
    if value.trim().is_empty() {
        return Err(FieldError::new(field, "must not be empty"));
    }
    Ok(())
}

/// Reject strings longer than `max` characters.
pub fn require_max_len(field: &'static str, value: &str, max: usize) -> Result<(), FieldError> {
    if value.chars().count() > max {
        return Err(FieldError::new(field, format!("must be at most {max} characters")));
    }
    Ok(())
}

/// Reject values below `min`.
pub fn require_at_least(field: &'static str, value: i64, min: i64) -> Result<(), FieldError> {
    if value < min {
        return Err(FieldError::new(field, format!("must be at least {min}")));
    }
    Ok(())
}

/// Identifiers travel through shell scripts and URLs; keep them boring.
pub fn require_identifier(field: &'static str, value: &str) -> Result<(), FieldError> {
    require_non_empty(field, value)?;
    require_max_len(field, value, 128)?;
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(FieldError::new(
            field,
            "may only contain ASCII letters, digits, '-', '_' and '.'",
        ));
    }
    Ok(())
}

/// A hashed hardware id is exactly 64 lowercase hex characters.
pub fn require_hwid(field: &'static str, value: &str) -> Result<(), FieldError> {
    if value.len() != 64 || !value.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')) {
        return Err(FieldError::new(field, "must be a 64-character lowercase hex digest"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_rules() {
        assert!(require_identifier("license_id", "LIC-9005").is_ok());
        assert!(require_identifier("license_id", "lic_1.2").is_ok());

        let err = require_identifier("license_id", "a b").unwrap_err();
        assert_eq!(err.field, "license_id");

        assert!(require_identifier("license_id", "$(reboot)").is_err());
        assert!(require_identifier("license_id", "   ").is_err());
    }

    #[test]
    fn test_hwid_rules() {
        assert!(require_hwid("hardware_id", &"a".repeat(64)).is_ok());
        assert!(require_hwid("hardware_id", &"A".repeat(64)).is_err());
        assert!(require_hwid("hardware_id", &"a".repeat(16)).is_err());
    }

    #[test]
    fn test_at_least() {
        assert!(require_at_least("days", 1, 1).is_ok());
        let err = require_at_least("days", 0, 1).unwrap_err();
        assert_eq!(err.to_string(), "days: must be at least 1");
    }
}
