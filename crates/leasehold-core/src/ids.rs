//! Strongly-typed identifiers for persisted records.
//!
//! The admin-chosen license name (`License::license_id`) is a plain string;
//! these ids identify rows.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                let uuid_str = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(uuid_str)?))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

define_id!(LicenseRecordId, "lic");
define_id!(ServerId, "srv");
define_id!(PatchTokenId, "pat");
define_id!(ActivityLogId, "log");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_id_display() {
        let id = ServerId::new();
        assert!(id.to_string().starts_with("srv_"));
    }

    #[test]
    fn test_license_record_id_parse() {
        let id = LicenseRecordId::new();
        let parsed: LicenseRecordId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);

        // Bare UUIDs are accepted too.
        let bare: LicenseRecordId = id.as_uuid().to_string().parse().unwrap();
        assert_eq!(id, bare);
    }

    #[test]
    fn test_serde_uses_prefixed_form() {
        let id = ServerId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let back: ServerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        let bare: ServerId = serde_json::from_str(&format!("\"{}\"", id.as_uuid())).unwrap();
        assert_eq!(bare, id);
    }
}
