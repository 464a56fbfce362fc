//! Hardware fingerprinting.
//!
//! A fingerprint is built from seven machine identifiers, joined with `:` in a
//! fixed order (the *raw* fingerprint), then salted per license and hashed:
//!
//! ```text
//! hwid = hex(sha256(machine_id:product_uuid:primary_mac:board_serial:chassis_serial:disk_serial:cpu_serial:salt))
//! ```
//!
//! The same table drives the Rust implementation and the POSIX shell snippets
//! embedded in every script shipped to a target, so both sides always agree.
//! Hardware ids are always the full 64 hex characters; [`short_hwid`] exists
//! for display only.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Separator between sources, and between the raw fingerprint and the salt.
pub const SEPARATOR: char = ':';

/// Shell variable holding the raw fingerprint after [`shell_raw_snippet`] runs.
pub const RAW_VAR: &str = "LH_RAW_HWID";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FingerprintSource {
    MachineId,
    ProductUuid,
    PrimaryMac,
    BoardSerial,
    ChassisSerial,
    DiskSerial,
    CpuSerial,
}

impl FingerprintSource {
    /// Canonical order. Changing it changes every hardware id.
    pub const ALL: [FingerprintSource; 7] = [
        FingerprintSource::MachineId,
        FingerprintSource::ProductUuid,
        FingerprintSource::PrimaryMac,
        FingerprintSource::BoardSerial,
        FingerprintSource::ChassisSerial,
        FingerprintSource::DiskSerial,
        FingerprintSource::CpuSerial,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            FingerprintSource::MachineId => "machine_id",
            FingerprintSource::ProductUuid => "product_uuid",
            FingerprintSource::PrimaryMac => "primary_mac",
            FingerprintSource::BoardSerial => "board_serial",
            FingerprintSource::ChassisSerial => "chassis_serial",
            FingerprintSource::DiskSerial => "disk_serial",
            FingerprintSource::CpuSerial => "cpu_serial",
        }
    }

    /// Shell pipeline printing this source on a Linux host. Missing data prints nothing.
    pub fn shell_probe(&self) -> &'static str {
        match self {
            FingerprintSource::MachineId => "cat /etc/machine-id",
            FingerprintSource::ProductUuid => "cat /sys/class/dmi/id/product_uuid",
            FingerprintSource::PrimaryMac => {
                "ip link show | awk '/link\\/ether/ {print $2; exit}'"
            }
            FingerprintSource::BoardSerial => "cat /sys/class/dmi/id/board_serial",
            FingerprintSource::ChassisSerial => "cat /sys/class/dmi/id/chassis_serial",
            FingerprintSource::DiskSerial => "lsblk -dno SERIAL | awk 'NF {print; exit}'",
            FingerprintSource::CpuSerial => "awk -F': ' '/^Serial/ {print $2; exit}' /proc/cpuinfo",
        }
    }

    fn shell_var(&self) -> String {
        format!("lh_{}", self.key())
    }

    fn index(&self) -> usize {
        Self::ALL
            .iter()
            .position(|s| s == self)
            .unwrap_or_default()
    }
}

/// Observed values for every source. Unset sources are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FingerprintSources {
    values: [String; 7],
}

impl FingerprintSources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a source. Whitespace is stripped, matching `tr -d '[:space:]'` on the target.
    pub fn with(mut self, source: FingerprintSource, value: impl AsRef<str>) -> Self {
        self.set(source, value);
        self
    }

    pub fn set(&mut self, source: FingerprintSource, value: impl AsRef<str>) {
        self.values[source.index()] = value.as_ref().split_whitespace().collect();
    }

    pub fn get(&self, source: FingerprintSource) -> &str {
        &self.values[source.index()]
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(String::is_empty)
    }

    /// The unsalted fingerprint: all sources joined with `:`.
    pub fn raw(&self) -> String {
        self.values.join(&SEPARATOR.to_string())
    }

    /// Parse `key=value` lines printed by [`shell_probe_script`]. Unknown keys are ignored.
    pub fn parse_probe_output(text: &str) -> Self {
        let mut sources = Self::new();
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            if let Some(source) = FingerprintSource::ALL.iter().find(|s| s.key() == key.trim()) {
                sources.set(*source, value);
            }
        }
        sources
    }
}

/// Salted hardware id from individual sources.
pub fn compute(sources: &FingerprintSources, salt: &str) -> String {
    digest_raw(&sources.raw(), salt)
}

/// Salted hardware id from a stored raw fingerprint.
pub fn digest_raw(raw: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hasher.update([SEPARATOR as u8]);
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// Prefix used when a hardware id is shown in logs or the audit trail.
pub fn short_hwid(hwid: &str) -> &str {
    match hwid.char_indices().nth(16) {
        Some((idx, _)) => &hwid[..idx],
        None => hwid,
    }
}

/// Fresh per-license salt: 16 random bytes, hex encoded.
pub fn generate_salt() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// POSIX shell that collects every source and sets [`RAW_VAR`].
pub fn shell_raw_snippet() -> String {
    let mut out: String = FingerprintSource::ALL
        .iter()
        .map(|source| {
            format!(
                "{}=$( ({}) 2>/dev/null | tr -d '[:space:]' || true)\n",
                source.shell_var(),
                source.shell_probe()
            )
        })
        .collect();
    let joined: Vec<String> = FingerprintSource::ALL
        .iter()
        .map(|s| format!("${{{}}}", s.shell_var()))
        .collect();
    out.push_str(&format!(
        "{}=\"{}\"\n",
        RAW_VAR,
        joined.join(&SEPARATOR.to_string())
    ));
    out
}

/// POSIX shell that sets `out_var` to the salted digest.
///
/// `salt_expr` is a shell expression such as `"$LH_SALT"`; it is substituted verbatim.
pub fn shell_digest_snippet(salt_expr: &str, out_var: &str) -> String {
    format!(
        "{raw}{out_var}=$(printf '%s' \"${{{RAW_VAR}}}{SEPARATOR}\"{salt_expr} | sha256sum | awk '{{print $1}}')\n",
        raw = shell_raw_snippet(),
    )
}

/// Script printing one `key=value` line per source, for connectivity probes.
pub fn shell_probe_script() -> String {
    let mut out = shell_raw_snippet();
    for source in FingerprintSource::ALL {
        out.push_str(&format!(
            "printf '%s=%s\\n' '{}' \"${}\"\n",
            source.key(),
            source.shell_var()
        ));
    }
    out
}
