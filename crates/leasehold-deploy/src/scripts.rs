//! Scripts and systemd units shipped to targets.
//!
//! Everything is rendered from [`ScriptRenderer`], and every fingerprint
//! computation embeds the shared snippets from `leasehold_core::fingerprint`.
//! All steps are idempotent so a deploy can be re-run safely.

use leasehold_core::fingerprint::{RAW_VAR, shell_digest_snippet, shell_probe_script, shell_raw_snippet};
use leasehold_core::license::License;

pub const DEFAULT_INSTALL_DIR: &str = "/opt/leasehold";
pub const DEFAULT_AGENT_PORT: u16 = 4000;
pub const UNIT_DIR: &str = "/etc/systemd/system";

pub const AGENT_UNIT: &str = "leasehold-agent.service";
pub const VERIFY_SERVICE: &str = "leasehold-verify.service";
pub const VERIFY_TIMER: &str = "leasehold-verify.timer";
pub const WATCHDOG_SERVICE: &str = "leasehold-watchdog.service";
pub const WATCHDOG_TIMER: &str = "leasehold-watchdog.timer";

/// Unit and agent path from the 0.x layout, removed on every deploy.
const LEGACY_UNIT: &str = "leasehold.service";
const LEGACY_AGENT: &str = "bin/agent.py";

/// First line of the probe script; lets test executors recognise it.
pub const PROBE_MARKER: &str = "# leasehold:probe";

/// Written under the install dir by the verifier when the server rejects this host.
/// While present the agent stays disabled and the watchdog leaves it alone.
pub const REVOKED_MARKER: &str = "revoked";
/// Server response from a failed standalone install.
pub const PROVISION_ERROR_FILE: &str = "provision-error";

const AGENT_TEMPLATE: &str = include_str!("../templates/agent.py");

/// Quote `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn py_literal(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Renders every artifact for one Leasehold installation.
#[derive(Debug, Clone)]
pub struct ScriptRenderer {
    pub install_dir: String,
    pub agent_port: u16,
    /// Base URL targets use to reach this server, without trailing slash.
    pub public_url: String,
    pub key_prefix: String,
}

impl ScriptRenderer {
    pub fn new(public_url: impl Into<String>, key_prefix: impl Into<String>) -> Self {
        Self {
            install_dir: DEFAULT_INSTALL_DIR.to_string(),
            agent_port: DEFAULT_AGENT_PORT,
            public_url: public_url.into().trim_end_matches('/').to_string(),
            key_prefix: key_prefix.into(),
        }
    }

    pub fn with_install_dir(mut self, dir: impl Into<String>) -> Self {
        self.install_dir = dir.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_agent_port(mut self, port: u16) -> Self {
        self.agent_port = port;
        self
    }

    /// The python3 agent that serves the encoded payload for `license_id`.
    pub fn agent_script(&self, license_id: &str) -> String {
        AGENT_TEMPLATE
            .replace("__LICENSE_ID__", &py_literal(license_id))
            .replace("__API_URL__", &py_literal(&self.public_url))
            .replace("__KEY_PREFIX__", &py_literal(&self.key_prefix))
            .replace("__PORT__", &self.agent_port.to_string())
            .replace(
                "__CACHE_PATH__",
                &py_literal(&format!("{}/license.cache", self.install_dir)),
            )
    }

    /// Periodic check that this host still matches the license.
    ///
    /// A 4xx answer or `valid:false` revokes the host: the marker is written,
    /// the cached payload is dropped and the agent is disabled. A later
    /// `valid:true` lifts the revocation. Network failures and 5xx answers
    /// change nothing.
    pub fn verifier_script(&self, license: &License) -> String {
        let mut s = String::from("#!/bin/sh\n# Leasehold license verifier\nset -u\n");
        s.push_str(&format!("DIR={}\n", shell_quote(&self.install_dir)));
        s.push_str(&format!("LH_LICENSE_ID={}\n", shell_quote(&license.license_id)));
        s.push_str(&format!("LH_SALT={}\n", shell_quote(&license.hwid_salt)));
        s.push_str(&format!("LH_API={}\n", shell_quote(&self.public_url)));
        s.push_str(&shell_digest_snippet("\"$LH_SALT\"", "LH_HWID"));
        s.push_str(&format!(
            r#"body=$(printf '{{"license_id":"%s","hardware_id":"%s"}}' "$LH_LICENSE_ID" "$LH_HWID")
code=$(curl -sS -m 30 -o "$DIR/verify.last" -w '%{{http_code}}' -H 'Content-Type: application/json' -d "$body" "$LH_API/api/verify") || exit 0
case "$code" in
  2??)
    if grep -q '"valid":true' "$DIR/verify.last"; then
      if [ -f "$DIR/{REVOKED_MARKER}" ]; then
        rm -f "$DIR/{REVOKED_MARKER}"
        systemctl enable --now {AGENT_UNIT}
      fi
      exit 0
    fi
    ;;
  4??) ;;
  *) exit 0 ;;
esac
logger -t leasehold "license $LH_LICENSE_ID failed verification, disabling agent" 2>/dev/null || true
cp "$DIR/verify.last" "$DIR/{REVOKED_MARKER}"
rm -f "$DIR/license.cache"
systemctl disable --now {AGENT_UNIT}
"#
        ));
        s
    }

    /// Restores missing agent files and restarts a dead agent, unless the
    /// verifier revoked this host. Disables itself once the product is uninstalled.
    pub fn watchdog_script(&self) -> String {
        let dir = shell_quote(&self.install_dir);
        format!(
            r#"#!/bin/sh
# Leasehold watchdog
DIR={dir}
if [ ! -d "$DIR" ]; then
  systemctl disable --now {WATCHDOG_TIMER} 2>/dev/null || true
  exit 0
fi
if [ ! -f "$DIR/agent.py" ] && [ -f "$DIR/pristine/agent.py" ]; then
  cp "$DIR/pristine/agent.py" "$DIR/agent.py"
  chmod 0755 "$DIR/agent.py"
fi
if [ ! -f {UNIT_DIR}/{AGENT_UNIT} ] && [ -f "$DIR/pristine/{AGENT_UNIT}" ]; then
  cp "$DIR/pristine/{AGENT_UNIT}" {UNIT_DIR}/{AGENT_UNIT}
  systemctl daemon-reload
fi
if [ -f "$DIR/{REVOKED_MARKER}" ]; then
  exit 0
fi
systemctl is-enabled --quiet {AGENT_UNIT} || systemctl enable {AGENT_UNIT}
systemctl is-active --quiet {AGENT_UNIT} || systemctl restart {AGENT_UNIT}
"#
        )
    }

    pub fn agent_unit(&self) -> String {
        format!(
            "[Unit]\nDescription=Leasehold license agent\nAfter=network-online.target\n\n\
             [Service]\nExecStart=/usr/bin/python3 {dir}/agent.py\nRestart=always\nRestartSec=5\n\n\
             [Install]\nWantedBy=multi-user.target\n",
            dir = self.install_dir
        )
    }

    /// `(file name, contents)` for every unit, agent first.
    pub fn units(&self) -> Vec<(&'static str, String)> {
        let dir = &self.install_dir;
        vec![
            (AGENT_UNIT, self.agent_unit()),
            (
                VERIFY_SERVICE,
                format!(
                    "[Unit]\nDescription=Leasehold license verification\n\n\
                     [Service]\nType=oneshot\nExecStart=/bin/sh {dir}/verify.sh\n"
                ),
            ),
            (
                VERIFY_TIMER,
                "[Unit]\nDescription=Run Leasehold license verification every 6 hours\n\n\
                 [Timer]\nOnBootSec=5min\nOnUnitActiveSec=6h\n\n\
                 [Install]\nWantedBy=timers.target\n"
                    .to_string(),
            ),
            (
                WATCHDOG_SERVICE,
                format!(
                    "[Unit]\nDescription=Leasehold agent watchdog\n\n\
                     [Service]\nType=oneshot\nExecStart=/bin/sh {dir}/watchdog.sh\n"
                ),
            ),
            (
                WATCHDOG_TIMER,
                "[Unit]\nDescription=Run the Leasehold agent watchdog every 5 minutes\n\n\
                 [Timer]\nOnBootSec=2min\nOnUnitActiveSec=5min\n\n\
                 [Install]\nWantedBy=timers.target\n"
                    .to_string(),
            ),
        ]
    }

    /// Prints one `key=value` line per fingerprint source.
    pub fn probe_script(&self) -> String {
        format!("{PROBE_MARKER}\n{}", shell_probe_script())
    }

    /// Full deploy payload for `license`, executed as one bash script on the target.
    pub fn deploy_payload(&self, license: &License) -> String {
        let mut s = String::from("#!/bin/bash\n# Leasehold deploy\nset -euo pipefail\n");
        s.push_str(&self.dirs());
        s.push_str(&self.stop_previous());
        s.push_str(&self.remove_legacy());
        s.push_str("mkdir -p \"$DIR/pristine\"\n");
        write_file(&mut s, "$DIR/agent.py", &self.agent_script(&license.license_id), "0755");
        write_file(&mut s, "$DIR/verify.sh", &self.verifier_script(license), "0755");
        s.push_str(&self.install_static_files());
        s.push_str(&self.enable_all());
        s
    }

    /// Stops and removes every Leasehold artifact.
    pub fn undeploy_script(&self) -> String {
        let mut s = String::from("#!/bin/bash\n# Leasehold undeploy\nset -uo pipefail\n");
        s.push_str(&self.dirs());
        s.push_str(&format!(
            "systemctl disable --now {WATCHDOG_TIMER} {VERIFY_TIMER} {AGENT_UNIT} 2>/dev/null || true\n\
             systemctl stop {WATCHDOG_SERVICE} {VERIFY_SERVICE} 2>/dev/null || true\n"
        ));
        for (name, _) in self.units() {
            s.push_str(&format!("rm -f \"$UNIT_DIR/{name}\"\n"));
        }
        s.push_str(&format!("rm -f \"$UNIT_DIR/{LEGACY_UNIT}\"\n"));
        s.push_str("rm -rf \"$DIR\"\nsystemctl daemon-reload\necho undeployed\n");
        s
    }

    /// Standalone installer: provisions `license` from the target itself.
    pub fn install_script(&self, license: &License) -> String {
        let mut s = String::from("#!/bin/bash\n# Leasehold installer\nset -euo pipefail\n");
        s.push_str("[ \"$(id -u)\" -eq 0 ] || { echo 'run as root' >&2; exit 1; }\n");
        s.push_str(
            "for bin in curl python3 sha256sum systemctl; do\n  \
             command -v \"$bin\" >/dev/null 2>&1 || { echo \"missing $bin\" >&2; exit 1; }\ndone\n",
        );
        s.push_str(&self.dirs());
        s.push_str(&format!("LH_LICENSE_ID={}\n", shell_quote(&license.license_id)));
        s.push_str(&format!("LH_SALT={}\n", shell_quote(&license.hwid_salt)));
        s.push_str(&format!("LH_API={}\n", shell_quote(&self.public_url)));
        s.push_str(&shell_digest_snippet("\"$LH_SALT\"", "LH_HWID"));
        // A rejected provision leaves any running agent untouched.
        s.push_str(&format!(
            r#"body=$(printf '{{"license_id":"%s","hardware_id":"%s"}}' "$LH_LICENSE_ID" "$LH_HWID")
response=$(curl -sS -m 60 -H 'Content-Type: application/json' -d "$body" "$LH_API/api/provision")
if ! printf '%s' "$response" | python3 -c 'import json, sys; sys.exit("scripts" not in json.load(sys.stdin))' 2>/dev/null; then
  mkdir -p "$DIR"
  printf '%s\n' "$response" > "$DIR/{PROVISION_ERROR_FILE}"
  echo "provisioning failed: $response" >&2
  exit 1
fi
rm -f "$DIR/{PROVISION_ERROR_FILE}"
"#
        ));
        s.push_str(&self.stop_previous());
        s.push_str(&self.remove_legacy());
        s.push_str("mkdir -p \"$DIR/pristine\"\n");
        s.push_str(
            r#"printf '%s' "$response" | python3 -c '
import json, os, sys
resp = json.load(sys.stdin)
for name, key in (("agent.py", "agent"), ("verify.sh", "verify")):
    path = os.path.join(sys.argv[1], name)
    with open(path, "w") as fh:
        fh.write(resp["scripts"][key])
    os.chmod(path, 0o755)
' "$DIR"
"#,
        );
        s.push_str(&self.install_static_files());
        s.push_str(&self.enable_all());
        s.push_str("echo \"license $LH_LICENSE_ID installed\"\n");
        s
    }

    /// Onboarding script for a pending patch token. Contains no secret but the token.
    pub fn patch_run_script(&self, token: &str) -> String {
        let mut s = String::from("#!/bin/sh\n# Leasehold host registration\nset -u\n");
        s.push_str(&format!("LH_TOKEN={}\n", shell_quote(token)));
        s.push_str(&format!("LH_API={}\n", shell_quote(&self.public_url)));
        s.push_str(&shell_raw_snippet());
        s.push_str(&format!(
            r#"lh_host=$(hostname 2>/dev/null || echo unknown)
lh_ip=$(hostname -I 2>/dev/null | awk '{{print $1}}')
curl -sS -G -m 30 \
  --data-urlencode "token=$LH_TOKEN" \
  --data-urlencode "raw_hwid=${{{RAW_VAR}}}" \
  --data-urlencode "hostname=$lh_host" \
  --data-urlencode "ip=$lh_ip" \
  "$LH_API/api/patch-activate"
echo
"#
        ));
        s
    }

    /// Script returned for an unknown or spent token.
    pub fn patch_error_script(message: &str) -> String {
        format!(
            "#!/bin/sh\necho {} >&2\nexit 1\n",
            shell_quote(&format!("leasehold: {message}"))
        )
    }

    fn dirs(&self) -> String {
        format!("DIR={}\nUNIT_DIR={UNIT_DIR}\n", shell_quote(&self.install_dir))
    }

    fn stop_previous(&self) -> String {
        // Only processes running our agent are killed.
        format!(
            r#"systemctl stop {AGENT_UNIT} {VERIFY_TIMER} {WATCHDOG_TIMER} 2>/dev/null || true
if command -v fuser >/dev/null 2>&1; then
  for pid in $(fuser {port}/tcp 2>/dev/null); do
    if grep -q "$DIR/agent.py" "/proc/$pid/cmdline" 2>/dev/null; then kill "$pid" || true; fi
  done
fi
"#,
            port = self.agent_port
        )
    }

    fn remove_legacy(&self) -> String {
        format!(
            "systemctl disable --now {LEGACY_UNIT} 2>/dev/null || true\n\
             rm -f \"$UNIT_DIR/{LEGACY_UNIT}\" \"$DIR/{LEGACY_AGENT}\"\n\
             rmdir \"$DIR/bin\" 2>/dev/null || true\n"
        )
    }

    fn install_static_files(&self) -> String {
        let mut s = String::new();
        write_file(&mut s, "$DIR/watchdog.sh", &self.watchdog_script(), "0755");
        s.push_str("cp \"$DIR/agent.py\" \"$DIR/pristine/agent.py\"\n");
        for (name, contents) in self.units() {
            write_file(&mut s, &format!("$UNIT_DIR/{name}"), &contents, "0644");
        }
        write_file(&mut s, &format!("$DIR/pristine/{AGENT_UNIT}"), &self.agent_unit(), "0644");
        s
    }

    fn enable_all(&self) -> String {
        format!(
            "rm -f \"$DIR/{REVOKED_MARKER}\"\n\
             systemctl daemon-reload\n\
             systemctl enable --now {AGENT_UNIT}\n\
             systemctl restart {AGENT_UNIT}\n\
             systemctl enable --now {VERIFY_TIMER} {WATCHDOG_TIMER}\n"
        )
    }
}

/// Append a heredoc writing `contents` to `path` (a shell word, variables allowed).
fn write_file(out: &mut String, path: &str, contents: &str, mode: &str) {
    out.push_str(&format!("cat > \"{path}\" <<'LEASEHOLD_EOF'\n"));
    out.push_str(contents);
    if !contents.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&format!("LEASEHOLD_EOF\nchmod {mode} \"{path}\"\n"));
}
