//! Enforcement backends, tried in priority order: ufw, iptables, htaccess,
//! then database-only bookkeeping. Presence is probed with `which`; the
//! database backend is always present so a block decision always lands
//! somewhere.

use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info, warn};

use crate::config::EnforcementConfig;
use crate::models::EnforcementMethod;

/// One way of keeping an address out.
pub trait EnforcementBackend: Send + Sync {
    fn method(&self) -> EnforcementMethod;

    /// Whether the backing tool exists on this host.
    fn is_available(&self) -> bool;

    /// Apply a block. Idempotent: blocking an already-blocked address
    /// succeeds.
    fn apply(&self, address: IpAddr) -> std::io::Result<()>;

    /// Remove a block. Idempotent: removing an absent rule succeeds.
    fn remove(&self, address: IpAddr) -> std::io::Result<()>;
}

fn tool_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

// ==================== ufw ====================

pub struct UfwBackend;

impl EnforcementBackend for UfwBackend {
    fn method(&self) -> EnforcementMethod {
        EnforcementMethod::Ufw
    }

    fn is_available(&self) -> bool {
        tool_exists("ufw")
    }

    fn apply(&self, address: IpAddr) -> std::io::Result<()> {
        let output = Command::new("ufw")
            .args(["insert", "1", "deny", "from", &address.to_string()])
            .output()?;
        if output.status.success() {
            info!("ufw: denied {}", address);
            Ok(())
        } else {
            Err(std::io::Error::other(format!(
                "ufw deny failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    fn remove(&self, address: IpAddr) -> std::io::Result<()> {
        // "delete" of a missing rule exits nonzero; treat that as success
        let output = Command::new("ufw")
            .args(["delete", "deny", "from", &address.to_string()])
            .output()?;
        if !output.status.success() {
            debug!("ufw delete for {} was a no-op", address);
        }
        Ok(())
    }
}

// ==================== iptables ====================

pub struct IptablesBackend;

impl EnforcementBackend for IptablesBackend {
    fn method(&self) -> EnforcementMethod {
        EnforcementMethod::Iptables
    }

    fn is_available(&self) -> bool {
        tool_exists("iptables")
    }

    fn apply(&self, address: IpAddr) -> std::io::Result<()> {
        let ip = address.to_string();

        // -C checks for an existing rule so repeat blocks never stack
        let exists = Command::new("iptables")
            .args(["-C", "INPUT", "-s", &ip, "-j", "DROP"])
            .output()?
            .status
            .success();
        if exists {
            debug!("iptables: {} already dropped", ip);
            return Ok(());
        }

        let output = Command::new("iptables")
            .args(["-A", "INPUT", "-s", &ip, "-j", "DROP"])
            .output()?;
        if output.status.success() {
            info!("iptables: dropping {}", ip);
            Ok(())
        } else {
            Err(std::io::Error::other(format!(
                "iptables append failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    fn remove(&self, address: IpAddr) -> std::io::Result<()> {
        let ip = address.to_string();
        let output = Command::new("iptables")
            .args(["-D", "INPUT", "-s", &ip, "-j", "DROP"])
            .output()?;
        if !output.status.success() {
            debug!("iptables delete for {} was a no-op", ip);
        }
        Ok(())
    }
}

// ==================== .htaccess ====================

/// Rewrites a managed section of an Apache .htaccess file with
/// `Deny from <ip>` lines.
pub struct HtaccessBackend {
    path: PathBuf,
}

const SECTION_START: &str = "# BEGIN logwarden";
const SECTION_END: &str = "# END logwarden";

impl HtaccessBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_denied(&self) -> std::io::Result<Vec<String>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };

        let mut denied = Vec::new();
        let mut inside = false;
        for line in content.lines() {
            if line.trim() == SECTION_START {
                inside = true;
            } else if line.trim() == SECTION_END {
                inside = false;
            } else if inside {
                if let Some(ip) = line.trim().strip_prefix("Deny from ") {
                    denied.push(ip.to_string());
                }
            }
        }
        Ok(denied)
    }

    fn write_denied(&self, denied: &[String]) -> std::io::Result<()> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e),
        };

        // Everything outside the managed section is preserved verbatim
        let mut kept = Vec::new();
        let mut inside = false;
        for line in content.lines() {
            if line.trim() == SECTION_START {
                inside = true;
            } else if line.trim() == SECTION_END {
                inside = false;
            } else if !inside {
                kept.push(line.to_string());
            }
        }

        let mut out = kept.join("\n");
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        if !denied.is_empty() {
            out.push_str(SECTION_START);
            out.push('\n');
            for ip in denied {
                out.push_str(&format!("Deny from {}\n", ip));
            }
            out.push_str(SECTION_END);
            out.push('\n');
        }

        fs::write(&self.path, out)
    }
}

impl EnforcementBackend for HtaccessBackend {
    fn method(&self) -> EnforcementMethod {
        EnforcementMethod::Htaccess
    }

    fn is_available(&self) -> bool {
        self.path
            .parent()
            .map(|p| p.is_dir())
            .unwrap_or(false)
    }

    fn apply(&self, address: IpAddr) -> std::io::Result<()> {
        let mut denied = self.read_denied()?;
        let ip = address.to_string();
        if !denied.contains(&ip) {
            denied.push(ip);
            self.write_denied(&denied)?;
        }
        Ok(())
    }

    fn remove(&self, address: IpAddr) -> std::io::Result<()> {
        let mut denied = self.read_denied()?;
        let ip = address.to_string();
        let before = denied.len();
        denied.retain(|d| d != &ip);
        if denied.len() != before {
            self.write_denied(&denied)?;
        }
        Ok(())
    }
}

// ==================== database ====================

/// Bookkeeping-only backend. The registry row is the block; nothing to do
/// here, so it always succeeds.
pub struct DatabaseBackend;

impl EnforcementBackend for DatabaseBackend {
    fn method(&self) -> EnforcementMethod {
        EnforcementMethod::Database
    }

    fn is_available(&self) -> bool {
        true
    }

    fn apply(&self, address: IpAddr) -> std::io::Result<()> {
        debug!("database-only block for {}", address);
        Ok(())
    }

    fn remove(&self, _address: IpAddr) -> std::io::Result<()> {
        Ok(())
    }
}

// ==================== chain ====================

/// The priority-ordered backends for this host.
pub struct BackendChain {
    backends: Vec<Box<dyn EnforcementBackend>>,
}

impl BackendChain {
    /// Full chain in priority order: ufw, iptables, htaccess, database.
    pub fn from_config(config: &EnforcementConfig) -> Self {
        Self {
            backends: vec![
                Box::new(UfwBackend),
                Box::new(IptablesBackend),
                Box::new(HtaccessBackend::new(&config.htaccess_path)),
                Box::new(DatabaseBackend),
            ],
        }
    }

    /// Custom chain (used by tests).
    pub fn new(backends: Vec<Box<dyn EnforcementBackend>>) -> Self {
        Self { backends }
    }

    /// Apply a block through the first available backend that succeeds,
    /// returning which one took it. Cannot fail: the database backend is
    /// always available and always succeeds.
    pub fn apply(&self, address: IpAddr) -> EnforcementMethod {
        for backend in &self.backends {
            if !backend.is_available() {
                continue;
            }
            match backend.apply(address) {
                Ok(()) => return backend.method(),
                Err(e) => {
                    warn!(
                        "Backend {} failed to block {}: {}",
                        backend.method(),
                        address,
                        e
                    );
                }
            }
        }
        // Unreachable with a DatabaseBackend in the chain, but keep the
        // chain total anyway
        EnforcementMethod::Database
    }

    /// Best-effort removal from every backend.
    pub fn remove(&self, address: IpAddr) {
        for backend in &self.backends {
            if !backend.is_available() {
                continue;
            }
            if let Err(e) = backend.remove(address) {
                warn!(
                    "Backend {} failed to unblock {}: {}",
                    backend.method(),
                    address,
                    e
                );
            }
        }
    }
}
