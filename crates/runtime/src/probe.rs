//! Default environment probe.
//!
//! Backed by the persisted machine identity plus a deliberately coarse host
//! snapshot: OS family, hostname if the environment exposes one, and the
//! crate version. Nothing finer-grained ever leaves the machine.

use std::path::Path;
use wardline_config::MachineIdentity;
use wardline_core::sink::{EnvironmentProbe, EnvironmentSnapshot};

/// Probe backed by the persisted machine identity.
#[derive(Debug, Clone)]
pub struct HostProbe {
    identity: MachineIdentity,
}

impl HostProbe {
    /// Load (or create) the identity at the default location.
    pub fn new() -> Self {
        Self::with_identity_path(&MachineIdentity::default_path())
    }

    /// Load (or create) the identity at a specific path.
    pub fn with_identity_path(path: &Path) -> Self {
        Self {
            identity: MachineIdentity::load_or_create(path),
        }
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvironmentProbe for HostProbe {
    fn machine_id(&self) -> String {
        self.identity.machine_id.clone()
    }

    fn snapshot(&self) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            machine_id: self.identity.machine_id.clone(),
            os: std::env::consts::OS.to_string(),
            hostname: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("COMPUTERNAME"))
                .ok()
                .filter(|h| !h.is_empty()),
            app_version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_identity_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machine.json");
        let first = HostProbe::with_identity_path(&path);
        let second = HostProbe::with_identity_path(&path);
        assert_eq!(first.machine_id(), second.machine_id());
    }

    #[test]
    fn snapshot_carries_version_and_os() {
        let dir = tempfile::tempdir().unwrap();
        let probe = HostProbe::with_identity_path(&dir.path().join("machine.json"));
        let snapshot = probe.snapshot();
        assert_eq!(snapshot.os, std::env::consts::OS);
        assert_eq!(snapshot.app_version.as_deref(), Some(env!("CARGO_PKG_VERSION")));
    }
}
