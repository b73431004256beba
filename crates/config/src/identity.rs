//! Persisted machine identity.
//!
//! A stable, opaque identifier stored at `~/.wardline/id/machine.json`.
//! First run derives one from coarse host facts (hostname + OS) hashed with
//! SHA-256, falling back to a random UUID when no host facts are available.
//! Corrupt identity files are regenerated.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A persisted machine identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineIdentity {
    /// Opaque stable identifier (hex digest or UUID).
    pub machine_id: String,
}

impl MachineIdentity {
    /// Default location: `~/.wardline/id/machine.json`.
    pub fn default_path() -> PathBuf {
        crate::PlatformConfig::config_dir()
            .join("id")
            .join("machine.json")
    }

    /// Load the identity from disk, generating and persisting one when the
    /// file is missing or corrupt.
    pub fn load_or_create(path: &Path) -> Self {
        if let Ok(content) = std::fs::read_to_string(path) {
            match serde_json::from_str::<Self>(&content) {
                Ok(identity) if !identity.machine_id.is_empty() => return identity,
                _ => debug!(path = %path.display(), "Corrupt identity file, regenerating"),
            }
        }

        let identity = Self::generate();
        identity.save(path);
        identity
    }

    /// Derive an identifier from coarse host facts, or a random UUID when
    /// none are available.
    pub fn generate() -> Self {
        let hostname = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .ok();

        let machine_id = match hostname {
            Some(host) if !host.is_empty() => derive_id(&host),
            _ => uuid::Uuid::new_v4().to_string(),
        };

        Self { machine_id }
    }

    /// Persist to disk, best-effort.
    pub fn save(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        if let Ok(json) = serde_json::to_string(self) {
            if let Err(e) = std::fs::write(path, json) {
                debug!(path = %path.display(), error = %e, "Identity save failed");
            }
        }
    }
}

fn derive_id(host: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(host.as_bytes());
    hasher.update(std::env::consts::OS.as_bytes());
    hasher.update(std::env::consts::ARCH.as_bytes());
    hex::encode(hasher.finalize())
}
