//! Configuration loading, validation, and persistence for wardline.
//!
//! Loads configuration from `~/.wardline/config.json` with environment
//! variable overrides, and persists the relay's sync bookkeeping and the
//! machine identity under the same directory. All file IO in this crate is
//! best-effort: missing or corrupt files fall back to defaults or
//! regeneration, and write failures are logged at debug level and swallowed.
//! Telemetry must never break the host application.

pub mod identity;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub use identity::MachineIdentity;

/// The root configuration structure.
///
/// Maps directly to `~/.wardline/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlatformConfig {
    /// Quota limits per resource class
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Execution guard behavior
    #[serde(default)]
    pub guard: GuardConfig,

    /// Telemetry relay settings
    #[serde(default)]
    pub relay: RelayConfig,

    /// Health monitor settings
    #[serde(default)]
    pub health: HealthConfig,
}

// ── Quota ─────────────────────────────────────────────────────────────────

/// A pair of sliding-window capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitPair {
    /// Max requests in any trailing 60 seconds.
    pub per_minute: u32,
    /// Max requests in any trailing 3600 seconds.
    pub per_hour: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Limits applied to resource types with no dedicated entry.
    #[serde(default = "default_limits")]
    pub default_limits: LimitPair,

    /// Limits applied to extended-capacity resource classes.
    #[serde(default = "extended_limits")]
    pub extended_limits: LimitPair,

    /// Resource types that get the extended limits. A trailing `.ext`
    /// suffix on a resource type also selects the extended class.
    #[serde(default)]
    pub extended_resources: Vec<String>,

    /// Per-resource overrides (highest precedence).
    #[serde(default)]
    pub overrides: HashMap<String, LimitPair>,
}

fn default_limits() -> LimitPair {
    LimitPair {
        per_minute: 60,
        per_hour: 3000,
    }
}
fn extended_limits() -> LimitPair {
    LimitPair {
        per_minute: 600,
        per_hour: 36000,
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            default_limits: default_limits(),
            extended_limits: extended_limits(),
            extended_resources: vec![],
            overrides: HashMap::new(),
        }
    }
}

impl QuotaConfig {
    /// Resolve the effective limits for a resource type.
    pub fn limits_for(&self, resource_type: &str) -> LimitPair {
        if let Some(pair) = self.overrides.get(resource_type) {
            return *pair;
        }
        if resource_type.ends_with(".ext")
            || self.extended_resources.iter().any(|r| r == resource_type)
        {
            return self.extended_limits;
        }
        self.default_limits
    }
}

// ── Guard ─────────────────────────────────────────────────────────────────

/// What the guard does when quota retries run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustPolicy {
    /// Surface the rate-limit error to the caller (library behavior).
    #[default]
    Propagate,
    /// Terminate the process. Opt-in only; never the default.
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Calls within `time_window_secs` that count as a burst (min 2).
    #[serde(default = "default_loop_threshold")]
    pub loop_threshold: usize,

    /// Burst-detection window in seconds.
    #[serde(default = "default_time_window")]
    pub time_window_secs: f64,

    /// Minimum seconds between content presentations for one operation.
    #[serde(default = "default_content_cooldown")]
    pub content_cooldown_secs: f64,

    /// Consecutive burst detections before content triggers (min 1).
    #[serde(default = "default_content_trigger")]
    pub content_trigger_threshold: u32,

    /// Quota-rejection retries before the error surfaces.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base for exponential backoff (wait = backoff_factor ^ retry).
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Session length limiting content to one presentation (seconds).
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: f64,

    /// Behavior once retries are exhausted.
    #[serde(default)]
    pub exhaust_policy: ExhaustPolicy,
}

fn default_loop_threshold() -> usize {
    10
}
fn default_time_window() -> f64 {
    5.0
}
fn default_content_cooldown() -> f64 {
    150.0
}
fn default_content_trigger() -> u32 {
    3
}
fn default_max_retries() -> u32 {
    2
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_session_timeout() -> f64 {
    1800.0
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            loop_threshold: default_loop_threshold(),
            time_window_secs: default_time_window(),
            content_cooldown_secs: default_content_cooldown(),
            content_trigger_threshold: default_content_trigger(),
            max_retries: default_max_retries(),
            backoff_factor: default_backoff_factor(),
            session_timeout_secs: default_session_timeout(),
            exhaust_policy: ExhaustPolicy::Propagate,
        }
    }
}

// ── Relay ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Webhook endpoint. None disables transmission entirely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,

    /// Combined record count that forces a flush.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Periodic flush interval in seconds.
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    /// HTTP timeout for a single transmission attempt.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Failed payloads retained for retry (oldest evicted beyond this).
    #[serde(default = "default_max_failed")]
    pub max_failed_payloads: usize,

    /// Optional HMAC-SHA256 secret; when set, payloads carry an
    /// `X-Wardline-Signature` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<String>,
}

fn default_buffer_size() -> usize {
    50
}
fn default_sync_interval() -> u64 {
    300
}
fn default_request_timeout() -> u64 {
    5
}
fn default_max_failed() -> usize {
    10
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            buffer_size: default_buffer_size(),
            sync_interval_secs: default_sync_interval(),
            request_timeout_secs: default_request_timeout(),
            max_failed_payloads: default_max_failed(),
            signing_secret: None,
        }
    }
}

// ── Health ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Seconds between background health checks.
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,

    /// Quota usage percentage regarded as high pressure.
    #[serde(default = "default_usage_warning")]
    pub usage_warning_pct: f64,
}

fn default_check_interval() -> u64 {
    300
}
fn default_usage_warning() -> f64 {
    80.0
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            usage_warning_pct: default_usage_warning(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────

impl PlatformConfig {
    /// Load configuration from the default path (~/.wardline/config.json).
    ///
    /// Environment overrides:
    /// - `WARDLINE_WEBHOOK_URL` — relay endpoint (highest priority)
    /// - `WARDLINE_SIGNING_SECRET` — payload HMAC secret
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_dir().join("config.json"))?;

        if let Ok(url) = std::env::var("WARDLINE_WEBHOOK_URL") {
            config.relay.webhook_url = Some(url);
        }
        if config.relay.signing_secret.is_none() {
            config.relay.signing_secret = std::env::var("WARDLINE_SIGNING_SECRET").ok();
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file yields defaults; a corrupt file is logged and also
    /// yields defaults (availability over durability).
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            debug!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = match serde_json::from_str(&content) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Corrupt config file, using defaults");
                Self::default()
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".wardline")
    }

    /// Directory for persisted runtime data (sync state, identity).
    pub fn data_dir() -> PathBuf {
        Self::config_dir().join("data")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.guard.loop_threshold < 2 {
            return Err(ConfigError::ValidationError(
                "guard.loop_threshold must be at least 2".into(),
            ));
        }
        if self.guard.time_window_secs <= 0.0 {
            return Err(ConfigError::ValidationError(
                "guard.time_window_secs must be positive".into(),
            ));
        }
        if self.guard.content_trigger_threshold < 1 {
            return Err(ConfigError::ValidationError(
                "guard.content_trigger_threshold must be at least 1".into(),
            ));
        }
        if self.guard.backoff_factor <= 0.0 {
            return Err(ConfigError::ValidationError(
                "guard.backoff_factor must be positive".into(),
            ));
        }
        if self.relay.buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "relay.buffer_size must be at least 1".into(),
            ));
        }
        if self.relay.sync_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "relay.sync_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// ── Sync bookkeeping ──────────────────────────────────────────────────────

/// Relay bookkeeping persisted across runs.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncState {
    /// Epoch seconds of the last successful snapshot.
    pub last_sync_time: f64,
    /// Running count of dispatched payloads.
    pub sync_count: u64,
}

impl SyncState {
    /// Default location: `~/.wardline/data/relay_state.json`.
    pub fn default_path() -> PathBuf {
        PlatformConfig::data_dir().join("relay_state.json")
    }

    /// Load from disk; missing or corrupt files yield defaults.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&content) {
            Ok(state) => state,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Corrupt sync state, regenerating");
                Self::default()
            }
        }
    }

    /// Persist to disk, best-effort. Failures are logged and swallowed.
    pub fn save(&self, path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                debug!(error = %e, "Could not create data directory, skipping sync state save");
                return;
            }
        }
        match serde_json::to_string(self) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    debug!(path = %path.display(), error = %e, "Sync state save failed");
                }
            }
            Err(e) => debug!(error = %e, "Sync state serialization failed"),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
