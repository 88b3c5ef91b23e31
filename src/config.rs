//! Security core configuration
//!
//! All tunables for rate limiting, risk thresholds, audit retention, and
//! anomaly training. Loadable from a JSON file; atomic writes via temp
//! file + rename to prevent corruption.

use crate::error::{Result, SecurityError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for the security core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecurityConfig {
    /// Maximum authenticate calls per source within the sliding one-minute window
    pub rate_limit_max_per_minute: u32,

    /// Risk score above which sensitive operations are denied
    pub risk_threshold: f64,

    /// Session lifetime in seconds
    pub session_ttl_secs: u64,

    /// Background audit flush interval in seconds
    pub flush_interval_secs: u64,

    /// Buffer size that triggers an opportunistic flush
    pub flush_buffer_threshold: usize,

    /// Audit entries older than this many days are compacted
    pub retention_days: i64,

    /// Minimum per-actor samples before a profile participates in training
    pub min_training_samples: usize,

    /// Scores below this are treated as anomalous (more negative = more unusual)
    pub anomaly_threshold: f64,

    /// Failed logins per actor+source per rolling hour before alerting
    pub failed_login_threshold: u32,

    /// Sign each audit entry's chain hash with the configured key
    pub signing_enabled: bool,

    /// Key material for entry signing (hex or raw string)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<String>,

    /// Bounded per-actor history of access hours
    pub max_profile_hours: usize,

    /// Cap on remembered source addresses per actor
    pub max_profile_sources: usize,

    /// Cap on remembered resources per actor
    pub max_profile_resources: usize,

    /// CPU usage percentage that raises a resource alert
    pub cpu_alert_percent: f64,

    /// Memory usage percentage that raises a resource alert
    pub memory_alert_percent: f64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            rate_limit_max_per_minute: 5,
            risk_threshold: 0.8,
            session_ttl_secs: 3600,
            flush_interval_secs: 5,
            flush_buffer_threshold: 100,
            retention_days: 90,
            min_training_samples: 10,
            anomaly_threshold: -0.5,
            failed_login_threshold: 5,
            signing_enabled: false,
            signing_key: None,
            max_profile_hours: 100,
            max_profile_sources: 10,
            max_profile_resources: 50,
            cpu_alert_percent: 90.0,
            memory_alert_percent: 85.0,
        }
    }
}

impl SecurityConfig {
    /// Load configuration from a JSON file
    ///
    /// Missing fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            SecurityError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&json).map_err(|e| {
            SecurityError::Config(format!("Failed to parse config {}: {}", path.display(), e))
        })
    }

    /// Save configuration to a JSON file
    ///
    /// Atomic write: write to temp file, then rename.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;

        let tmp_path = path.with_extension("tmp");
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SecurityError::Config(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        std::fs::write(&tmp_path, json).map_err(|e| {
            SecurityError::Config(format!(
                "Failed to write config {}: {}",
                tmp_path.display(),
                e
            ))
        })?;

        std::fs::rename(&tmp_path, path).map_err(|e| {
            SecurityError::Config(format!(
                "Failed to rename config {} → {}: {}",
                tmp_path.display(),
                path.display(),
                e
            ))
        })?;

        Ok(())
    }
}
