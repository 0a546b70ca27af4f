//! Configuration management.
//!
//! This module provides functions for locating the invsync directory,
//! resolving the database path, and loading [`SyncConfig`].
//!
//! # Layout
//!
//! - **Config**: `~/.invsync/config.json` (override with `INVSYNC_CONFIG`)
//! - **Database**: `~/.invsync/data/invsync.db` (override with `INVSYNC_DB` or `--db`)
//!
//! Settings are resolved once at startup: defaults, then the config file,
//! then environment overrides, then [`SyncConfig::validate`]. The result is
//! passed around explicitly; nothing reads configuration lazily.

use crate::error::{Error, Result};
use crate::sync::{ResolutionStrategy, TieBreak};

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "INVSYNC_CONFIG";
pub const DB_ENV: &str = "INVSYNC_DB";
pub const REMOTE_URL_ENV: &str = "INVSYNC_REMOTE_URL";
pub const TOKEN_ENV: &str = "INVSYNC_TOKEN";
pub const SIGNING_KEY_ENV: &str = "INVSYNC_SIGNING_KEY";
pub const ENCRYPTION_KEY_ENV: &str = "INVSYNC_ENCRYPTION_KEY";
pub const STRATEGY_ENV: &str = "INVSYNC_STRATEGY";
pub const ACTOR_ENV: &str = "INVSYNC_ACTOR";

/// Weights of the duplicate score components. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateWeights {
    pub invoice_number: f64,
    pub total_amount: f64,
    pub client: f64,
    pub created_at: f64,
}

impl Default for DuplicateWeights {
    fn default() -> Self {
        Self {
            invoice_number: 0.30,
            total_amount: 0.25,
            client: 0.25,
            created_at: 0.20,
        }
    }
}

impl DuplicateWeights {
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.invoice_number + self.total_amount + self.client + self.created_at
    }
}

/// Duplicate screening settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateSettings {
    pub weights: DuplicateWeights,
    /// Creation-time similarity halves every this many seconds
    pub half_life_secs: f64,
    /// Scores strictly above this are rejected outright
    pub skip_threshold: f64,
    /// Scores strictly above this (and up to `skip_threshold`) are flagged
    pub merge_threshold: f64,
}

impl Default for DuplicateSettings {
    fn default() -> Self {
        Self {
            weights: DuplicateWeights::default(),
            half_life_secs: 10.0,
            skip_threshold: 0.95,
            merge_threshold: 0.85,
        }
    }
}

/// Sync settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the remote record store
    pub remote_url: Option<String>,
    /// Bearer credential for the remote
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Shared secret for signing per-actor tokens, used when `token` is unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<String>,
    /// Base64 AES-256 key sealing client data on the wire; unset sends it in the clear
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
    /// Conflict resolution strategy name
    pub strategy: String,
    /// `remote` or `local`
    pub tie_break: String,
    /// Records dispatched concurrently per batch
    pub batch_size: usize,
    /// Delivery attempts per record per sweep
    pub max_attempts: u32,
    /// First retry delay; doubles on each further attempt
    pub backoff_base_ms: u64,
    pub probe_interval_secs: u64,
    pub sweep_interval_secs: u64,
    pub request_timeout_secs: u64,
    /// Prefix of generated invoice numbers
    pub invoice_prefix: String,
    pub duplicates: DuplicateSettings,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            token: None,
            signing_key: None,
            encryption_key: None,
            strategy: ResolutionStrategy::default().as_str().to_string(),
            tie_break: "remote".to_string(),
            batch_size: 10,
            max_attempts: 3,
            backoff_base_ms: 1_000,
            probe_interval_secs: 30,
            sweep_interval_secs: 60,
            request_timeout_secs: 10,
            invoice_prefix: "INV".to_string(),
            duplicates: DuplicateSettings::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration: file (if present), environment, validation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file is unreadable or a setting is
    /// invalid, and [`Error::UnknownStrategy`] for a bad strategy name.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).or_else(config_path);

        let mut config = match path {
            Some(ref p) if p.exists() => Self::from_file(p)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Read a config file. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file can't be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("invalid config {}: {e}", path.display())))
    }

    /// Apply environment overrides through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty(REMOTE_URL_ENV) {
            self.remote_url = Some(url);
        }
        if let Some(token) = non_empty(TOKEN_ENV) {
            self.token = Some(token);
        }
        if let Some(key) = non_empty(SIGNING_KEY_ENV) {
            self.signing_key = Some(key);
        }
        if let Some(key) = non_empty(ENCRYPTION_KEY_ENV) {
            self.encryption_key = Some(key);
        }
        if let Some(strategy) = non_empty(STRATEGY_ENV) {
            self.strategy = strategy;
        }
    }

    /// Check every setting once, up front.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<()> {
        self.resolution_strategy()?;
        self.tie_break()?;

        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".into()));
        }
        if self.probe_interval_secs == 0 || self.sweep_interval_secs == 0 {
            return Err(Error::Config("probe and sweep intervals must be positive".into()));
        }
        if let Some(url) = &self.remote_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::Config(format!(
                    "remote_url must start with http:// or https://, got '{url}'"
                )));
            }
        }

        if let Some(key) = &self.encryption_key {
            crate::remote::AesGcmCipher::from_base64(key)?;
        }

        let dup = &self.duplicates;
        if (dup.weights.sum() - 1.0).abs() > 1e-6 {
            return Err(Error::Config(format!(
                "duplicate weights must sum to 1.0, got {:.3}",
                dup.weights.sum()
            )));
        }
        if !(0.0..=1.0).contains(&dup.merge_threshold)
            || !(0.0..=1.0).contains(&dup.skip_threshold)
            || dup.merge_threshold >= dup.skip_threshold
        {
            return Err(Error::Config(
                "duplicate thresholds must satisfy 0 <= merge < skip <= 1".into(),
            ));
        }
        if dup.half_life_secs.is_nan() || dup.half_life_secs < 0.0 {
            return Err(Error::Config("half_life_secs cannot be negative".into()));
        }

        Ok(())
    }

    /// Parsed conflict resolution strategy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownStrategy`] with a suggestion when possible.
    pub fn resolution_strategy(&self) -> Result<ResolutionStrategy> {
        self.strategy.parse()
    }

    /// Parsed tie-break rule.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for anything but `remote` or `local`.
    pub fn tie_break(&self) -> Result<TieBreak> {
        self.tie_break.parse()
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt - 1)`.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_base_ms.saturating_mul(factor))
    }

    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Write the config atomically with owner-only permissions.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file can't be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let temp_path = path.with_extension("json.tmp");

        // Write to temp file with restrictive permissions, then atomic rename
        {
            let mut opts = fs::OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            opts.mode(0o600);
            let mut file = opts.open(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.flush()?;
        }
        fs::rename(&temp_path, path)?;
        Ok(())
    }
}

/// Get the global invsync directory (`~/.invsync/`).
#[must_use]
pub fn global_invsync_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".invsync"))
}

/// Resolve the config file path.
///
/// Priority:
/// 1. `INVSYNC_CONFIG` environment variable
/// 2. `~/.invsync/config.json`
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    global_invsync_dir().map(|dir| dir.join("config.json"))
}

/// Resolve the database path.
///
/// Priority:
/// 1. If `explicit_path` is provided, use it directly
/// 2. `INVSYNC_DB` environment variable
/// 3. Global location: `~/.invsync/data/invsync.db`
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if let Ok(db_path) = std::env::var(DB_ENV) {
        if !db_path.trim().is_empty() {
            return Some(PathBuf::from(db_path));
        }
    }

    global_invsync_dir().map(|dir| dir.join("data").join("invsync.db"))
}

/// Get the default actor name.
///
/// Priority:
/// 1. `INVSYNC_ACTOR` environment variable
/// 2. Git user name
/// 3. System username
/// 4. "unknown"
#[must_use]
pub fn default_actor() -> String {
    if let Ok(actor) = std::env::var(ACTOR_ENV) {
        if !actor.is_empty() {
            return actor;
        }
    }

    if let Ok(output) = std::process::Command::new("git")
        .args(["config", "user.name"])
        .output()
    {
        if output.status.success() {
            let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !name.is_empty() {
                return name;
            }
        }
    }

    if let Ok(user) = std::env::var("USER") {
        return user;
    }

    "unknown".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = SyncConfig::default();
        config.validate().unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.resolution_strategy().unwrap(), ResolutionStrategy::LastWriteWins);
        assert_eq!(config.tie_break().unwrap(), TieBreak::PreferRemote);
    }

    #[test]
    fn test_backoff_doubles() {
        let config = SyncConfig::default();
        assert_eq!(config.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(config.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(config.backoff_delay(3), Duration::from_secs(4));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (REMOTE_URL_ENV, "https://records.example.com"),
            (STRATEGY_ENV, "merge"),
            (TOKEN_ENV, "   "),
            (SIGNING_KEY_ENV, "shared"),
            (ENCRYPTION_KEY_ENV, "AAAA"),
        ]
        .into_iter()
        .collect();

        let mut config = SyncConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.remote_url.as_deref(), Some("https://records.example.com"));
        assert_eq!(config.resolution_strategy().unwrap(), ResolutionStrategy::FieldMerge);
        // Blank values don't override
        assert!(config.token.is_none());
        assert_eq!(config.signing_key.as_deref(), Some("shared"));
        assert_eq!(config.encryption_key.as_deref(), Some("AAAA"));
        // Too short for AES-256
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validation_rejects_bad_settings() {
        let config = SyncConfig {
            strategy: "coin_flip".into(),
            ..SyncConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::UnknownStrategy { .. })));

        let config = SyncConfig {
            batch_size: 0,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.duplicates.weights.client = 0.5;
        assert!(config.validate().is_err());

        let mut config = SyncConfig::default();
        config.duplicates.merge_threshold = 0.99;
        assert!(config.validate().is_err());

        let config = SyncConfig {
            remote_url: Some("ftp://nope".into()),
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = SyncConfig {
            remote_url: Some("http://localhost:8080".into()),
            batch_size: 4,
            ..SyncConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(SyncConfig::from_file(&path).unwrap(), config);

        // Missing fields fall back to defaults
        fs::write(&path, r#"{"max_attempts": 5}"#).unwrap();
        let loaded = SyncConfig::from_file(&path).unwrap();
        assert_eq!(loaded.max_attempts, 5);
        assert_eq!(loaded.batch_size, 10);
    }

    #[test]
    fn test_resolve_db_path_with_explicit() {
        let explicit = PathBuf::from("/custom/path/db.sqlite");
        let result = resolve_db_path(Some(&explicit));
        assert_eq!(result, Some(explicit));
    }

    #[test]
    fn test_default_actor() {
        let actor = default_actor();
        assert!(!actor.is_empty());
    }
}
