//! Configuration types for meshdns
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Main meshdns configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeshDnsConfig {
    /// Device-to-DNS reconciliation settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Gateway rule manager settings
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl MeshDnsConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.sync.validate()?;
        self.gateway.validate()?;
        Ok(())
    }
}

/// Reconciliation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// FQDN of the internal zone (e.g. "internal.example.com")
    ///
    /// The first label names the zone handed to the DNS authority.
    pub origin: String,

    /// Prefix identifying the mesh's private addresses
    #[serde(default = "default_address_prefix")]
    pub address_prefix: String,

    /// Interval between scheduled resyncs (in seconds)
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,

    /// Extra record labels per device, keyed by hostname or record label
    #[serde(default)]
    pub aliases: BTreeMap<String, Vec<String>>,

    /// Devices never written to DNS, by hostname or record label
    #[serde(default)]
    pub excluded_hosts: BTreeSet<String>,
}

impl SyncConfig {
    /// Create a sync configuration for the given origin
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..Self::default()
        }
    }

    /// Set the address prefix
    pub fn with_address_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.address_prefix = prefix.into();
        self
    }

    /// Set the resync interval
    pub fn with_resync_interval_secs(mut self, secs: u64) -> Self {
        self.resync_interval_secs = secs;
        self
    }

    /// Add an alias label for a device
    pub fn with_alias(mut self, device: impl Into<String>, alias: impl Into<String>) -> Self {
        self.aliases.entry(device.into()).or_default().push(alias.into());
        self
    }

    /// Keep a device out of DNS
    pub fn with_excluded_host(mut self, device: impl Into<String>) -> Self {
        self.excluded_hosts.insert(device.into());
        self
    }

    /// Validate the sync configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.zone_name().is_none() {
            return Err(crate::Error::config(format!(
                "sync origin '{}' must be a subdomain of a base domain (e.g. internal.example.com)",
                self.origin
            )));
        }

        if self.address_prefix.is_empty() {
            return Err(crate::Error::config("sync address prefix cannot be empty"));
        }

        if self.resync_interval_secs == 0 {
            return Err(crate::Error::config("sync resync interval must be > 0"));
        }

        for (device, aliases) in &self.aliases {
            if let Some(alias) = aliases.iter().find(|a| !is_valid_label(a)) {
                return Err(crate::Error::config(format!(
                    "alias '{}' for device {} is not a valid DNS label",
                    alias, device
                )));
            }
        }

        Ok(())
    }

    /// Zone name derived from the origin
    ///
    /// `internal.example.com` yields `internal`; origins with fewer than three
    /// labels yield `None`.
    pub fn zone_name(&self) -> Option<&str> {
        let origin = self.origin.trim_end_matches('.');
        let labels: Vec<&str> = origin.split('.').collect();
        if labels.len() < 3 || labels.iter().any(|l| l.is_empty()) {
            return None;
        }
        Some(labels[0])
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            origin: String::new(),
            address_prefix: default_address_prefix(),
            resync_interval_secs: default_resync_interval_secs(),
            aliases: BTreeMap::new(),
            excluded_hosts: BTreeSet::new(),
        }
    }
}

/// Single DNS label: 1-63 alphanumerics or hyphens, no edge hyphen
fn is_valid_label(label: &str) -> bool {
    !label.is_empty()
        && label.len() <= 63
        && !label.starts_with('-')
        && !label.ends_with('-')
        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Gateway rule manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Whether the gateway subsystem is active
    ///
    /// When false every mutation is a successful no-op and nothing is written.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Path of the rendered gateway configuration
    #[serde(default = "default_config_path")]
    pub config_path: PathBuf,

    /// Template used to render the configuration (built-in default if unset)
    #[serde(default)]
    pub template_path: Option<PathBuf>,

    /// Port the gateway listens on
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Durable rule storage
    #[serde(default)]
    pub storage: RuleStorageConfig,
}

impl GatewayConfig {
    /// Create an enabled gateway configuration writing to `config_path`
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            ..Self::default()
        }
    }

    /// A configuration with the subsystem switched off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Set the template path
    pub fn with_template_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.template_path = Some(path.into());
        self
    }

    /// Set the listen port
    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    /// Validate the gateway configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if !self.enabled {
            return Ok(());
        }

        if self.config_path.as_os_str().is_empty() {
            return Err(crate::Error::config("gateway config path cannot be empty"));
        }

        if self.listen_port == 0 {
            return Err(crate::Error::config("gateway listen port must be > 0"));
        }

        self.storage.validate()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            config_path: default_config_path(),
            template_path: None,
            listen_port: default_listen_port(),
            storage: RuleStorageConfig::default(),
        }
    }
}

/// Durable rule storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleStorageConfig {
    /// JSON snapshot file with rotating backups
    File {
        /// Path to the snapshot file
        path: PathBuf,
        /// Number of prior snapshots to keep
        #[serde(default = "default_backup_count")]
        backup_count: usize,
    },

    /// In-memory snapshot (not persistent)
    #[default]
    Memory,
}

impl RuleStorageConfig {
    /// File storage with the default backup count
    pub fn file(path: impl Into<PathBuf>) -> Self {
        RuleStorageConfig::File {
            path: path.into(),
            backup_count: default_backup_count(),
        }
    }

    /// Validate the storage configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            RuleStorageConfig::File { path, .. } if path.as_os_str().is_empty() => Err(
                crate::Error::config("rule storage path cannot be empty"),
            ),
            _ => Ok(()),
        }
    }
}

fn default_address_prefix() -> String {
    "100.".to_string()
}

fn default_resync_interval_secs() -> u64 {
    300
}

fn default_enabled() -> bool {
    true
}

fn default_config_path() -> PathBuf {
    PathBuf::from("/app/configs/Caddyfile")
}

fn default_listen_port() -> u16 {
    80
}

/// Default number of snapshot backups retained
pub fn default_backup_count() -> usize {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zone_name_from_origin() {
        assert_eq!(SyncConfig::new("internal.example.com").zone_name(), Some("internal"));
        assert_eq!(SyncConfig::new("internal.example.com.").zone_name(), Some("internal"));
        assert_eq!(SyncConfig::new("example.com").zone_name(), None);
        assert_eq!(SyncConfig::new("").zone_name(), None);
    }

    #[test]
    fn test_sync_validation() {
        assert!(SyncConfig::new("internal.example.com").validate().is_ok());
        assert!(SyncConfig::new("example.com").validate().is_err());
        assert!(
            SyncConfig::new("internal.example.com")
                .with_resync_interval_secs(0)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_alias_labels_are_validated() {
        let config = SyncConfig::new("internal.example.com").with_alias("nas", "files");
        assert!(config.validate().is_ok());
        assert_eq!(config.aliases["nas"], vec!["files"]);

        for bad in ["", "files.example", "-files", "fi les"] {
            let config = SyncConfig::new("internal.example.com").with_alias("nas", bad);
            assert!(config.validate().is_err(), "{:?} accepted", bad);
        }
    }

    #[test]
    fn test_disabled_gateway_skips_validation() {
        let mut config = GatewayConfig::disabled();
        config.listen_port = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_storage_config_deserialization() {
        let json = r#"{"type": "file", "path": "/var/lib/meshdns/rules.json"}"#;
        let config: RuleStorageConfig = serde_json::from_str(json).unwrap();
        match config {
            RuleStorageConfig::File { path, backup_count } => {
                assert_eq!(path, PathBuf::from("/var/lib/meshdns/rules.json"));
                assert_eq!(backup_count, 3);
            }
            RuleStorageConfig::Memory => panic!("expected file storage"),
        }
    }
}
