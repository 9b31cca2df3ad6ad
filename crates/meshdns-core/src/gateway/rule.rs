//! Reverse-proxy rules and their validation
//!
//! A [`ProxyRule`] maps a fully-qualified hostname to an internal target.
//! Every rule that reaches the rule set, the durable snapshot or the rendered
//! configuration has passed [`ProxyRule::validate`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum length of a hostname (RFC 1035)
const MAX_HOSTNAME_LEN: usize = 253;

/// Maximum length of a single label (RFC 1035)
const MAX_LABEL_LEN: usize = 63;

/// A violated rule constraint
///
/// The messages are stable: callers surface them verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("hostname cannot be empty")]
    EmptyHostname,

    #[error("hostname '{0}' must contain at least one domain separator")]
    MissingSeparator(String),

    #[error("hostname '{0}' cannot start or end with a dot")]
    EdgeDot(String),

    #[error("hostname '{0}' contains invalid characters or format")]
    InvalidFormat(String),

    #[error("hostname '{0}' exceeds maximum length")]
    TooLong(String),

    #[error("target address cannot be empty")]
    EmptyTarget,

    #[error("target port must be between 1 and 65535")]
    InvalidPort,

    #[error("unsupported protocol '{0}' (supported: http, https)")]
    UnsupportedProtocol(String),
}

/// Upstream protocol spoken by the target service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            _ => Err(ValidationError::UnsupportedProtocol(s.to_string())),
        }
    }
}

/// A single reverse-proxy rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRule {
    /// Fully-qualified hostname routed by the gateway (the rule key)
    pub hostname: String,
    /// Address of the target service
    pub target_ip: String,
    /// Port of the target service
    pub target_port: u16,
    /// Protocol spoken by the target service
    #[serde(default)]
    pub protocol: Protocol,
    /// Disabled rules are kept but not rendered
    pub enabled: bool,
    /// When the rule was created
    pub created_at: DateTime<Utc>,
}

impl ProxyRule {
    /// Create an enabled HTTP rule stamped with the current time
    pub fn new(hostname: impl Into<String>, target_ip: impl Into<String>, target_port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            target_ip: target_ip.into(),
            target_port,
            protocol: Protocol::Http,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    /// Set the protocol
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Enable or disable the rule
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Check every constraint a stored rule must satisfy
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_hostname(&self.hostname)?;

        if self.target_ip.trim().is_empty() {
            return Err(ValidationError::EmptyTarget);
        }

        if self.target_port == 0 {
            return Err(ValidationError::InvalidPort);
        }

        Ok(())
    }

    /// Upstream address as written into the gateway configuration
    ///
    /// Plain `ip:port` for HTTP targets, `https://ip:port` for HTTPS targets.
    pub fn upstream(&self) -> String {
        match self.protocol {
            Protocol::Http => format!("{}:{}", self.target_ip, self.target_port),
            Protocol::Https => format!("https://{}:{}", self.target_ip, self.target_port),
        }
    }
}

/// Validate a fully-qualified hostname
///
/// The hostname must contain at least one `.`, must not start or end with a
/// dot, and every label must be non-empty, alphanumeric-and-hyphen only, and
/// must not start or end with a hyphen.
pub fn validate_hostname(hostname: &str) -> Result<(), ValidationError> {
    if hostname.is_empty() {
        return Err(ValidationError::EmptyHostname);
    }

    if hostname.starts_with('.') || hostname.ends_with('.') {
        return Err(ValidationError::EdgeDot(hostname.to_string()));
    }

    if !hostname.contains('.') {
        return Err(ValidationError::MissingSeparator(hostname.to_string()));
    }

    if hostname.len() > MAX_HOSTNAME_LEN {
        return Err(ValidationError::TooLong(hostname.to_string()));
    }

    for label in hostname.split('.') {
        if label.is_empty()
            || !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            || label.starts_with('-')
            || label.ends_with('-')
        {
            return Err(ValidationError::InvalidFormat(hostname.to_string()));
        }

        if label.len() > MAX_LABEL_LEN {
            return Err(ValidationError::TooLong(hostname.to_string()));
        }
    }

    Ok(())
}
