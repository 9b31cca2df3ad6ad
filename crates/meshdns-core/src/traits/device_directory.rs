// # Device Directory Trait
//
// Defines the interface for listing the devices of the mesh network.
//
// ## Implementations
//
// - Tailscale API: `meshdns-directory-tailscale` crate
//
// ## Usage
//
// ```rust,ignore
// use meshdns_core::DeviceDirectory;
//
// let devices = directory.list_devices().await?;
// for device in &devices {
//     println!("{} -> {:?}", device.hostname, device.assigned_address("100."));
// }
// ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// A device as reported by the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Directory-specific display name (often the FQDN within the mesh)
    #[serde(default)]
    pub name: String,
    /// Device hostname, the reconciliation key
    pub hostname: String,
    /// Every address the device holds
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Whether the device is currently connected
    #[serde(default)]
    pub online: bool,
}

impl Device {
    /// Create an online device
    pub fn new(hostname: impl Into<String>, addresses: Vec<String>) -> Self {
        let hostname = hostname.into();
        Self {
            name: hostname.clone(),
            hostname,
            addresses,
            online: true,
        }
    }

    /// First address carrying the mesh's private-address prefix
    ///
    /// Entries that start with the prefix but do not parse (for example
    /// CIDR-suffixed strings) are ignored.
    pub fn assigned_address(&self, prefix: &str) -> Option<IpAddr> {
        self.addresses
            .iter()
            .filter(|addr| addr.starts_with(prefix))
            .find_map(|addr| addr.parse().ok())
    }

    /// DNS label used for this device's record
    ///
    /// The first label of the hostname, lowercased.
    pub fn record_label(&self) -> String {
        self.hostname
            .split('.')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase()
    }
}

/// Trait for device directory implementations
///
/// Listing must be idempotent and free of side effects as observed by the
/// reconciliation engine. Implementations apply their own client-side
/// timeout; the engine does not add one.
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// List every device currently known to the mesh
    async fn list_devices(&self) -> Result<Vec<Device>, crate::Error>;

    /// Directory name (for logging)
    fn directory_name(&self) -> &'static str;
}
