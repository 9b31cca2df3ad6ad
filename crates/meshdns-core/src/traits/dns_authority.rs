// # DNS Authority Trait
//
// Defines the interface for applying zone and record changes.
//
// ## Implementations
//
// - Zone files + reload command: `meshdns-authority-zonefile` crate
//
// Each operation is independently fallible. The reconciliation engine decides
// what to add or drop and when to reload; authorities never retry on their own.

use async_trait::async_trait;
use std::net::IpAddr;

/// Trait for DNS authority implementations
#[async_trait]
pub trait DnsAuthority: Send + Sync {
    /// Create a zone
    ///
    /// Implementations may fail if the zone already exists; the engine
    /// tolerates that case by probing with a record add.
    async fn add_zone(&self, zone: &str) -> Result<(), crate::Error>;

    /// Add or update the A/AAAA record `label` in `zone`
    async fn add_record(&self, zone: &str, label: &str, ip: IpAddr) -> Result<(), crate::Error>;

    /// Drop the record `label` pointing at `ip` in `zone`
    async fn drop_record(&self, zone: &str, label: &str, ip: IpAddr) -> Result<(), crate::Error>;

    /// Make the authority serve the current zone data
    async fn reload(&self) -> Result<(), crate::Error>;

    /// Authority name (for logging)
    fn authority_name(&self) -> &'static str;
}
