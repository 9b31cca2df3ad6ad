//! Core traits for meshdns
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`DeviceDirectory`]: Source of truth for mesh devices
//! - [`DnsAuthority`]: Applies zone and record changes
//! - [`GatewayReloader`]: Applies a rendered configuration to the live gateway
//! - [`RuleStore`]: Durable snapshot of the gateway rule set

pub mod device_directory;
pub mod dns_authority;
pub mod gateway_reloader;
pub mod rule_store;

pub use device_directory::{Device, DeviceDirectory};
pub use dns_authority::DnsAuthority;
pub use gateway_reloader::GatewayReloader;
pub use rule_store::{RuleSet, RuleStore};
