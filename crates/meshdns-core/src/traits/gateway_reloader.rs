// # Gateway Reloader Trait
//
// Pluggable strategy that applies a rendered configuration file to the live
// gateway process. See `gateway::reloader` for the built-in strategies.

use async_trait::async_trait;
use std::path::Path;

/// Trait for gateway reload strategies
///
/// Failures are surfaced to the caller; the rule manager does not retry.
#[async_trait]
pub trait GatewayReloader: Send + Sync {
    /// Apply the configuration at `config_path`
    async fn reload(&self, config_path: &Path) -> Result<(), crate::Error>;

    /// Strategy name (for logging)
    fn reloader_name(&self) -> &'static str;
}
