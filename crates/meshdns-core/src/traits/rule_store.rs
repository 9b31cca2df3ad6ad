// # Rule Store Trait
//
// Defines the interface for durable storage of the gateway rule set.
//
// ## Implementations
//
// - File-based: JSON snapshot with rotating backups (`store::FileRuleStore`)
// - In-memory: `store::MemoryRuleStore`

use async_trait::async_trait;
use std::collections::BTreeMap;

use crate::gateway::rule::ProxyRule;

/// Rule set keyed by hostname
pub type RuleSet = BTreeMap<String, ProxyRule>;

/// Trait for rule store implementations
///
/// # Contract
///
/// - `save` validates every rule and fails without writing if any is invalid
/// - `load` skips (and logs) individually invalid entries instead of failing
/// - `load` on a store that was never written returns an empty set
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Load the last saved snapshot
    async fn load(&self) -> Result<RuleSet, crate::Error>;

    /// Replace the snapshot with `rules`
    async fn save(&self, rules: &RuleSet) -> Result<(), crate::Error>;

    /// Whether a snapshot has been written
    async fn exists(&self) -> bool;

    /// Human-readable location (for logging)
    fn location(&self) -> String;
}
