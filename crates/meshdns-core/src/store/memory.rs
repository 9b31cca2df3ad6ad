// # Memory Rule Store
//
// In-memory implementation of RuleStore.
//
// ## Purpose
//
// Holds the rule snapshot inside the process. Useful for tests and for
// deployments where the rendered configuration file is the only durable
// artifact (restore then falls back to parsing that file).
//
// ## Crash Behavior
//
// - The snapshot is lost on restart/crash
// - Writes are validated exactly like the file store

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::{RuleSet, RuleStore};

use super::validate_for_save;

/// In-memory rule store implementation
///
/// Clones share the same snapshot, so a test can keep a handle after handing
/// the store to a manager.
#[derive(Debug, Clone, Default)]
pub struct MemoryRuleStore {
    inner: Arc<RwLock<Option<RuleSet>>>,
}

impl MemoryRuleStore {
    /// Create a new empty memory rule store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds a snapshot
    pub fn with_rules(rules: RuleSet) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(rules))),
        }
    }

    /// Number of rules in the current snapshot
    pub async fn len(&self) -> usize {
        self.inner.read().await.as_ref().map_or(0, |rules| rules.len())
    }

    /// Check if the snapshot is empty or was never written
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn load(&self) -> Result<RuleSet, Error> {
        Ok(self.inner.read().await.clone().unwrap_or_default())
    }

    async fn save(&self, rules: &RuleSet) -> Result<(), Error> {
        validate_for_save(rules)?;
        *self.inner.write().await = Some(rules.clone());
        Ok(())
    }

    async fn exists(&self) -> bool {
        self.inner.read().await.is_some()
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::rule::ProxyRule;

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryRuleStore::new();
        assert!(!store.exists().await);
        assert!(store.load().await.unwrap().is_empty());

        let mut rules = RuleSet::new();
        let rule = ProxyRule::new("app.example.com", "100.64.0.1", 8080);
        rules.insert(rule.hostname.clone(), rule);
        store.save(&rules).await.unwrap();

        assert!(store.exists().await);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.load().await.unwrap(), rules);
    }

    #[tokio::test]
    async fn test_memory_store_rejects_invalid_rule() {
        let store = MemoryRuleStore::new();

        let mut rules = RuleSet::new();
        let rule = ProxyRule::new("app.example.com", "100.64.0.1", 0);
        rules.insert(rule.hostname.clone(), rule);

        assert!(matches!(store.save(&rules).await, Err(Error::Storage(_))));
        assert!(!store.exists().await);
    }

    #[tokio::test]
    async fn test_clones_share_snapshot() {
        let store = MemoryRuleStore::new();
        let handle = store.clone();

        let mut rules = RuleSet::new();
        let rule = ProxyRule::new("app.example.com", "100.64.0.1", 8080);
        rules.insert(rule.hostname.clone(), rule);
        store.save(&rules).await.unwrap();

        assert_eq!(handle.len().await, 1);
    }
}
