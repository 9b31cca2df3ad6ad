// # Rule Store Implementations
//
// This module provides implementations of the RuleStore trait for
// different persistence strategies, plus the snapshot codec they share.

pub mod file;
pub mod memory;

pub use file::FileRuleStore;
pub use memory::MemoryRuleStore;

use std::collections::BTreeMap;

use crate::Error;
use crate::gateway::rule::ProxyRule;
use crate::traits::RuleSet;

/// Check every rule before a snapshot is written
///
/// Fails on the first invalid rule, or on a rule filed under a key that is
/// not its own hostname.
pub(crate) fn validate_for_save(rules: &RuleSet) -> Result<(), Error> {
    for (hostname, rule) in rules {
        if hostname != &rule.hostname {
            return Err(Error::storage(format!(
                "rule for {} is filed under key {}",
                rule.hostname, hostname
            )));
        }
        rule.validate()
            .map_err(|e| Error::storage(format!("invalid rule for {}: {}", hostname, e)))?;
    }
    Ok(())
}

/// Decode a snapshot document, skipping entries that fail to parse or validate
///
/// Only a document that is not a JSON object at all is an error.
pub(crate) fn decode_snapshot(content: &str) -> Result<RuleSet, Error> {
    if content.trim().is_empty() {
        return Ok(RuleSet::new());
    }

    let entries: BTreeMap<String, serde_json::Value> = serde_json::from_str(content)?;
    let mut rules = RuleSet::new();

    for (hostname, value) in entries {
        let rule: ProxyRule = match serde_json::from_value(value) {
            Ok(rule) => rule,
            Err(e) => {
                tracing::warn!("Skipping malformed rule entry for {}: {}", hostname, e);
                continue;
            }
        };

        if let Err(e) = rule.validate() {
            tracing::warn!("Skipping invalid rule for {}: {}", hostname, e);
            continue;
        }

        if rule.hostname != hostname {
            tracing::warn!(
                "Skipping rule for {} filed under mismatched key {}",
                rule.hostname,
                hostname
            );
            continue;
        }

        rules.insert(hostname, rule);
    }

    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_skips_invalid_entries() {
        let content = r#"{
            "good.example.com": {
                "hostname": "good.example.com",
                "target_ip": "100.64.0.1",
                "target_port": 8080,
                "protocol": "http",
                "enabled": true,
                "created_at": "2025-01-09T12:00:00Z"
            },
            "empty-target.example.com": {
                "hostname": "empty-target.example.com",
                "target_ip": "",
                "target_port": 8080,
                "protocol": "http",
                "enabled": true,
                "created_at": "2025-01-09T12:00:00Z"
            },
            "bad-protocol.example.com": {
                "hostname": "bad-protocol.example.com",
                "target_ip": "100.64.0.2",
                "target_port": 8080,
                "protocol": "gopher",
                "enabled": true,
                "created_at": "2025-01-09T12:00:00Z"
            },
            "dns": {
                "hostname": "dns",
                "target_ip": "100.64.0.3",
                "target_port": 53,
                "protocol": "http",
                "enabled": true,
                "created_at": "2025-01-09T12:00:00Z"
            }
        }"#;

        let rules = decode_snapshot(content).unwrap();
        assert_eq!(rules.len(), 1);
        assert!(rules.contains_key("good.example.com"));
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(decode_snapshot("[1, 2, 3]").is_err());
        assert!(decode_snapshot("corrupted json data").is_err());
        assert!(decode_snapshot("").unwrap().is_empty());
    }

    #[test]
    fn test_validate_for_save_rejects_mismatched_key() {
        let mut rules = RuleSet::new();
        rules.insert(
            "other.example.com".to_string(),
            ProxyRule::new("app.example.com", "100.64.0.1", 80),
        );
        assert!(validate_for_save(&rules).is_err());
    }
}
