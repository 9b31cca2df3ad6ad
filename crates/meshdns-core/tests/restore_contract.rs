//! Contract Test: Restore After Restart
//!
//! Constraints verified:
//! - Rules committed before a restart come back from the snapshot
//! - Without a snapshot, rules are recovered from the deployed config
//! - Malformed deployed blocks are skipped individually
//! - Restore never fails and never reloads the gateway

mod common;

use common::*;
use meshdns_core::traits::RuleStore;
use meshdns_core::{
    FileRuleStore, GatewayConfig, GatewayManager, MemoryRuleStore, Protocol, ProxyRule,
    RestoreSource,
};
use std::path::Path;

fn file_manager(dir: &Path, reloader: &RecordingReloader) -> GatewayManager {
    GatewayManager::new(
        GatewayConfig::new(dir.join("Caddyfile")),
        Box::new(FileRuleStore::new(dir.join("rules.json"), 3)),
        Box::new(reloader.clone()),
    )
    .unwrap()
}

#[tokio::test]
async fn rules_survive_restart_via_snapshot() {
    let dir = tempfile::tempdir().unwrap();

    {
        let manager = file_manager(dir.path(), &RecordingReloader::new());
        manager
            .add_rule(ProxyRule::new("a.example.com", "100.64.0.1", 80))
            .await
            .unwrap();
        manager
            .add_rule(ProxyRule::new("b.example.com", "100.64.0.2", 443).with_protocol(Protocol::Https))
            .await
            .unwrap();
        manager.set_enabled("a.example.com", false).await.unwrap();
    }

    // Restart
    let reloader = RecordingReloader::new();
    let manager = file_manager(dir.path(), &reloader);
    assert!(manager.list_rules().await.is_empty());

    let report = manager.restore_from_storage().await;
    assert_eq!(report.source, RestoreSource::Snapshot);
    assert_eq!(report.restored, 2);

    let rules = manager.list_rules().await;
    assert_eq!(rules.len(), 2);
    assert!(!rules[0].enabled);
    assert_eq!(rules[1].protocol, Protocol::Https);

    // Config regenerated, version recomputed from scratch, no reload
    let stats = manager.stats().await;
    assert_eq!(stats.config_version, 1);
    assert_eq!(reloader.calls(), 0);
    let deployed = std::fs::read_to_string(dir.path().join("Caddyfile")).unwrap();
    assert!(deployed.contains("reverse_proxy https://100.64.0.2:443"));
    assert!(!deployed.contains("a.example.com"));
}

#[tokio::test]
async fn deployed_config_is_parsed_when_snapshot_missing() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("Caddyfile"),
        "\
:80 {
    @a.example.com host a.example.com
    handle @a.example.com {
        reverse_proxy 100.64.0.1:8080
    }
    @b.example.com host b.example.com
    handle @b.example.com {
        respond \"gone\" 410
    }
    @c.example.com host c.example.com
    handle @c.example.com {
        reverse_proxy https://100.64.0.3:8443
    }
    handle {
        respond \"No route configured\" 404
    }
}
",
    )
    .unwrap();

    let store = MemoryRuleStore::new();
    let reloader = RecordingReloader::new();
    let manager = GatewayManager::new(
        GatewayConfig::new(dir.path().join("Caddyfile")),
        Box::new(store.clone()),
        Box::new(reloader.clone()),
    )
    .unwrap();

    let report = manager.restore_from_storage().await;
    assert_eq!(report.source, RestoreSource::DeployedConfig);
    assert_eq!(report.restored, 2);
    assert_eq!(report.skipped, 1);

    let hostnames: Vec<_> = manager.list_rules().await.into_iter().map(|r| r.hostname).collect();
    assert_eq!(hostnames, vec!["a.example.com", "c.example.com"]);
    assert_eq!(
        manager.get_rule("c.example.com").await.unwrap().protocol,
        Protocol::Https
    );

    // Restored rules were persisted so the next restart uses the snapshot
    assert_eq!(store.len().await, 2);
    assert_eq!(reloader.calls(), 0);
}

#[tokio::test]
async fn corrupted_snapshot_without_backup_falls_back_to_deployed_config() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("rules.json"), "not json at all").unwrap();
    std::fs::write(
        dir.path().join("Caddyfile"),
        "handle @a.example.com {\n    reverse_proxy 100.64.0.1:80\n}\n",
    )
    .unwrap();

    let manager = file_manager(dir.path(), &RecordingReloader::new());
    let report = manager.restore_from_storage().await;

    assert_eq!(report.source, RestoreSource::DeployedConfig);
    assert_eq!(report.restored, 1);

    let store = FileRuleStore::new(dir.path().join("rules.json"), 3);
    assert!(store.load().await.unwrap().contains_key("a.example.com"));
}

#[tokio::test]
async fn snapshot_wins_over_deployed_config() {
    let dir = tempfile::tempdir().unwrap();

    let mut snapshot = meshdns_core::RuleSet::new();
    let rule = ProxyRule::new("snap.example.com", "100.64.0.9", 9000);
    snapshot.insert(rule.hostname.clone(), rule);
    let store = MemoryRuleStore::with_rules(snapshot);

    std::fs::write(
        dir.path().join("Caddyfile"),
        "handle @deployed.example.com {\n    reverse_proxy 100.64.0.1:80\n}\n",
    )
    .unwrap();

    let manager = GatewayManager::new(
        GatewayConfig::new(dir.path().join("Caddyfile")),
        Box::new(store),
        Box::new(RecordingReloader::new()),
    )
    .unwrap();

    let report = manager.restore_from_storage().await;
    assert_eq!(report.source, RestoreSource::Snapshot);

    let hostnames: Vec<_> = manager.list_rules().await.into_iter().map(|r| r.hostname).collect();
    assert_eq!(hostnames, vec!["snap.example.com"]);
}

#[tokio::test]
async fn nothing_to_restore_leaves_filesystem_alone() {
    let dir = tempfile::tempdir().unwrap();
    let manager = file_manager(dir.path(), &RecordingReloader::new());

    let report = manager.restore_from_storage().await;
    assert_eq!(report.source, RestoreSource::Empty);
    assert_eq!(report.restored, 0);
    assert!(dir_entries(dir.path()).is_empty());
}

#[tokio::test]
async fn restore_render_failure_is_reported_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut snapshot = meshdns_core::RuleSet::new();
    let rule = ProxyRule::new("a.example.com", "100.64.0.1", 80);
    snapshot.insert(rule.hostname.clone(), rule);

    let manager = GatewayManager::new(
        GatewayConfig::new(dir.path().join("Caddyfile"))
            .with_template_path(dir.path().join("missing.template")),
        Box::new(MemoryRuleStore::with_rules(snapshot)),
        Box::new(RecordingReloader::new()),
    )
    .unwrap();

    let report = manager.restore_from_storage().await;
    assert_eq!(report.restored, 1);
    assert_eq!(manager.list_rules().await.len(), 1);
    assert_eq!(manager.stats().await.config_version, 0);
}
