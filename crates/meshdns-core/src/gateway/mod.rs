//! Gateway rule manager
//!
//! The GatewayManager owns the reverse-proxy rule set and keeps three
//! artifacts in step on every mutation:
//!
//! ```text
//!  add_rule / remove_rule / set_enabled
//!                 │
//!                 ▼
//!        ┌─────────────────┐   render    ┌──────────────────┐
//!        │  rule set (mem) │ ──────────▶ │ config (string)  │
//!        └─────────────────┘             └──────────────────┘
//!                 │ save                          │ deploy (temp + rename)
//!                 ▼                               ▼
//!        ┌─────────────────┐             ┌──────────────────┐
//!        │    RuleStore    │             │ deployed config  │──▶ GatewayReloader
//!        └─────────────────┘             └──────────────────┘
//! ```
//!
//! A render, save or deploy failure restores the previous rule set and leaves
//! the deployed file untouched. A reload failure happens after everything is
//! committed and is reported without rolling back.

pub mod reloader;
pub mod render;
pub mod restore;
pub mod rule;

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::{Error, Result};
use crate::traits::{GatewayReloader, RuleSet, RuleStore};

use render::{DEFAULT_TEMPLATE, Template, TemplateContext};
use rule::{ProxyRule, validate_hostname};

/// Snapshot of the manager's counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub enabled: bool,
    pub total_rules: usize,
    pub enabled_rules: usize,
    /// Number of successful config generations since start
    pub config_version: u64,
    pub last_generated: Option<DateTime<Utc>>,
}

/// Where restored rules came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreSource {
    /// The durable rule snapshot
    Snapshot,
    /// Parsed out of the deployed configuration file
    DeployedConfig,
    /// Nothing to restore
    Empty,
    /// The gateway subsystem is disabled
    Disabled,
}

/// Outcome of [`GatewayManager::restore_from_storage`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    pub source: RestoreSource,
    pub restored: usize,
    pub skipped: usize,
}

impl RestoreReport {
    fn new(source: RestoreSource) -> Self {
        Self {
            source,
            restored: 0,
            skipped: 0,
        }
    }
}

#[derive(Debug, Default)]
struct GatewayState {
    rules: RuleSet,
    version: u64,
    last_generated: Option<DateTime<Utc>>,
}

struct ActiveGateway {
    config_path: PathBuf,
    template_path: Option<PathBuf>,
    listen_port: u16,
    store: Box<dyn RuleStore>,
    reloader: Box<dyn GatewayReloader>,
    state: RwLock<GatewayState>,
}

/// Reverse-proxy rule manager
///
/// A disabled manager holds nothing: every mutation is a successful no-op and
/// no file is read or written.
pub struct GatewayManager {
    active: Option<ActiveGateway>,
}

impl GatewayManager {
    /// Create a gateway manager
    ///
    /// Never touches the filesystem; call [`restore_from_storage`] to load
    /// previously committed rules.
    ///
    /// [`restore_from_storage`]: GatewayManager::restore_from_storage
    pub fn new(
        config: GatewayConfig,
        store: Box<dyn RuleStore>,
        reloader: Box<dyn GatewayReloader>,
    ) -> Result<Self> {
        if !config.enabled {
            info!("Gateway rule manager disabled");
            return Ok(Self::disabled());
        }

        config.validate()?;

        info!(
            "Gateway rule manager: config {}, store {}, reloader {}",
            config.config_path.display(),
            store.location(),
            reloader.reloader_name()
        );

        Ok(Self {
            active: Some(ActiveGateway {
                config_path: config.config_path,
                template_path: config.template_path,
                listen_port: config.listen_port,
                store,
                reloader,
                state: RwLock::new(GatewayState::default()),
            }),
        })
    }

    /// A manager with the subsystem switched off
    pub fn disabled() -> Self {
        Self { active: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.active.is_some()
    }

    /// Add a rule, or overwrite the rule with the same hostname
    pub async fn add_rule(&self, rule: ProxyRule) -> Result<()> {
        let Some(active) = &self.active else {
            return Ok(());
        };

        rule.validate()?;

        let mut state = active.state.write().await;
        let previous = state.rules.clone();
        let hostname = rule.hostname.clone();
        state.rules.insert(hostname.clone(), rule);

        active.commit(&mut state, previous).await?;
        info!("Added gateway rule for {}", hostname);
        Ok(())
    }

    /// Remove a rule; removing an absent hostname succeeds without changes
    pub async fn remove_rule(&self, hostname: &str) -> Result<()> {
        let Some(active) = &self.active else {
            return Ok(());
        };

        validate_hostname(hostname)?;

        let mut state = active.state.write().await;
        if !state.rules.contains_key(hostname) {
            debug!("No gateway rule for {}, nothing to remove", hostname);
            return Ok(());
        }

        let previous = state.rules.clone();
        state.rules.remove(hostname);

        active.commit(&mut state, previous).await?;
        info!("Removed gateway rule for {}", hostname);
        Ok(())
    }

    /// Enable or disable an existing rule
    pub async fn set_enabled(&self, hostname: &str, enabled: bool) -> Result<()> {
        let Some(active) = &self.active else {
            return Ok(());
        };

        validate_hostname(hostname)?;

        let mut state = active.state.write().await;
        let previous = state.rules.clone();
        let rule = state
            .rules
            .get_mut(hostname)
            .ok_or_else(|| Error::not_found(format!("gateway rule for {}", hostname)))?;
        rule.enabled = enabled;

        active.commit(&mut state, previous).await?;
        info!(
            "{} gateway rule for {}",
            if enabled { "Enabled" } else { "Disabled" },
            hostname
        );
        Ok(())
    }

    /// Copy of every rule, sorted by hostname
    pub async fn list_rules(&self) -> Vec<ProxyRule> {
        let Some(active) = &self.active else {
            return Vec::new();
        };
        active.state.read().await.rules.values().cloned().collect()
    }

    /// Copy of a single rule
    pub async fn get_rule(&self, hostname: &str) -> Option<ProxyRule> {
        let active = self.active.as_ref()?;
        active.state.read().await.rules.get(hostname).cloned()
    }

    pub async fn stats(&self) -> GatewayStats {
        let Some(active) = &self.active else {
            return GatewayStats::default();
        };

        let state = active.state.read().await;
        GatewayStats {
            enabled: true,
            total_rules: state.rules.len(),
            enabled_rules: state.rules.values().filter(|r| r.enabled).count(),
            config_version: state.version,
            last_generated: state.last_generated,
        }
    }

    /// Render the current rules and deploy the result
    ///
    /// A template failure leaves the deployed file untouched.
    pub async fn generate(&self) -> Result<()> {
        let Some(active) = &self.active else {
            return Ok(());
        };

        let mut state = active.state.write().await;
        let (rendered, generated_at) = active.render(&state).await?;
        active.deploy(&rendered).await?;
        state.version += 1;
        state.last_generated = Some(generated_at);
        Ok(())
    }

    /// Ask the gateway to pick up the deployed config
    pub async fn reload(&self) -> Result<()> {
        let Some(active) = &self.active else {
            return Ok(());
        };
        active.reload().await
    }

    /// Reinstall committed rules after a restart
    ///
    /// Prefers the durable snapshot; falls back to parsing the deployed
    /// config when the snapshot is missing, empty or unreadable. Problems are
    /// logged and reported, never returned. The gateway is not reloaded.
    pub async fn restore_from_storage(&self) -> RestoreReport {
        let Some(active) = &self.active else {
            return RestoreReport::new(RestoreSource::Disabled);
        };

        let mut state = active.state.write().await;

        let snapshot = match active.store.load().await {
            Ok(rules) => rules,
            Err(e) => {
                warn!("Failed to load rule snapshot from {}: {}", active.store.location(), e);
                RuleSet::new()
            }
        };

        let report = if !snapshot.is_empty() {
            let mut report = RestoreReport::new(RestoreSource::Snapshot);
            report.restored = snapshot.len();
            state.rules = snapshot;
            report
        } else {
            match active.restore_from_deployed().await {
                Some(parsed) if !parsed.rules.is_empty() || !parsed.skipped.is_empty() => {
                    let mut report = RestoreReport::new(RestoreSource::DeployedConfig);
                    report.restored = parsed.rules.len();
                    report.skipped = parsed.skipped.len();
                    state.rules = parsed
                        .rules
                        .into_iter()
                        .map(|rule| (rule.hostname.clone(), rule))
                        .collect();
                    report
                }
                _ => RestoreReport::new(RestoreSource::Empty),
            }
        };

        if report.source == RestoreSource::DeployedConfig && report.restored > 0 {
            if let Err(e) = active.store.save(&state.rules).await {
                warn!("Failed to persist rules restored from deployed config: {}", e);
            }
        }

        if report.restored > 0 {
            match active.render(&state).await {
                Ok((rendered, generated_at)) => match active.deploy(&rendered).await {
                    Ok(()) => {
                        state.version += 1;
                        state.last_generated = Some(generated_at);
                    }
                    Err(e) => warn!("Failed to deploy restored gateway config: {}", e),
                },
                Err(e) => warn!("Failed to render restored gateway config: {}", e),
            }
        }

        info!(
            "Restored {} gateway rules ({:?}, {} skipped)",
            report.restored, report.source, report.skipped
        );
        report
    }
}

impl ActiveGateway {
    /// Render, persist, deploy, then reload
    ///
    /// `previous` is reinstated if anything before the reload fails.
    async fn commit(&self, state: &mut GatewayState, previous: RuleSet) -> Result<()> {
        let (rendered, generated_at) = match self.render(state).await {
            Ok(rendered) => rendered,
            Err(e) => {
                state.rules = previous;
                return Err(e);
            }
        };

        if let Err(e) = self.store.save(&state.rules).await {
            state.rules = previous;
            return Err(e);
        }

        if let Err(e) = self.deploy(&rendered).await {
            if let Err(restore_err) = self.store.save(&previous).await {
                warn!("Failed to re-save previous rule snapshot: {}", restore_err);
            }
            state.rules = previous;
            return Err(e);
        }

        state.version += 1;
        state.last_generated = Some(generated_at);

        self.reload().await
    }

    async fn render(&self, state: &GatewayState) -> Result<(String, DateTime<Utc>)> {
        let source = match &self.template_path {
            Some(path) => fs::read_to_string(path).await.map_err(|e| {
                Error::template(format!("failed to read gateway template {}: {}", path.display(), e))
            })?,
            None => DEFAULT_TEMPLATE.to_string(),
        };

        let generated_at = Utc::now();
        let ctx = TemplateContext {
            generated_at: generated_at.to_rfc3339(),
            version: state.version + 1,
            port: self.listen_port,
            rules: state.rules.values().filter(|r| r.enabled).cloned().collect(),
        };

        let rendered = Template::parse(&source)?.render(&ctx)?;
        debug!("Rendered gateway config with {} rules", ctx.rules.len());
        Ok((rendered, generated_at))
    }

    /// Atomically replace the deployed config
    async fn deploy(&self, rendered: &str) -> Result<()> {
        if let Some(parent) = self.config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = temp_path(&self.config_path);
        fs::write(&temp_path, rendered).await?;

        if let Err(e) = fs::rename(&temp_path, &self.config_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!("Deployed gateway config to {}", self.config_path.display());
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        self.reloader
            .reload(&self.config_path)
            .await
            .map_err(|e| match e {
                Error::Reload(_) => e,
                other => Error::reload(other.to_string()),
            })
    }

    async fn restore_from_deployed(&self) -> Option<restore::ParsedConfig> {
        match fs::read_to_string(&self.config_path).await {
            Ok(content) => Some(restore::parse_deployed_config(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No deployed gateway config at {}", self.config_path.display());
                None
            }
            Err(e) => {
                warn!(
                    "Failed to read deployed gateway config {}: {}",
                    self.config_path.display(),
                    e
                );
                None
            }
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
