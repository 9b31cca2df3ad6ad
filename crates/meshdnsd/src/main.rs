// # meshdnsd - mesh DNS daemon
//
// Thin integration layer: all reconciliation and gateway logic lives in
// meshdns-core. The daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Wiring the Tailscale directory, the zone-file authority and the rule store
// 4. Bootstrapping DNS, restoring gateway rules and running the resync timer
//
// ## Configuration
//
// ### Reconciliation
// - `MESHDNS_ORIGIN`: Internal zone FQDN, e.g. `internal.example.com` (required)
// - `MESHDNS_ADDRESS_PREFIX`: Mesh address prefix (default `100.`)
// - `MESHDNS_RESYNC_INTERVAL_SECS`: Seconds between scheduled resyncs (default 300)
// - `MESHDNS_EXCLUDED_HOSTS`: Comma-separated devices kept out of DNS (optional)
// - `MESHDNS_DEVICE_ALIASES`: Extra labels, `nas=files,backup;laptop=dev` (optional)
//
// ### Device Directory
// - `TAILSCALE_API_KEY`: API key (required)
// - `TAILSCALE_TAILNET`: Tailnet name (required)
// - `TAILSCALE_BASE_URL`: API endpoint (default `https://api.tailscale.com`)
//
// ### DNS Authority
// - `MESHDNS_ZONES_DIR`: Directory holding zone files (default `/etc/coredns/zones`)
// - `MESHDNS_DNS_RELOAD_COMMAND`: Command run after each pass (optional)
//
// ### Gateway
// - `MESHDNS_GATEWAY_ENABLED`: `true`/`false` (default true)
// - `MESHDNS_GATEWAY_CONFIG_PATH`: Rendered config (default `/app/configs/Caddyfile`)
// - `MESHDNS_GATEWAY_TEMPLATE_PATH`: Template file (built-in template if unset)
// - `MESHDNS_GATEWAY_LISTEN_PORT`: Listen port (default 80)
// - `MESHDNS_GATEWAY_RELOADER`: supervisor, caddy, command, none (default supervisor)
// - `MESHDNS_GATEWAY_SUPERVISOR_PROGRAM`: Supervisor program name (default caddy)
// - `MESHDNS_GATEWAY_CADDY_BINARY`: Caddy binary (default `/usr/local/bin/caddy`)
// - `MESHDNS_GATEWAY_RELOAD_COMMAND`: Command for the `command` reloader, `{config}` is substituted
//
// ### Rule Store
// - `MESHDNS_RULES_STORE_TYPE`: file, memory (default file)
// - `MESHDNS_RULES_STORE_PATH`: Snapshot path (default `data/proxy_rules.json`)
// - `MESHDNS_RULES_BACKUP_COUNT`: Snapshot backups kept (default 3)
//
// ### Logging
// - `MESHDNS_LOG_LEVEL`: trace, debug, info, warn, error (default info)
//
// ## Example
//
// ```bash
// export MESHDNS_ORIGIN=internal.example.com
// export TAILSCALE_API_KEY=tskey-api-...
// export TAILSCALE_TAILNET=example.com
// export MESHDNS_ZONES_DIR=/etc/coredns/zones
//
// meshdnsd
// ```

use anyhow::{Context, Result};
use meshdns_authority_zonefile::ZoneFileAuthority;
use meshdns_core::config::{GatewayConfig, MeshDnsConfig, RuleStorageConfig, SyncConfig};
use meshdns_core::traits::{GatewayReloader, RuleStore};
use meshdns_core::{
    CommandReloader, FileRuleStore, GatewayManager, MemoryRuleStore, NoopReloader,
    ReconcileEngine,
};
use meshdns_directory_tailscale::TailscaleDirectory;
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum MeshDnsExitCode {
    CleanShutdown = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<MeshDnsExitCode> for ExitCode {
    fn from(code: MeshDnsExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// How the gateway is told to pick up a new config
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReloaderKind {
    Supervisor(String),
    Caddy(String),
    Command(Vec<String>),
    None,
}

/// Application configuration
struct Config {
    core: MeshDnsConfig,
    tailscale_api_key: String,
    tailscale_tailnet: String,
    tailscale_base_url: Option<String>,
    zones_dir: PathBuf,
    dns_reload_command: Vec<String>,
    reloader: ReloaderKind,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        let mut sync = SyncConfig::new(env::var("MESHDNS_ORIGIN").unwrap_or_default())
            .with_address_prefix(
                env::var("MESHDNS_ADDRESS_PREFIX").unwrap_or_else(|_| "100.".to_string()),
            )
            .with_resync_interval_secs(env_parse("MESHDNS_RESYNC_INTERVAL_SECS", 300)?);

        sync.excluded_hosts = split_list(
            &env::var("MESHDNS_EXCLUDED_HOSTS").unwrap_or_default(),
            ',',
        )
        .into_iter()
        .collect();
        sync.aliases = parse_aliases(&env::var("MESHDNS_DEVICE_ALIASES").unwrap_or_default())?;

        let storage = match env::var("MESHDNS_RULES_STORE_TYPE")
            .unwrap_or_else(|_| "file".to_string())
            .as_str()
        {
            "file" => RuleStorageConfig::File {
                path: env::var("MESHDNS_RULES_STORE_PATH")
                    .unwrap_or_else(|_| "data/proxy_rules.json".to_string())
                    .into(),
                backup_count: env_parse(
                    "MESHDNS_RULES_BACKUP_COUNT",
                    meshdns_core::config::default_backup_count(),
                )?,
            },
            "memory" => RuleStorageConfig::Memory,
            other => anyhow::bail!(
                "MESHDNS_RULES_STORE_TYPE '{}' is not supported. \
                Supported types: file, memory",
                other
            ),
        };

        let mut gateway = GatewayConfig::default();
        gateway.enabled = env_parse("MESHDNS_GATEWAY_ENABLED", true)?;
        if let Ok(path) = env::var("MESHDNS_GATEWAY_CONFIG_PATH") {
            gateway.config_path = path.into();
        }
        gateway.template_path = env::var("MESHDNS_GATEWAY_TEMPLATE_PATH")
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        gateway.listen_port = env_parse("MESHDNS_GATEWAY_LISTEN_PORT", 80)?;
        gateway.storage = storage;

        let reloader = match env::var("MESHDNS_GATEWAY_RELOADER")
            .unwrap_or_else(|_| "supervisor".to_string())
            .as_str()
        {
            "supervisor" => ReloaderKind::Supervisor(
                env::var("MESHDNS_GATEWAY_SUPERVISOR_PROGRAM")
                    .unwrap_or_else(|_| "caddy".to_string()),
            ),
            "caddy" => ReloaderKind::Caddy(
                env::var("MESHDNS_GATEWAY_CADDY_BINARY")
                    .unwrap_or_else(|_| "/usr/local/bin/caddy".to_string()),
            ),
            "command" => ReloaderKind::Command(split_command(
                &env::var("MESHDNS_GATEWAY_RELOAD_COMMAND").unwrap_or_default(),
            )),
            "none" => ReloaderKind::None,
            other => anyhow::bail!(
                "MESHDNS_GATEWAY_RELOADER '{}' is not supported. \
                Supported reloaders: supervisor, caddy, command, none",
                other
            ),
        };

        Ok(Self {
            core: MeshDnsConfig { sync, gateway },
            tailscale_api_key: env::var("TAILSCALE_API_KEY").unwrap_or_default(),
            tailscale_tailnet: env::var("TAILSCALE_TAILNET").unwrap_or_default(),
            tailscale_base_url: env::var("TAILSCALE_BASE_URL").ok().filter(|u| !u.is_empty()),
            zones_dir: env::var("MESHDNS_ZONES_DIR")
                .unwrap_or_else(|_| "/etc/coredns/zones".to_string())
                .into(),
            dns_reload_command: split_command(
                &env::var("MESHDNS_DNS_RELOAD_COMMAND").unwrap_or_default(),
            ),
            reloader,
            log_level: env::var("MESHDNS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.core.sync.origin.is_empty() {
            anyhow::bail!(
                "MESHDNS_ORIGIN is required. \
                Set it via: export MESHDNS_ORIGIN=internal.example.com"
            );
        }

        self.core
            .validate()
            .map_err(|e| anyhow::anyhow!("{}", e))?;

        if !(10..=86_400).contains(&self.core.sync.resync_interval_secs) {
            anyhow::bail!(
                "MESHDNS_RESYNC_INTERVAL_SECS must be between 10 and 86400 seconds. Got: {}",
                self.core.sync.resync_interval_secs
            );
        }

        if self.tailscale_api_key.is_empty() {
            anyhow::bail!(
                "TAILSCALE_API_KEY is required. \
                Set it via: export TAILSCALE_API_KEY=tskey-api-..."
            );
        }

        if self.tailscale_tailnet.is_empty() {
            anyhow::bail!("TAILSCALE_TAILNET is required");
        }

        if let Some(ref url) = self.tailscale_base_url {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                anyhow::bail!("TAILSCALE_BASE_URL must use HTTP or HTTPS scheme. Got: {}", url);
            }
        }

        if let ReloaderKind::Command(ref command) = self.reloader {
            if self.core.gateway.enabled && command.is_empty() {
                anyhow::bail!(
                    "MESHDNS_GATEWAY_RELOAD_COMMAND is required when MESHDNS_GATEWAY_RELOADER=command"
                );
            }
        }

        // Validate log level
        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "MESHDNS_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }

    /// Base domain the zone lives under (`internal.example.com` -> `example.com`)
    fn base_domain(&self) -> String {
        let origin = self.core.sync.origin.trim_end_matches('.');
        origin
            .split_once('.')
            .map(|(_, rest)| rest.to_string())
            .unwrap_or_default()
    }
}

/// Parse an optional environment variable, falling back to `default` when unset
fn env_parse<T: FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", name, value, e)),
        _ => Ok(default),
    }
}

fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

fn split_list(value: &str, separator: char) -> Vec<String> {
    value
        .split(separator)
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `device=alias1,alias2;device2=alias3`
fn parse_aliases(value: &str) -> Result<BTreeMap<String, Vec<String>>> {
    let mut aliases = BTreeMap::new();
    for entry in split_list(value, ';') {
        let Some((device, labels)) = entry.split_once('=') else {
            anyhow::bail!(
                "MESHDNS_DEVICE_ALIASES entry '{}' must look like device=alias1,alias2",
                entry
            );
        };
        let device = device.trim();
        if device.is_empty() {
            anyhow::bail!("MESHDNS_DEVICE_ALIASES entry '{}' has no device name", entry);
        }
        aliases
            .entry(device.to_string())
            .or_insert_with(Vec::new)
            .extend(split_list(labels, ','));
    }
    Ok(aliases)
}

fn main() -> ExitCode {
    // Load configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return MeshDnsExitCode::ConfigError.into();
        }
    };

    // Validate configuration
    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return MeshDnsExitCode::ConfigError.into();
    }

    // Initialize tracing
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return MeshDnsExitCode::ConfigError.into();
    }

    info!("Starting meshdnsd for {}", config.core.sync.origin);

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return MeshDnsExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        match build(&config) {
            Ok((engine, gateway)) => match run_daemon(engine, gateway).await {
                Ok(()) => MeshDnsExitCode::CleanShutdown,
                Err(e) => {
                    error!("Daemon error: {:#}", e);
                    MeshDnsExitCode::RuntimeError
                }
            },
            Err(e) => {
                error!("Startup error: {:#}", e);
                MeshDnsExitCode::ConfigError
            }
        }
    });

    result.into()
}

/// Construct the engine and the gateway manager from the configuration
fn build(config: &Config) -> Result<(Arc<ReconcileEngine>, GatewayManager)> {
    let directory = match &config.tailscale_base_url {
        Some(url) => TailscaleDirectory::with_base_url(
            &config.tailscale_api_key,
            &config.tailscale_tailnet,
            url,
        ),
        None => TailscaleDirectory::new(&config.tailscale_api_key, &config.tailscale_tailnet),
    }
    .context("failed to create Tailscale directory")?;

    let authority = ZoneFileAuthority::new(&config.zones_dir, config.base_domain())
        .with_reload_command(config.dns_reload_command.clone());

    let engine = ReconcileEngine::new(
        Box::new(directory),
        Box::new(authority),
        config.core.sync.clone(),
    )
    .context("failed to create reconciliation engine")?;

    let store: Box<dyn RuleStore> = match &config.core.gateway.storage {
        RuleStorageConfig::File { path, backup_count } => {
            Box::new(FileRuleStore::new(path, *backup_count))
        }
        RuleStorageConfig::Memory => Box::new(MemoryRuleStore::new()),
    };

    let reloader: Box<dyn GatewayReloader> = match &config.reloader {
        ReloaderKind::Supervisor(program) => Box::new(CommandReloader::supervisor(program)),
        ReloaderKind::Caddy(binary) => Box::new(CommandReloader::caddy(binary)),
        ReloaderKind::Command(command) => Box::new(CommandReloader::new(vec![command.clone()])),
        ReloaderKind::None => Box::new(NoopReloader),
    };

    let gateway = GatewayManager::new(config.core.gateway.clone(), store, reloader)
        .context("failed to create gateway manager")?;

    Ok((Arc::new(engine), gateway))
}

/// Run the daemon until SIGTERM/SIGINT
async fn run_daemon(engine: Arc<ReconcileEngine>, gateway: GatewayManager) -> Result<()> {
    match engine.activate().await {
        Ok(result) if result.success => info!(
            "Initial sync: {} resolved, {} skipped",
            result.resolved, result.skipped
        ),
        Ok(result) => warn!(
            "Initial sync incomplete: {} failed, reload error: {:?}",
            result.failed, result.reload_error
        ),
        // The scheduled resync keeps trying
        Err(e) => warn!("Initial sync failed: {}", e),
    }

    let report = gateway.restore_from_storage().await;
    if gateway.is_enabled() {
        info!(
            "Gateway ready: {} rules restored from {:?} ({} skipped)",
            report.restored, report.source, report.skipped
        );
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let scheduler = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run_scheduled(shutdown_rx).await })
    };

    let signal = wait_for_shutdown().await?;
    info!("Received shutdown signal: {}", signal);

    let _ = shutdown_tx.send(());
    scheduler.await.context("scheduled resync task panicked")?;

    info!("Shutting down daemon");
    Ok(())
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(origin: &str) -> Config {
        Config {
            core: MeshDnsConfig {
                sync: SyncConfig::new(origin),
                gateway: GatewayConfig::disabled(),
            },
            tailscale_api_key: "tskey-api-test".to_string(),
            tailscale_tailnet: "example.com".to_string(),
            tailscale_base_url: None,
            zones_dir: PathBuf::from("/tmp/zones"),
            dns_reload_command: Vec::new(),
            reloader: ReloaderKind::None,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn test_base_domain() {
        assert_eq!(config("internal.example.com").base_domain(), "example.com");
        assert_eq!(config("internal.example.com.").base_domain(), "example.com");
    }

    #[test]
    fn test_validation() {
        assert!(config("internal.example.com").validate().is_ok());
        assert!(config("").validate().is_err());
        assert!(config("example.com").validate().is_err());

        let mut missing_key = config("internal.example.com");
        missing_key.tailscale_api_key.clear();
        assert!(missing_key.validate().is_err());

        let mut bad_level = config("internal.example.com");
        bad_level.log_level = "verbose".to_string();
        assert!(bad_level.validate().is_err());
    }

    #[test]
    fn test_command_reloader_requires_command() {
        let mut cfg = config("internal.example.com");
        cfg.core.gateway = GatewayConfig::new("/tmp/Caddyfile");
        cfg.reloader = ReloaderKind::Command(Vec::new());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_split_command() {
        assert_eq!(
            split_command("  docker kill -s HUP coredns "),
            vec!["docker", "kill", "-s", "HUP", "coredns"]
        );
        assert!(split_command("").is_empty());
    }

    #[test]
    fn test_parse_aliases() {
        let aliases = parse_aliases("nas=files, backup ; laptop=dev").unwrap();
        assert_eq!(aliases["nas"], vec!["files", "backup"]);
        assert_eq!(aliases["laptop"], vec!["dev"]);

        assert!(parse_aliases("").unwrap().is_empty());
        assert!(parse_aliases("nas").is_err());
        assert!(parse_aliases("=files").is_err());
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" lab, ,printer ", ','), vec!["lab", "printer"]);
    }
}
