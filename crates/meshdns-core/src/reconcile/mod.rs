//! Device-to-DNS reconciliation engine
//!
//! The ReconcileEngine is responsible for:
//! - Fetching the device list from the DeviceDirectory
//! - Diffing each device's assigned address against the assignment cache
//! - Applying add/drop operations through the DnsAuthority
//! - Reloading the authority once per pass
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ DeviceDirectory │─── Vec<Device> ───┐
//! └─────────────────┘                   │
//!                                       ▼
//!                             ┌──────────────────┐
//!                             │ ReconcileEngine  │
//!                             └──────────────────┘
//!                                       │
//!                   ┌───────────────────┴──────────────┐
//!                   │                                  │
//!                   ▼                                  ▼
//!          ┌──────────────────┐              ┌──────────────────┐
//!          │ Assignment cache │              │   DnsAuthority   │
//!          │ (diff)           │              │ (add/drop/reload)│
//!          └──────────────────┘              └──────────────────┘
//! ```
//!
//! ## Pass Flow
//!
//! 1. Fetch devices (the only failure that aborts a pass)
//! 2. Resolve each device's assigned address; excluded devices and devices
//!    without one are skipped
//! 3. Unseen device: add; changed address: drop old then add new. Aliases
//!    follow the primary record
//! 4. Reload the authority exactly once
//! 5. Replace the cache with the devices that ended the pass in sync

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::traits::{Device, DeviceDirectory, DnsAuthority};

/// Label of the record used to probe an already existing zone
const PROBE_LABEL: &str = "_sync_test";

/// What a pass did for a single device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionOutcome {
    /// First time the device was seen; its record was added
    Added,
    /// The address changed; the old record was dropped and the new one added
    Updated { previous: IpAddr },
    /// The cached address still matches
    Unchanged,
    /// The device has no address inside the mesh prefix
    Skipped,
    /// The device is excluded by configuration
    Excluded,
    /// A DNS operation failed
    Failed { error: String },
}

/// Per-device result of a reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceResolution {
    pub hostname: String,
    pub label: String,
    pub address: Option<IpAddr>,
    pub online: bool,
    pub outcome: ResolutionOutcome,
    /// Alias records that could not be written; they never fail the device
    pub alias_errors: Vec<String>,
}

impl DeviceResolution {
    /// Whether the device ended the pass in sync with the authority
    pub fn is_resolved(&self) -> bool {
        matches!(
            self.outcome,
            ResolutionOutcome::Added
                | ResolutionOutcome::Updated { .. }
                | ResolutionOutcome::Unchanged
        )
    }
}

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncResult {
    pub total: usize,
    pub resolved: usize,
    pub skipped: usize,
    pub failed: usize,
    pub resolutions: Vec<DeviceResolution>,
    /// Set when the single end-of-pass reload failed
    pub reload_error: Option<String>,
    /// No device failed and the reload succeeded
    pub success: bool,
}

#[derive(Debug, Default)]
struct SyncState {
    cache: HashMap<String, IpAddr>,
    synced: bool,
}

/// Device-to-DNS reconciliation engine
///
/// All passes serialize on one mutex, so a scheduled resync and a manual
/// trigger never interleave.
pub struct ReconcileEngine {
    directory: Box<dyn DeviceDirectory>,
    authority: Box<dyn DnsAuthority>,
    zone: String,
    address_prefix: String,
    resync_interval: Duration,
    aliases: BTreeMap<String, Vec<String>>,
    excluded_hosts: BTreeSet<String>,
    state: Mutex<SyncState>,
}

impl ReconcileEngine {
    /// Create a new reconciliation engine
    ///
    /// Fails with `Error::Config` when the origin cannot name a zone.
    pub fn new(
        directory: Box<dyn DeviceDirectory>,
        authority: Box<dyn DnsAuthority>,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;

        let zone = config
            .zone_name()
            .ok_or_else(|| Error::config(format!("invalid sync origin '{}'", config.origin)))?
            .to_string();

        Ok(Self {
            directory,
            authority,
            zone,
            address_prefix: config.address_prefix,
            resync_interval: Duration::from_secs(config.resync_interval_secs),
            aliases: config.aliases,
            excluded_hosts: config.excluded_hosts,
            state: Mutex::new(SyncState::default()),
        })
    }

    /// Zone handed to the DNS authority
    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Make sure the zone exists in the authority
    ///
    /// A failed `add_zone` is probed with a test record; if the probe lands
    /// the zone already existed and the call succeeds.
    pub async fn ensure_zone(&self) -> Result<()> {
        match self.authority.add_zone(&self.zone).await {
            Ok(()) => {
                info!("Created zone: {}", self.zone);
                Ok(())
            }
            Err(e) => {
                debug!("add_zone({}) failed, probing: {}", self.zone, e);
                let probe = IpAddr::V4(Ipv4Addr::LOCALHOST);
                if self.authority.add_record(&self.zone, PROBE_LABEL, probe).await.is_ok() {
                    debug!("Zone already exists: {}", self.zone);
                    Ok(())
                } else {
                    Err(e)
                }
            }
        }
    }

    /// Bootstrap: ensure the zone, run the first pass and mark the engine synced
    pub async fn activate(&self) -> Result<SyncResult> {
        info!(
            "Activating reconciliation for zone {} via {} -> {}",
            self.zone,
            self.directory.directory_name(),
            self.authority.authority_name()
        );

        self.ensure_zone().await?;
        self.full_resync().await
    }

    /// Run one reconciliation pass over every device
    ///
    /// Only a failed device fetch returns `Err`. Per-device failures and a
    /// failed reload are reported in the result.
    pub async fn full_resync(&self) -> Result<SyncResult> {
        let mut state = self.state.lock().await;

        let devices = self.directory.list_devices().await.map_err(|e| match e {
            Error::Directory(_) => e,
            other => Error::directory(other.to_string()),
        })?;

        info!("Syncing {} devices into zone {}", devices.len(), self.zone);

        let mut result = SyncResult {
            total: devices.len(),
            ..SyncResult::default()
        };
        let mut next_cache = HashMap::with_capacity(devices.len());

        for device in &devices {
            let cached = state.cache.get(&device.hostname).copied();
            let resolution = self.resolve_device(device, cached).await;

            match &resolution.outcome {
                ResolutionOutcome::Skipped | ResolutionOutcome::Excluded => result.skipped += 1,
                ResolutionOutcome::Failed { .. } => {
                    result.failed += 1;
                    // A failed move keeps the old address so the next pass
                    // retries drop(old) + add(new)
                    if let Some(previous) = cached {
                        next_cache.insert(device.hostname.clone(), previous);
                    }
                }
                _ => {
                    result.resolved += 1;
                    if let Some(address) = resolution.address {
                        next_cache.insert(device.hostname.clone(), address);
                    }
                }
            }

            result.resolutions.push(resolution);
        }

        if let Err(e) = self.authority.reload().await {
            error!("Failed to reload {}: {}", self.authority.authority_name(), e);
            result.reload_error = Some(e.to_string());
        }

        result.success = result.failed == 0 && result.reload_error.is_none();

        state.cache = next_cache;
        state.synced = true;

        info!(
            "Sync complete: {} total, {} resolved, {} skipped, {} failed",
            result.total, result.resolved, result.skipped, result.failed
        );

        Ok(result)
    }

    /// Refresh a single device
    ///
    /// Runs a full pass and returns the resolution for `hostname`.
    pub async fn refresh_device(&self, hostname: &str) -> Result<DeviceResolution> {
        let result = self.full_resync().await?;

        result
            .resolutions
            .into_iter()
            .find(|r| r.hostname == hostname)
            .ok_or_else(|| Error::not_found(format!("device {}", hostname)))
    }

    /// Resync on a fixed interval until `shutdown` fires
    ///
    /// The first tick comes one interval after the call; bootstrap already
    /// ran a pass.
    pub async fn run_scheduled(&self, mut shutdown: oneshot::Receiver<()>) {
        let mut interval = tokio::time::interval_at(
            Instant::now() + self.resync_interval,
            self.resync_interval,
        );
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = IntervalStream::new(interval);

        info!("Scheduled resync every {}s", self.resync_interval.as_secs());

        loop {
            tokio::select! {
                Some(_) = ticks.next() => {
                    match self.full_resync().await {
                        Ok(result) if !result.success => {
                            warn!(
                                "Scheduled resync incomplete: {} failed, reload error: {:?}",
                                result.failed, result.reload_error
                            );
                        }
                        Ok(_) => debug!("Scheduled resync succeeded"),
                        Err(e) => error!("Scheduled resync failed: {}", e),
                    }
                }

                _ = &mut shutdown => {
                    info!("Scheduled resync stopped");
                    break;
                }
            }
        }
    }

    /// Whether at least one pass has completed
    pub async fn is_synced(&self) -> bool {
        self.state.lock().await.synced
    }

    /// Copy of the assignment cache
    pub async fn assignments(&self) -> HashMap<String, IpAddr> {
        self.state.lock().await.cache.clone()
    }

    async fn resolve_device(&self, device: &Device, cached: Option<IpAddr>) -> DeviceResolution {
        let label = device.record_label();
        let address = device.assigned_address(&self.address_prefix);

        let mut resolution = DeviceResolution {
            hostname: device.hostname.clone(),
            label: label.clone(),
            address,
            online: device.online,
            outcome: ResolutionOutcome::Skipped,
            alias_errors: Vec::new(),
        };

        if self.excluded_hosts.contains(&device.hostname) || self.excluded_hosts.contains(&label) {
            debug!("Skipping {}: excluded by configuration", device.hostname);
            resolution.outcome = ResolutionOutcome::Excluded;
            return resolution;
        }

        let Some(address) = address else {
            debug!("Skipping {}: no address with prefix {}", device.hostname, self.address_prefix);
            return resolution;
        };

        resolution.outcome = match cached {
            Some(previous) if previous == address => ResolutionOutcome::Unchanged,
            Some(previous) => match self.replace_record(&label, previous, address).await {
                Ok(()) => {
                    info!("Updated {} -> {} (previous: {})", label, address, previous);
                    ResolutionOutcome::Updated { previous }
                }
                Err(e) => {
                    error!("Failed to update record for {}: {}", device.hostname, e);
                    ResolutionOutcome::Failed { error: e.to_string() }
                }
            },
            None => match self.authority.add_record(&self.zone, &label, address).await {
                Ok(()) => {
                    info!("Added {} -> {}", label, address);
                    ResolutionOutcome::Added
                }
                Err(e) => {
                    error!("Failed to add record for {}: {}", device.hostname, e);
                    ResolutionOutcome::Failed { error: e.to_string() }
                }
            },
        };

        let previous = match resolution.outcome {
            ResolutionOutcome::Added => None,
            ResolutionOutcome::Updated { previous } => Some(previous),
            _ => return resolution,
        };

        for alias in self.device_aliases(device, &label) {
            let applied = match previous {
                Some(previous) => self.replace_record(alias, previous, address).await,
                None => self.authority.add_record(&self.zone, alias, address).await,
            };
            match applied {
                Ok(()) => debug!("Alias {} -> {}", alias, address),
                Err(e) => {
                    warn!("Failed to write alias {} for {}: {}", alias, device.hostname, e);
                    resolution.alias_errors.push(format!("{}: {}", alias, e));
                }
            }
        }

        resolution
    }

    fn device_aliases(&self, device: &Device, label: &str) -> &[String] {
        self.aliases
            .get(&device.hostname)
            .or_else(|| self.aliases.get(label))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    async fn replace_record(&self, label: &str, previous: IpAddr, address: IpAddr) -> Result<()> {
        self.authority.drop_record(&self.zone, label, previous).await?;
        self.authority.add_record(&self.zone, label, address).await
    }
}
