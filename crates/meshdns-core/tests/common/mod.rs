//! Test doubles and common utilities for contract tests
//!
//! Every double is `Clone` and shares its counters across clones, so a test
//! can hand one clone to an engine and keep another for assertions.

#![allow(dead_code)]

use meshdns_core::Error;
use meshdns_core::config::SyncConfig;
use meshdns_core::traits::{Device, DeviceDirectory, DnsAuthority, GatewayReloader};
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ORIGIN: &str = "internal.example.com";
pub const ZONE: &str = "internal";

pub fn sync_config() -> SyncConfig {
    SyncConfig::new(ORIGIN)
}

pub fn device(hostname: &str, addresses: &[&str]) -> Device {
    Device::new(hostname, addresses.iter().map(|a| a.to_string()).collect())
}

pub fn ip(addr: &str) -> IpAddr {
    addr.parse().unwrap()
}

/// A device directory whose listing the test controls
#[derive(Clone, Default)]
pub struct ScriptedDirectory {
    devices: Arc<Mutex<Vec<Device>>>,
    fail: Arc<AtomicBool>,
    delay: Arc<Mutex<Option<Duration>>>,
    list_calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedDirectory {
    pub fn new(devices: Vec<Device>) -> Self {
        let directory = Self::default();
        directory.set_devices(devices);
        directory
    }

    pub fn set_devices(&self, devices: Vec<Device>) {
        *self.devices.lock().unwrap() = devices;
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Make every listing take at least `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Highest number of listings observed running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl DeviceDirectory for ScriptedDirectory {
    async fn list_devices(&self) -> Result<Vec<Device>, Error> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::directory("directory unavailable"));
        }
        Ok(self.devices.lock().unwrap().clone())
    }

    fn directory_name(&self) -> &'static str {
        "scripted"
    }
}

/// One call observed by [`RecordingAuthority`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityCall {
    AddZone(String),
    Add(String, String, IpAddr),
    Drop(String, String, IpAddr),
    Reload,
}

/// A DNS authority that records every call and fails on request
#[derive(Clone, Default)]
pub struct RecordingAuthority {
    calls: Arc<Mutex<Vec<AuthorityCall>>>,
    failing_labels: Arc<Mutex<HashSet<String>>>,
    zone_exists: Arc<AtomicBool>,
    probe_fails: Arc<AtomicBool>,
    reload_fails: Arc<AtomicBool>,
}

impl RecordingAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<AuthorityCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn adds(&self) -> Vec<AuthorityCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, AuthorityCall::Add(..)))
            .collect()
    }

    pub fn drops(&self) -> Vec<AuthorityCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, AuthorityCall::Drop(..)))
            .collect()
    }

    pub fn reloads(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, AuthorityCall::Reload))
            .count()
    }

    /// Make add/drop calls for `label` fail
    pub fn fail_label(&self, label: &str) {
        self.failing_labels.lock().unwrap().insert(label.to_string());
    }

    pub fn heal_label(&self, label: &str) {
        self.failing_labels.lock().unwrap().remove(label);
    }

    /// Make `add_zone` fail as if the zone were already there
    pub fn set_zone_exists(&self, exists: bool) {
        self.zone_exists.store(exists, Ordering::SeqCst);
    }

    /// Make the bootstrap probe record fail too
    pub fn set_probe_fails(&self, fails: bool) {
        self.probe_fails.store(fails, Ordering::SeqCst);
    }

    pub fn set_reload_fails(&self, fails: bool) {
        self.reload_fails.store(fails, Ordering::SeqCst);
    }

    fn record(&self, call: AuthorityCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn label_fails(&self, label: &str) -> bool {
        if label == "_sync_test" {
            return self.probe_fails.load(Ordering::SeqCst);
        }
        self.failing_labels.lock().unwrap().contains(label)
    }
}

#[async_trait::async_trait]
impl DnsAuthority for RecordingAuthority {
    async fn add_zone(&self, zone: &str) -> Result<(), Error> {
        self.record(AuthorityCall::AddZone(zone.to_string()));
        if self.zone_exists.load(Ordering::SeqCst) {
            return Err(Error::already_exists(format!("zone {}", zone)));
        }
        Ok(())
    }

    async fn add_record(&self, zone: &str, label: &str, ip: IpAddr) -> Result<(), Error> {
        self.record(AuthorityCall::Add(zone.to_string(), label.to_string(), ip));
        if self.label_fails(label) {
            return Err(Error::dns_authority(format!("add {} failed", label)));
        }
        Ok(())
    }

    async fn drop_record(&self, zone: &str, label: &str, ip: IpAddr) -> Result<(), Error> {
        self.record(AuthorityCall::Drop(zone.to_string(), label.to_string(), ip));
        if self.label_fails(label) {
            return Err(Error::dns_authority(format!("drop {} failed", label)));
        }
        Ok(())
    }

    async fn reload(&self) -> Result<(), Error> {
        self.record(AuthorityCall::Reload);
        if self.reload_fails.load(Ordering::SeqCst) {
            return Err(Error::dns_authority("reload failed"));
        }
        Ok(())
    }

    fn authority_name(&self) -> &'static str {
        "recording"
    }
}

/// A gateway reloader that counts calls and fails on request
#[derive(Clone, Default)]
pub struct RecordingReloader {
    calls: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
    last_path: Arc<Mutex<Option<PathBuf>>>,
}

impl RecordingReloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let reloader = Self::default();
        reloader.set_failing(true);
        reloader
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_path(&self) -> Option<PathBuf> {
        self.last_path.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl GatewayReloader for RecordingReloader {
    async fn reload(&self, config_path: &Path) -> Result<(), Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_path.lock().unwrap() = Some(config_path.to_path_buf());
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::reload("gateway refused the new config"));
        }
        Ok(())
    }

    fn reloader_name(&self) -> &'static str {
        "recording"
    }
}

/// Names of every entry in `dir`, sorted
pub fn dir_entries(dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
