// # Zone File DNS Authority
//
// This crate provides a DnsAuthority that maintains RFC 1035 zone files for a
// file-serving DNS server (e.g. CoreDNS with the `file` plugin).
//
// ## Layout
//
// One file per zone: `<zones_dir>/<zone>.zone`, origin `<zone>.<domain>.`.
// Records are written as `label\tIN A\tip`, one per line.
//
// ## Behavior
//
// - `add_zone` fails with `Error::AlreadyExists` if the zone file exists
// - `add_record` upserts: an existing A record for the label is rewritten
// - `drop_record` removes only the exact `label IN A ip` line
// - `reload` runs the configured command, if any
// - Every file operation is serialized and written atomically (temp + rename)

use async_trait::async_trait;
use meshdns_core::traits::DnsAuthority;
use meshdns_core::{Error, Result};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::process::Command;
use tokio::sync::Mutex;

/// TTL used for the SOA and NS records of a new zone
const DEFAULT_TTL: u32 = 3600;

/// Zone-file backed DNS authority
#[derive(Debug)]
pub struct ZoneFileAuthority {
    zones_dir: PathBuf,
    domain: String,
    reload_command: Vec<String>,
    lock: Mutex<()>,
}

impl ZoneFileAuthority {
    /// Create an authority writing zones for `domain` into `zones_dir`
    pub fn new(zones_dir: impl Into<PathBuf>, domain: impl Into<String>) -> Self {
        Self {
            zones_dir: zones_dir.into(),
            domain: domain.into().trim_end_matches('.').to_string(),
            reload_command: Vec::new(),
            lock: Mutex::new(()),
        }
    }

    /// Run `command` (program followed by arguments) on every reload
    pub fn with_reload_command(mut self, command: Vec<String>) -> Self {
        self.reload_command = command;
        self
    }

    /// Path of the file holding `zone`
    pub fn zone_path(&self, zone: &str) -> PathBuf {
        self.zones_dir.join(format!("{}.zone", zone))
    }

    /// Fully-qualified origin of `zone`
    pub fn origin(&self, zone: &str) -> String {
        format!("{}.{}.", zone, self.domain)
    }

    fn zone_header(&self, zone: &str) -> String {
        let origin = self.origin(zone);
        format!(
            "$ORIGIN {origin}\n\
             @\t{ttl} IN\tSOA ns1.{origin} admin.{origin} (\n\
             \t1       ; serial\n\
             \t7200    ; refresh\n\
             \t3600    ; retry\n\
             \t1209600 ; expire\n\
             \t3600    ; minimum\n\
             )\n\
             @\t{ttl} IN\tNS ns1.{origin}\n",
            origin = origin,
            ttl = DEFAULT_TTL,
        )
    }

    async fn read_zone(&self, zone: &str) -> Result<String> {
        let path = self.zone_path(zone);
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::dns_authority(
                format!("zone file for {} does not exist: {}", zone, path.display()),
            )),
            Err(e) => Err(Error::dns_authority(format!(
                "failed to read zone file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn write_zone(&self, path: &Path, content: &str) -> Result<()> {
        let mut temp = path.as_os_str().to_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);

        fs::write(&temp, content).await.map_err(|e| {
            Error::dns_authority(format!("failed to write {}: {}", temp.display(), e))
        })?;

        if let Err(e) = fs::rename(&temp, path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(Error::dns_authority(format!(
                "failed to replace zone file {}: {}",
                path.display(),
                e
            )));
        }
        Ok(())
    }
}

fn record_line(label: &str, ip: IpAddr) -> String {
    format!("{}\tIN A\t{}", label, ip)
}

/// Whether `line` is an A record for `label`
fn is_a_record_for(line: &str, label: &str) -> bool {
    let mut fields = line.split_whitespace();
    fields.next() == Some(label) && fields.next() == Some("IN") && fields.next() == Some("A")
}

fn join_lines(lines: &[String]) -> String {
    let mut content = lines.join("\n");
    content.push('\n');
    content
}

#[async_trait]
impl DnsAuthority for ZoneFileAuthority {
    async fn add_zone(&self, zone: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.zone_path(zone);

        if fs::try_exists(&path).await.unwrap_or(false) {
            return Err(Error::already_exists(format!("zone {} ({})", zone, path.display())));
        }

        fs::create_dir_all(&self.zones_dir).await.map_err(|e| {
            Error::dns_authority(format!(
                "failed to create zones directory {}: {}",
                self.zones_dir.display(),
                e
            ))
        })?;

        self.write_zone(&path, &self.zone_header(zone)).await?;
        tracing::info!("Created zone file {} for {}", path.display(), self.origin(zone));
        Ok(())
    }

    async fn add_record(&self, zone: &str, label: &str, ip: IpAddr) -> Result<()> {
        let _guard = self.lock.lock().await;
        let content = self.read_zone(zone).await?;

        let wanted = record_line(label, ip);
        let mut found = false;
        let mut changed = false;
        let mut lines: Vec<String> = Vec::new();

        for line in content.lines() {
            if is_a_record_for(line, label) {
                if found {
                    // Collapse duplicates left by hand edits
                    changed = true;
                    continue;
                }
                found = true;
                if line.trim() != wanted {
                    changed = true;
                    lines.push(wanted.clone());
                    continue;
                }
            }
            lines.push(line.to_string());
        }

        if !found {
            lines.push(wanted);
            changed = true;
        }

        if !changed {
            tracing::debug!("Record {} -> {} already up to date", label, ip);
            return Ok(());
        }

        self.write_zone(&self.zone_path(zone), &join_lines(&lines)).await?;
        tracing::debug!("Upserted record {} -> {} in zone {}", label, ip, zone);
        Ok(())
    }

    async fn drop_record(&self, zone: &str, label: &str, ip: IpAddr) -> Result<()> {
        let _guard = self.lock.lock().await;
        let content = self.read_zone(zone).await?;

        let target = record_line(label, ip);
        let before = content.lines().count();
        let lines: Vec<String> = content
            .lines()
            .filter(|line| line.trim() != target)
            .map(str::to_string)
            .collect();

        if lines.len() == before {
            tracing::warn!("Record {} -> {} not found in zone {}, nothing to drop", label, ip, zone);
            return Ok(());
        }

        self.write_zone(&self.zone_path(zone), &join_lines(&lines)).await?;
        tracing::debug!("Dropped record {} -> {} from zone {}", label, ip, zone);
        Ok(())
    }

    async fn reload(&self) -> Result<()> {
        let Some((program, args)) = self.reload_command.split_first() else {
            tracing::debug!("No reload command configured");
            return Ok(());
        };

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::dns_authority(format!("failed to execute {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::dns_authority(format!(
                "reload command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        tracing::info!("DNS server reloaded");
        Ok(())
    }

    fn authority_name(&self) -> &'static str {
        "zonefile"
    }
}
