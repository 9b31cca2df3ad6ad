// # File Rule Store
//
// File-based implementation of RuleStore with rotating backups.
//
// ## Purpose
//
// Persists the authoritative gateway rule set across restarts so the rule
// manager can rebuild its in-memory state and the rendered configuration.
//
// ## Crash Recovery
//
// - Atomic writes: new snapshot written to a temporary file, then renamed
// - Rotating backups: each write first copies the current snapshot to
//   `<file>.backup.<generation>`, keeping the newest `backup_count` copies.
//   If that copy cannot be made the save fails and the snapshot is untouched
// - Corruption detection: the snapshot must be a JSON object on load
// - Recovery: falls back to the newest parsable backup if the snapshot is corrupted
//
// ## File Format
//
// ```json
// {
//   "app.internal.example.com": {
//     "hostname": "app.internal.example.com",
//     "target_ip": "100.64.0.7",
//     "target_port": 8080,
//     "protocol": "http",
//     "enabled": true,
//     "created_at": "2025-01-09T12:00:00Z"
//   }
// }
// ```

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::Error;
use crate::traits::{RuleSet, RuleStore};

use super::{decode_snapshot, validate_for_save};

/// Infix between the snapshot file name and the backup generation
const BACKUP_INFIX: &str = ".backup.";

/// File-based rule store with rotating backups
///
/// # Example
///
/// ```rust,no_run
/// use meshdns_core::store::FileRuleStore;
/// use meshdns_core::traits::RuleStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileRuleStore::new("/var/lib/meshdns/rules.json", 3);
///     let rules = store.load().await?;
///     store.save(&rules).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileRuleStore {
    path: PathBuf,
    backup_count: usize,
    /// Serializes writers so rotation and rename never interleave
    write_lock: Mutex<()>,
}

impl FileRuleStore {
    /// Create a file rule store
    ///
    /// Nothing is touched on disk until the first `save`.
    pub fn new<P: AsRef<Path>>(path: P, backup_count: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            backup_count,
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the snapshot file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Existing backups, newest first
    pub async fn backups(&self) -> Result<Vec<PathBuf>, Error> {
        let mut generations = self.backup_generations().await?;
        generations.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        Ok(generations.into_iter().map(|(_, path)| path).collect())
    }

    /// Load and decode one snapshot file
    async fn read_snapshot(path: &Path) -> Result<RuleSet, Error> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::storage(format!("Failed to read rule snapshot {}: {}", path.display(), e))
        })?;

        decode_snapshot(&content).map_err(|e| {
            Error::storage(format!(
                "Failed to parse rule snapshot {}: {}. File may be corrupted.",
                path.display(),
                e
            ))
        })
    }

    /// Recover from the newest backup that still parses
    async fn recover_from_backup(&self) -> Result<RuleSet, Error> {
        for backup in self.backups().await? {
            match Self::read_snapshot(&backup).await {
                Ok(rules) => {
                    tracing::info!(
                        "Recovered {} rules from backup {}",
                        rules.len(),
                        backup.display()
                    );
                    return Ok(rules);
                }
                Err(e) => tracing::warn!("Backup {} unusable: {}", backup.display(), e),
            }
        }

        Err(Error::storage(format!(
            "Rule snapshot {} is corrupted and no usable backup exists",
            self.path.display()
        )))
    }

    /// Backup files with their generation numbers, in directory order
    async fn backup_generations(&self) -> Result<Vec<(u64, PathBuf)>, Error> {
        let dir = self.parent_dir();
        let prefix = format!("{}{}", self.file_name().to_string_lossy(), BACKUP_INFIX);

        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::storage(format!(
                    "Failed to list backups in {}: {}",
                    dir.display(),
                    e
                )));
            }
        };

        let mut backups = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(generation) = name
                .to_str()
                .and_then(|n| n.strip_prefix(&prefix))
                .and_then(|g| g.parse::<u64>().ok())
            else {
                continue;
            };
            backups.push((generation, entry.path()));
        }

        Ok(backups)
    }

    /// Copy the current snapshot into the next backup generation
    async fn rotate(&self) -> Result<(), Error> {
        let next = self
            .backup_generations()
            .await?
            .iter()
            .map(|(generation, _)| *generation)
            .max()
            .map_or(Some(1), |g| g.checked_add(1))
            .ok_or_else(|| {
                Error::storage(format!(
                    "Backup generations for {} are exhausted",
                    self.path.display()
                ))
            })?;

        let backup = self.backup_path(next);
        fs::copy(&self.path, &backup).await.map_err(|e| {
            Error::storage(format!("Failed to create backup {}: {}", backup.display(), e))
        })?;

        tracing::debug!("Created backup: {}", backup.display());
        Ok(())
    }

    /// Remove backups beyond the retention bound, oldest first
    async fn prune_backups(&self) -> Result<(), Error> {
        let mut generations = self.backup_generations().await?;
        if generations.len() <= self.backup_count {
            return Ok(());
        }

        generations.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        for (_, path) in generations.into_iter().skip(self.backup_count) {
            match fs::remove_file(&path).await {
                Ok(()) => tracing::debug!("Removed old backup: {}", path.display()),
                Err(e) => tracing::warn!("Failed to remove old backup {}: {}", path.display(), e),
            }
        }

        Ok(())
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    fn file_name(&self) -> OsString {
        self.path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from("rules.json"))
    }

    /// Get path to temporary file for atomic writes
    fn temp_path(&self) -> PathBuf {
        let mut name = self.file_name();
        name.push(".tmp");
        self.parent_dir().join(name)
    }

    /// Get path of a backup generation
    ///
    /// Generations are zero-padded so lexical and numeric order agree.
    fn backup_path(&self, generation: u64) -> PathBuf {
        let mut name = self.file_name();
        name.push(format!("{}{:020}", BACKUP_INFIX, generation));
        self.parent_dir().join(name)
    }
}

#[async_trait]
impl RuleStore for FileRuleStore {
    async fn load(&self) -> Result<RuleSet, Error> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            tracing::debug!("Rule snapshot does not exist: {}", self.path.display());
            return Ok(RuleSet::new());
        }

        match Self::read_snapshot(&self.path).await {
            Ok(rules) => {
                tracing::debug!("Loaded {} rules from {}", rules.len(), self.path.display());
                Ok(rules)
            }
            Err(e) => {
                tracing::warn!("{}. Attempting recovery from backup.", e);
                self.recover_from_backup().await
            }
        }
    }

    async fn save(&self, rules: &RuleSet) -> Result<(), Error> {
        validate_for_save(rules)?;

        let json = serde_json::to_string_pretty(rules)
            .map_err(|e| Error::storage(format!("Failed to serialize rules: {}", e)))?;

        let _guard = self.write_lock.lock().await;

        let dir = self.parent_dir();
        fs::create_dir_all(&dir).await.map_err(|e| {
            Error::storage(format!("Failed to create storage directory {}: {}", dir.display(), e))
        })?;

        // Write to temporary file first
        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::storage(format!("Failed to create temp file {}: {}", temp_path.display(), e))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::storage(format!("Failed to write temp file {}: {}", temp_path.display(), e))
            })?;

            file.sync_all().await.map_err(|e| {
                Error::storage(format!("Failed to flush temp file {}: {}", temp_path.display(), e))
            })?;
        }

        if self.backup_count > 0 && fs::try_exists(&self.path).await.unwrap_or(false) {
            if let Err(e) = self.rotate().await {
                let _ = fs::remove_file(&temp_path).await;
                return Err(e);
            }
        }

        // Atomic rename (temp -> actual)
        if let Err(e) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::storage(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            )));
        }

        if let Err(e) = self.prune_backups().await {
            tracing::warn!("Failed to prune old backups: {}", e);
        }

        tracing::trace!("Saved {} rules to {}", rules.len(), self.path.display());
        Ok(())
    }

    async fn exists(&self) -> bool {
        fs::try_exists(&self.path).await.unwrap_or(false)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
