//! Backup run executor - sequences one backup from start to finish.
//!
//! A run takes the lock on the backup directory, classifies today's date,
//! archives the world while saving is frozen, publishes the archive under the
//! configured retention policy, then trims the local archive set.
//!
//! Nothing remote is touched until an archive exists on disk. Once a freeze
//! was attempted, saving is resumed before anything else happens, whether or
//! not the freeze or the archiving step succeeded.

use crate::config::Config;
use crate::fs::{archive_name, create_archive, ArchiveOptions, ArchiveSummary, RunLock, WalkOptions};
use crate::rcon::{with_frozen_world, Console};
use crate::retention::{classify, prune_local, Publisher, RetentionPolicy, RetentionTag};
use crate::storage::{Metadata, ObjectStore};
use crate::transfer::format_bytes;
use crate::utils::{Result, SyncError};
use chrono::{DateTime, TimeZone};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Per-run settings, usually derived from [`Config`].
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Server root containing the `world*` directories
    pub server_path: PathBuf,

    /// Local directory archives are written to
    pub backup_dir: PathBuf,

    pub archive: ArchiveOptions,

    /// Archives kept locally after a run (0 = delete after upload)
    pub keep_local: usize,

    pub policy: RetentionPolicy,

    /// Pause between flushing and archiving
    pub settle: Duration,

    /// Archive and classify only; no upload, no cleanup
    pub dry_run: bool,

    /// Remove an existing run lock instead of failing on it
    pub break_lock: bool,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            server_path: config.world.server_path.clone(),
            backup_dir: config.backup.dir.clone(),
            archive: ArchiveOptions {
                prefix: config.world.prefix.clone(),
                walk: WalkOptions {
                    follow_links: false,
                    exclude_names: config.world.exclude.clone(),
                },
                compression_level: config.backup.compression_level,
            },
            keep_local: config.backup.keep_local,
            policy: config.backup.policy,
            settle: config.rcon.as_ref().map(|r| r.settle).unwrap_or_default(),
            dry_run: false,
            break_lock: false,
        }
    }
}

/// What a run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub tag: RetentionTag,
    pub archive: PathBuf,
    pub archive_bytes: u64,
    pub files: usize,

    /// Name the archive was (or in a dry run, would be) stored under
    pub remote_name: String,

    /// Names of remote objects removed by retention
    pub deleted_remote: Vec<String>,

    /// Verification result under verify-then-purge; `None` otherwise
    pub verified: Option<bool>,

    /// Local archives removed after publishing
    pub pruned_local: Vec<PathBuf>,

    pub dry_run: bool,
    pub duration_secs: u64,
}

/// Main backup executor
pub struct BackupRun {
    store: Arc<dyn ObjectStore>,
    console: Option<Arc<dyn Console>>,
    settings: RunSettings,
    verify_attempts: u32,
    verify_delay: Duration,
}

impl BackupRun {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        console: Option<Arc<dyn Console>>,
        settings: RunSettings,
    ) -> Self {
        Self {
            store,
            console,
            settings,
            verify_attempts: 3,
            verify_delay: Duration::from_secs(2),
        }
    }

    /// Override how long verify-then-purge waits for an upload to be listed.
    pub fn with_verification(mut self, attempts: u32, delay: Duration) -> Self {
        self.verify_attempts = attempts;
        self.verify_delay = delay;
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Execute one backup stamped with the current local time.
    pub async fn run(&self) -> Result<RunReport> {
        self.run_at(chrono::Local::now()).await
    }

    /// Execute one backup as if started at `now`.
    pub async fn run_at<Tz>(&self, now: DateTime<Tz>) -> Result<RunReport>
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let start_time = Instant::now();
        let settings = &self.settings;

        tokio::fs::create_dir_all(&settings.backup_dir).await?;
        let _lock = if settings.break_lock {
            RunLock::break_lock(&settings.backup_dir)?
        } else {
            RunLock::acquire(&settings.backup_dir)?
        };

        let tag = classify(now.date_naive());
        let archive_path = settings.backup_dir.join(archive_name(&now));
        info!(
            tag = %tag,
            policy = ?settings.policy,
            "Starting backup of {} into {}",
            settings.server_path.display(),
            archive_path.display()
        );

        let summary = self.archive(archive_path).await.map_err(|e| {
            error!(error = %e, "Backup aborted before upload");
            e
        })?;

        let publisher = Publisher::new(self.store.as_ref(), settings.policy)
            .with_verification(self.verify_attempts, self.verify_delay);
        let archive_file_name = summary
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let remote_name = publisher.remote_name(&archive_file_name, tag);

        let mut report = RunReport {
            tag,
            archive: summary.path.clone(),
            archive_bytes: summary.archive_bytes,
            files: summary.files,
            remote_name,
            deleted_remote: Vec::new(),
            verified: None,
            pruned_local: Vec::new(),
            dry_run: settings.dry_run,
            duration_secs: 0,
        };

        if settings.dry_run {
            info!(
                "Dry run: would upload {} as {} and apply {:?} retention; keeping everything",
                summary.path.display(),
                report.remote_name,
                settings.policy
            );
            report.duration_secs = start_time.elapsed().as_secs();
            return Ok(report);
        }

        let metadata = upload_metadata(tag, &summary);
        let outcome = publisher
            .publish(&summary.path, tag, &metadata)
            .await
            .map_err(|e| {
                error!(error = %e, "Upload failed; remote backups left untouched");
                e
            })?;

        report.remote_name = outcome.uploaded.name.clone();
        report.deleted_remote = outcome.deleted.iter().map(|o| o.name.clone()).collect();
        report.verified = outcome.verified;
        if outcome.verified == Some(false) {
            error!(
                name = %outcome.uploaded.name,
                "Backup uploaded but not verified; previous backups were not purged"
            );
        }

        report.pruned_local = if settings.keep_local == 0 {
            tokio::fs::remove_file(&summary.path).await?;
            info!("Removed local archive {}", summary.path.display());
            vec![summary.path.clone()]
        } else {
            let backup_dir = settings.backup_dir.clone();
            let keep = settings.keep_local;
            tokio::task::spawn_blocking(move || prune_local(&backup_dir, keep))
                .await
                .map_err(|e| SyncError::Io(std::io::Error::other(e)))??
        };

        report.duration_secs = start_time.elapsed().as_secs();
        info!(
            tag = %report.tag,
            remote = %report.remote_name,
            size = %format_bytes(report.archive_bytes),
            deleted_remote = report.deleted_remote.len(),
            pruned_local = report.pruned_local.len(),
            "Backup completed in {}s",
            report.duration_secs
        );

        Ok(report)
    }

    /// Write the archive, freezing world saves around it when a console is set.
    async fn archive(&self, output: PathBuf) -> Result<ArchiveSummary> {
        let source = self.settings.server_path.clone();
        let options = self.settings.archive.clone();
        let write = || async move {
            tokio::task::spawn_blocking(move || create_archive(&source, &output, &options))
                .await
                .map_err(|e| SyncError::Archive(format!("archive task failed: {}", e)))?
        };

        match &self.console {
            Some(console) => with_frozen_world(console.as_ref(), self.settings.settle, write).await,
            None => {
                warn!("No remote console configured; archiving without freezing saves");
                write().await
            }
        }
    }
}

fn upload_metadata(tag: RetentionTag, summary: &ArchiveSummary) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("backup-type".to_string(), tag.to_string());
    metadata.insert("files".to_string(), summary.files.to_string());
    metadata.insert("source-bytes".to_string(), summary.source_bytes.to_string());
    if let Ok(host) = hostname::get() {
        metadata.insert("source-host".to_string(), host.to_string_lossy().to_string());
    }
    metadata
}
