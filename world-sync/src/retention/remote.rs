//! Remote retention: publishing an archive and retiring the ones it replaces.
//!
//! Two policies are supported and exactly one is chosen per run:
//!
//! - [`RetentionPolicy::TagOverwrite`] keeps one object per retention tag.
//!   Objects named `{tag}_*` are deleted, then the archive is uploaded as
//!   `{tag}_{archive}`. A crash between the two leaves the tag empty until
//!   the next run.
//! - [`RetentionPolicy::VerifyThenPurge`] uploads under the plain archive
//!   name, confirms the upload shows up in a fresh listing, and only then
//!   deletes the other `world-*` objects. If the upload cannot be confirmed
//!   nothing is deleted.

use super::tag::RetentionTag;
use crate::fs::archive::ARCHIVE_PREFIX;
use crate::storage::{Metadata, ObjectStore, RemoteObject};
use crate::utils::{Result, SyncError};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionPolicy {
    #[default]
    TagOverwrite,
    VerifyThenPurge,
}

impl FromStr for RetentionPolicy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tagged" | "tag" | "overwrite" => Ok(RetentionPolicy::TagOverwrite),
            "verify" | "verify-then-purge" | "purge" => Ok(RetentionPolicy::VerifyThenPurge),
            other => Err(SyncError::Config(format!(
                "unknown retention policy {:?} (expected \"tagged\" or \"verify\")",
                other
            ))),
        }
    }
}

/// Result of publishing one archive.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub uploaded: RemoteObject,

    /// Remote objects removed because the new upload replaces them
    pub deleted: Vec<RemoteObject>,

    /// `Some(false)` when the upload could not be confirmed; cleanup was skipped
    pub verified: Option<bool>,
}

pub struct Publisher<'a> {
    store: &'a dyn ObjectStore,
    policy: RetentionPolicy,
    verify_attempts: u32,
    verify_delay: Duration,
}

impl<'a> Publisher<'a> {
    pub fn new(store: &'a dyn ObjectStore, policy: RetentionPolicy) -> Self {
        Self {
            store,
            policy,
            verify_attempts: 3,
            verify_delay: Duration::from_secs(2),
        }
    }

    /// Listing attempts made before declaring an upload unverified.
    pub fn with_verification(mut self, attempts: u32, delay: Duration) -> Self {
        self.verify_attempts = attempts.max(1);
        self.verify_delay = delay;
        self
    }

    /// Name the archive will be stored under for `tag`.
    pub fn remote_name(&self, archive_name: &str, tag: RetentionTag) -> String {
        match self.policy {
            RetentionPolicy::TagOverwrite => format!("{}{}", tag.remote_prefix(), archive_name),
            RetentionPolicy::VerifyThenPurge => archive_name.to_string(),
        }
    }

    /// Upload `archive` and apply the retention policy for `tag`.
    pub async fn publish(
        &self,
        archive: &Path,
        tag: RetentionTag,
        metadata: &Metadata,
    ) -> Result<PublishOutcome> {
        let archive_name = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| SyncError::Archive(format!("{} has no file name", archive.display())))?;
        let remote_name = self.remote_name(&archive_name, tag);

        match self.policy {
            RetentionPolicy::TagOverwrite => self.overwrite_tag(archive, &remote_name, tag, metadata).await,
            RetentionPolicy::VerifyThenPurge => self.verify_then_purge(archive, &remote_name, metadata).await,
        }
    }

    async fn overwrite_tag(
        &self,
        archive: &Path,
        remote_name: &str,
        tag: RetentionTag,
        metadata: &Metadata,
    ) -> Result<PublishOutcome> {
        let prefix = tag.remote_prefix();
        let previous: Vec<RemoteObject> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|o| o.name.starts_with(&prefix))
            .collect();

        let mut deleted = Vec::with_capacity(previous.len());
        for object in previous {
            self.store.delete(&object).await?;
            info!(name = %object.name, id = %object.id, "Deleted previous {} backup", tag);
            deleted.push(object);
        }

        let uploaded = self.store.upload(archive, remote_name, metadata).await?;
        info!(name = %uploaded.name, size = uploaded.size, "Uploaded {} backup", tag);

        Ok(PublishOutcome {
            uploaded,
            deleted,
            verified: None,
        })
    }

    async fn verify_then_purge(
        &self,
        archive: &Path,
        remote_name: &str,
        metadata: &Metadata,
    ) -> Result<PublishOutcome> {
        let uploaded = self.store.upload(archive, remote_name, metadata).await?;
        info!(name = %uploaded.name, size = uploaded.size, "Uploaded backup, verifying");

        let Some(listing) = self.confirm(&uploaded).await? else {
            error!(
                name = %uploaded.name,
                "Upload not visible in bucket listing; keeping all previous backups"
            );
            return Ok(PublishOutcome {
                uploaded,
                deleted: Vec::new(),
                verified: Some(false),
            });
        };

        let mut deleted = Vec::new();
        for object in listing {
            if object.id == uploaded.id || !object.name.starts_with(ARCHIVE_PREFIX) {
                continue;
            }
            self.store.delete(&object).await?;
            info!(name = %object.name, id = %object.id, "Purged superseded backup");
            deleted.push(object);
        }

        Ok(PublishOutcome {
            uploaded,
            deleted,
            verified: Some(true),
        })
    }

    /// Poll the listing until `uploaded` appears. Returns the listing that
    /// contained it, or `None` once attempts run out.
    async fn confirm(&self, uploaded: &RemoteObject) -> Result<Option<Vec<RemoteObject>>> {
        for attempt in 1..=self.verify_attempts {
            let listing = self.store.list().await?;
            if listing
                .iter()
                .any(|o| o.name == uploaded.name && o.id == uploaded.id)
            {
                return Ok(Some(listing));
            }
            if attempt < self.verify_attempts {
                warn!(
                    "{} not listed yet (attempt {}/{})",
                    uploaded.name, attempt, self.verify_attempts
                );
                tokio::time::sleep(self.verify_delay).await;
            }
        }
        Ok(None)
    }
}
