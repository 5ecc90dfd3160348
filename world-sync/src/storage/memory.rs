//! In-process object store used by tests.

use super::{Metadata, ObjectStore, RemoteObject};
use crate::utils::{Result, SyncError};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct MemoryState {
    objects: Vec<(RemoteObject, Metadata)>,
    next_id: u64,
    hidden: HashSet<String>,
    fail_uploads: bool,
    deleted: Vec<RemoteObject>,
    uploads: usize,
}

/// Bucket held in memory. Can be told to drop names from listings or to
/// reject uploads, which is how publish failure paths get exercised.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert an object as if uploaded `age_days` ago.
    pub fn seed(&self, name: &str, age_days: i64) -> RemoteObject {
        let mut state = self.state();
        state.next_id += 1;
        let object = RemoteObject {
            name: name.to_string(),
            id: format!("mem-{}", state.next_id),
            size: 0,
            uploaded_at: Utc::now() - Duration::days(age_days),
        };
        state.objects.push((object.clone(), Metadata::new()));
        object
    }

    /// Leave `name` out of every subsequent listing.
    pub fn hide_from_listing(&self, name: &str) {
        self.state().hidden.insert(name.to_string());
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.state().fail_uploads = fail;
    }

    /// Every object currently stored, hidden ones included.
    pub fn objects(&self) -> Vec<RemoteObject> {
        self.state().objects.iter().map(|(o, _)| o.clone()).collect()
    }

    pub fn metadata(&self, name: &str) -> Option<Metadata> {
        self.state()
            .objects
            .iter()
            .find(|(o, _)| o.name == name)
            .map(|(_, m)| m.clone())
    }

    pub fn deleted(&self) -> Vec<RemoteObject> {
        self.state().deleted.clone()
    }

    pub fn upload_count(&self) -> usize {
        self.state().uploads
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn upload(&self, local_path: &Path, remote_name: &str, metadata: &Metadata) -> Result<RemoteObject> {
        let size = tokio::fs::metadata(local_path).await?.len();

        let mut state = self.state();
        if state.fail_uploads {
            return Err(SyncError::Rejected(format!("upload of {} refused", remote_name)));
        }
        state.next_id += 1;
        state.uploads += 1;
        let object = RemoteObject {
            name: remote_name.to_string(),
            id: format!("mem-{}", state.next_id),
            size,
            uploaded_at: Utc::now(),
        };
        state.objects.push((object.clone(), metadata.clone()));
        Ok(object)
    }

    async fn list(&self) -> Result<Vec<RemoteObject>> {
        let state = self.state();
        Ok(state
            .objects
            .iter()
            .filter(|(o, _)| !state.hidden.contains(&o.name))
            .map(|(o, _)| o.clone())
            .collect())
    }

    async fn delete(&self, object: &RemoteObject) -> Result<()> {
        let mut state = self.state();
        let before = state.objects.len();
        state.objects.retain(|(o, _)| o.id != object.id);
        if state.objects.len() == before {
            return Err(SyncError::Rejected(format!("no such object {} ({})", object.name, object.id)));
        }
        state.deleted.push(object.clone());
        Ok(())
    }
}
