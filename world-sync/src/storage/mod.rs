//! Object storage abstraction.
//!
//! The retention logic only needs three primitives: upload a local file under
//! a name, list what is in the bucket, and delete one object version. Backends
//! implement [`ObjectStore`]; [`b2::B2Store`] talks to Backblaze B2 and
//! [`memory::MemoryStore`] keeps everything in process for tests.

pub mod b2;
pub mod memory;

use crate::utils::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Key/value pairs stored alongside an uploaded object.
pub type Metadata = BTreeMap<String, String>;

/// One object version in the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub name: String,

    /// Backend identity of this version (B2 file id)
    pub id: String,

    pub size: u64,

    pub uploaded_at: DateTime<Utc>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `local_path` as `remote_name`, returning the stored object.
    async fn upload(&self, local_path: &Path, remote_name: &str, metadata: &Metadata) -> Result<RemoteObject>;

    /// List every object version in the bucket.
    async fn list(&self) -> Result<Vec<RemoteObject>>;

    /// Delete one object version.
    async fn delete(&self, object: &RemoteObject) -> Result<()>;
}

/// Exponential backoff settings for object store calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_backoff: Duration::from_millis(1000),
            max_backoff: Duration::from_millis(30000),
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
pub async fn with_retry<T, F, Fut>(label: &str, policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.attempts && e.is_transient() => {
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {}ms...",
                    label,
                    attempt,
                    policy.attempts,
                    e,
                    backoff.as_millis()
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(policy.max_backoff);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
