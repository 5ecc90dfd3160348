//! Backblaze B2 native API client.
//!
//! Only the calls the retention logic needs are implemented:
//! `b2_authorize_account`, `b2_list_buckets`, `b2_get_upload_url`,
//! `b2_upload_file`, `b2_list_file_versions` and `b2_delete_file_version`.
//! The account authorization is cached and dropped again when B2 reports an
//! expired token, so the next retry re-authorizes.
//!
//! API calls get `NETWORK_TIMEOUT_SECS` end to end. Uploads get that plus
//! the time the archive takes at [`MIN_UPLOAD_RATE`]. Archives above
//! [`MAX_SINGLE_UPLOAD`] are refused; the large-file API is not implemented.

use super::{with_retry, Metadata, ObjectStore, RemoteObject, RetryPolicy};
use crate::config::StorageConfig;
use crate::transfer::{ProgressStream, UploadProgress};
use crate::utils::{Result, SyncError};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

const LIST_PAGE_SIZE: u32 = 1000;

/// Largest object `b2_upload_file` accepts (5 GB).
pub const MAX_SINGLE_UPLOAD: u64 = 5_000_000_000;

/// Slowest sustained upload speed tolerated before an upload times out.
pub const MIN_UPLOAD_RATE: u64 = 256 * 1024;

#[derive(Debug, Clone)]
struct Session {
    api_url: String,
    auth_token: String,
    bucket_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeResponse {
    account_id: String,
    authorization_token: String,
    api_url: String,
    #[serde(default)]
    allowed: Option<Allowed>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Allowed {
    bucket_id: Option<String>,
    bucket_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListBucketsRequest<'a> {
    account_id: &'a str,
    bucket_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct ListBucketsResponse {
    buckets: Vec<Bucket>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Bucket {
    bucket_id: String,
    bucket_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BucketRequest<'a> {
    bucket_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadUrlResponse {
    upload_url: String,
    authorization_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListVersionsRequest<'a> {
    bucket_id: &'a str,
    max_file_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_file_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_file_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListVersionsResponse {
    files: Vec<FileVersion>,
    next_file_name: Option<String>,
    next_file_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileVersion {
    file_id: String,
    file_name: String,
    #[serde(default)]
    content_length: u64,
    upload_timestamp: i64,
    #[serde(default = "default_action")]
    action: String,
}

fn default_action() -> String {
    "upload".to_string()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteVersionRequest<'a> {
    file_name: &'a str,
    file_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl FileVersion {
    fn into_remote(self) -> RemoteObject {
        RemoteObject {
            uploaded_at: millis_to_utc(self.upload_timestamp),
            name: self.file_name,
            id: self.file_id,
            size: self.content_length,
        }
    }
}

fn millis_to_utc(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

pub struct B2Store {
    http: reqwest::Client,
    config: StorageConfig,
    retry: RetryPolicy,
    session: Mutex<Option<Session>>,
}

impl B2Store {
    pub fn new(config: StorageConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .user_agent(concat!("world-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            retry: RetryPolicy::new(config.retries),
            config,
            session: Mutex::new(None),
        })
    }

    async fn session(&self) -> Result<Session> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }
        let session = self.authorize().await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn authorize(&self) -> Result<Session> {
        let url = format!(
            "{}/b2api/v2/b2_authorize_account",
            self.config.api_url.trim_end_matches('/')
        );
        let resp = self
            .http
            .get(&url)
            .timeout(self.config.timeout)
            .basic_auth(&self.config.key_id, Some(&self.config.app_key))
            .send()
            .await?;
        let auth: AuthorizeResponse = parse_response(resp).await?;

        let allowed_bucket = auth.allowed.and_then(|a| match (a.bucket_id, a.bucket_name) {
            (Some(id), Some(name)) if name == self.config.bucket => Some(id),
            _ => None,
        });

        let bucket_id = match allowed_bucket {
            Some(id) => id,
            None => {
                let resp = self
                    .http
                    .post(format!("{}/b2api/v2/b2_list_buckets", auth.api_url))
                    .timeout(self.config.timeout)
                    .header("Authorization", &auth.authorization_token)
                    .json(&ListBucketsRequest {
                        account_id: &auth.account_id,
                        bucket_name: &self.config.bucket,
                    })
                    .send()
                    .await?;
                let listing: ListBucketsResponse = parse_response(resp).await?;
                listing
                    .buckets
                    .into_iter()
                    .find(|b| b.bucket_name == self.config.bucket)
                    .map(|b| b.bucket_id)
                    .ok_or_else(|| {
                        SyncError::Rejected(format!("bucket {} not found", self.config.bucket))
                    })?
            }
        };

        info!(bucket = %self.config.bucket, "Authorized with B2");
        Ok(Session {
            api_url: auth.api_url,
            auth_token: auth.authorization_token,
            bucket_id,
        })
    }

    /// Parse a response to an authorized call, dropping the cached session on 401.
    async fn call<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T> {
        if resp.status() == StatusCode::UNAUTHORIZED {
            *self.session.lock().await = None;
        }
        parse_response(resp).await
    }

    async fn upload_once(
        &self,
        local_path: &Path,
        remote_name: &str,
        metadata: &Metadata,
        size: u64,
        sha1: &str,
    ) -> Result<RemoteObject> {
        let session = self.session().await?;
        let resp = self
            .http
            .post(format!("{}/b2api/v2/b2_get_upload_url", session.api_url))
            .timeout(self.config.timeout)
            .header("Authorization", &session.auth_token)
            .json(&BucketRequest {
                bucket_id: &session.bucket_id,
            })
            .send()
            .await?;
        let target: UploadUrlResponse = self.call(resp).await?;

        let file = tokio::fs::File::open(local_path).await?;
        let body = ProgressStream::new(ReaderStream::new(file), UploadProgress::new(remote_name, size));

        let mut request = self
            .http
            .post(&target.upload_url)
            .timeout(upload_deadline(size, self.config.timeout))
            .header("Authorization", &target.authorization_token)
            .header("X-Bz-File-Name", encode_file_name(remote_name))
            .header("Content-Type", "b2/x-auto")
            .header("Content-Length", size.to_string())
            .header("X-Bz-Content-Sha1", sha1);
        for (key, value) in metadata {
            request = request.header(format!("X-Bz-Info-{}", key), encode_file_name(value));
        }

        let resp = request.body(reqwest::Body::wrap_stream(body)).send().await?;
        let uploaded: FileVersion = self.call(resp).await?;
        if uploaded.content_length != size {
            return Err(SyncError::Verification(format!(
                "{} stored with {} bytes, expected {}",
                uploaded.file_name, uploaded.content_length, size
            )));
        }
        Ok(uploaded.into_remote())
    }

    async fn list_page(
        &self,
        start: Option<(&str, &str)>,
    ) -> Result<ListVersionsResponse> {
        let session = self.session().await?;
        let resp = self
            .http
            .post(format!("{}/b2api/v2/b2_list_file_versions", session.api_url))
            .timeout(self.config.timeout)
            .header("Authorization", &session.auth_token)
            .json(&ListVersionsRequest {
                bucket_id: &session.bucket_id,
                max_file_count: LIST_PAGE_SIZE,
                start_file_name: start.map(|(name, _)| name),
                start_file_id: start.map(|(_, id)| id),
            })
            .send()
            .await?;
        self.call(resp).await
    }

    async fn delete_once(&self, object: &RemoteObject) -> Result<()> {
        let session = self.session().await?;
        let resp = self
            .http
            .post(format!("{}/b2api/v2/b2_delete_file_version", session.api_url))
            .timeout(self.config.timeout)
            .header("Authorization", &session.auth_token)
            .json(&DeleteVersionRequest {
                file_name: &object.name,
                file_id: &object.id,
            })
            .send()
            .await?;
        let _: serde_json::Value = self.call(resp).await?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for B2Store {
    async fn upload(&self, local_path: &Path, remote_name: &str, metadata: &Metadata) -> Result<RemoteObject> {
        check_single_upload(remote_name, tokio::fs::metadata(local_path).await?.len())?;

        let path = local_path.to_path_buf();
        let (size, sha1) = tokio::task::spawn_blocking(move || sha1_file(&path))
            .await
            .map_err(|e| SyncError::Storage(format!("hash task failed: {}", e)))??;

        debug!(remote = %remote_name, size, sha1 = %sha1, "Uploading archive");
        with_retry("B2 upload", self.retry, || {
            self.upload_once(local_path, remote_name, metadata, size, &sha1)
        })
        .await
    }

    async fn list(&self) -> Result<Vec<RemoteObject>> {
        let mut objects = Vec::new();
        let mut cursor: Option<(String, String)> = None;

        loop {
            let start = cursor.as_ref().map(|(name, id)| (name.as_str(), id.as_str()));
            let page = with_retry("B2 list", self.retry, || self.list_page(start)).await?;

            objects.extend(
                page.files
                    .into_iter()
                    .filter(|f| f.action == "upload")
                    .map(FileVersion::into_remote),
            );

            cursor = match (page.next_file_name, page.next_file_id) {
                (Some(name), Some(id)) => Some((name, id)),
                (Some(name), None) => Some((name, String::new())),
                _ => break,
            };
        }

        debug!(count = objects.len(), "Listed bucket");
        Ok(objects)
    }

    async fn delete(&self, object: &RemoteObject) -> Result<()> {
        with_retry("B2 delete", self.retry, || self.delete_once(object)).await
    }
}

/// Decode a success body or turn a B2 error body into a typed error.
///
/// Expired tokens, throttling and server faults come back as
/// [`SyncError::Storage`] so the retry loop tries again; everything else is
/// [`SyncError::Rejected`].
async fn parse_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json::<T>().await?);
    }

    let text = resp.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.code, body.message),
        Err(_) => (String::new(), text),
    };
    let detail = format!("{} {}: {}", status.as_u16(), code, message);

    let transient = match status {
        StatusCode::UNAUTHORIZED => code == "expired_auth_token" || code == "bad_auth_token",
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => true,
        s => s.is_server_error(),
    };
    if transient {
        Err(SyncError::Storage(detail))
    } else {
        Err(SyncError::Rejected(detail))
    }
}

/// Deadline for uploading `size` bytes: the API deadline plus transfer time
/// at [`MIN_UPLOAD_RATE`].
fn upload_deadline(size: u64, base: Duration) -> Duration {
    base + Duration::from_secs(size.div_ceil(MIN_UPLOAD_RATE))
}

fn check_single_upload(remote_name: &str, size: u64) -> Result<()> {
    if size > MAX_SINGLE_UPLOAD {
        return Err(SyncError::Rejected(format!(
            "{} is {} bytes; single uploads are limited to {} bytes",
            remote_name, size, MAX_SINGLE_UPLOAD
        )));
    }
    Ok(())
}

/// Size and hex SHA-1 of a file.
fn sha1_file(path: &Path) -> Result<(u64, String)> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }

    Ok((size, hex::encode(hasher.finalize())))
}

/// Percent-encode a file name or info value the way B2 headers expect.
fn encode_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_upload_deadline_grows_with_size() {
        let base = Duration::from_secs(300);
        assert_eq!(upload_deadline(0, base), base);
        // 1 GiB at the minimum rate takes 4096 s on top of the API deadline
        assert_eq!(
            upload_deadline(1024 * 1024 * 1024, base),
            Duration::from_secs(300 + 4096)
        );
        assert!(upload_deadline(1, base) > base);
    }

    #[test]
    fn test_oversized_archive_rejected() {
        assert!(check_single_upload("daily_world.tar.zst", MAX_SINGLE_UPLOAD).is_ok());
        let err = check_single_upload("daily_world.tar.zst", MAX_SINGLE_UPLOAD + 1).unwrap_err();
        assert!(matches!(err, SyncError::Rejected(_)));
    }

    #[test]
    fn test_encode_file_name() {
        assert_eq!(encode_file_name("daily_world-20261019-030000.tar.zst"), "daily_world-20261019-030000.tar.zst");
        assert_eq!(encode_file_name("a b/ü"), "a%20b/%C3%BC");
    }

    #[test]
    fn test_sha1_file() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        file.write_all(b"abc")?;
        file.flush()?;

        let (size, digest) = sha1_file(file.path())?;
        assert_eq!(size, 3);
        assert_eq!(digest, "a9993e364706816aba3e25717850c26c9cd0d89d");
        Ok(())
    }

    #[test]
    fn test_list_response_parsing() {
        let json = r#"{
            "files": [
                {"fileId": "4_z1", "fileName": "daily_world-1.tar.zst", "contentLength": 42,
                 "uploadTimestamp": 1760000000000, "action": "upload"},
                {"fileId": "4_z2", "fileName": "weekly_world-1.tar.zst", "contentLength": 0,
                 "uploadTimestamp": 1760000000000, "action": "hide"}
            ],
            "nextFileName": null,
            "nextFileId": null
        }"#;
        let page: ListVersionsResponse = serde_json::from_str(json).unwrap();
        let objects: Vec<_> = page
            .files
            .into_iter()
            .filter(|f| f.action == "upload")
            .map(FileVersion::into_remote)
            .collect();

        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].id, "4_z1");
        assert_eq!(objects[0].size, 42);
        assert_eq!(objects[0].uploaded_at.timestamp(), 1_760_000_000);
    }

    #[test]
    fn test_authorize_response_without_restriction() {
        let json = r#"{"accountId": "acc", "authorizationToken": "tok",
                       "apiUrl": "https://api000.backblazeb2.com", "allowed": {"bucketId": null, "bucketName": null}}"#;
        let auth: AuthorizeResponse = serde_json::from_str(json).unwrap();
        assert_eq!(auth.api_url, "https://api000.backblazeb2.com");
        assert!(auth.allowed.unwrap().bucket_id.is_none());
    }
}
