//! Configuration management for world-sync.
//!
//! Values come from the process environment, optionally seeded from a `.env`
//! file. The CLI layers its overrides on top of the loaded [`Config`].

use crate::retention::remote::RetentionPolicy;
use crate::utils::{Result, SyncError};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub world: WorldConfig,
    pub backup: BackupConfig,
    pub rcon: Option<RconConfig>,
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// B2 application key id
    pub key_id: String,

    /// B2 application key
    pub app_key: String,

    /// Target bucket name
    pub bucket: String,

    /// Authorization endpoint
    pub api_url: String,

    /// Per-request deadline for network calls
    pub timeout: Duration,

    /// Attempts per object store operation
    pub retries: u32,
}

#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// Server root containing the `world*` directories
    pub server_path: PathBuf,

    /// Directory name prefix selecting what gets archived
    pub prefix: String,

    /// File names never written to the archive
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Local directory holding archives
    pub dir: PathBuf,

    /// Archives kept locally after a run (0 = delete after upload)
    pub keep_local: usize,

    /// Remote retention policy
    pub policy: RetentionPolicy,

    /// zstd level (1-22)
    pub compression_level: i32,
}

#[derive(Debug, Clone)]
pub struct RconConfig {
    /// `host:port` of the remote console
    pub address: String,

    pub password: String,

    /// Pause between flushing and archiving
    pub settle: Duration,

    /// Deadline for each console session
    pub timeout: Duration,

    /// `server.properties` the settings were read from, if not from the environment
    pub discovered_in: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

// Default values
const DEFAULT_API_URL: &str = "https://api.backblazeb2.com";
const DEFAULT_BACKUP_DIR: &str = "./backups";
const DEFAULT_WORLD_PREFIX: &str = "world";
const DEFAULT_EXCLUDE: &str = "session.lock";
const DEFAULT_RCON_HOST: &str = "127.0.0.1";
const DEFAULT_RCON_PORT: u16 = 25575;
const DEFAULT_SETTLE_SECS: u64 = 5;
const DEFAULT_KEEP_LOCAL: usize = 10;
const DEFAULT_COMPRESSION_LEVEL: i32 = 3;
const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_RETRIES: u32 = 3;

impl Config {
    /// Load configuration from the environment, reading `.env` first if present.
    pub fn from_env(env_file: Option<&Path>) -> Result<Self> {
        match env_file {
            Some(path) => {
                dotenvy::from_path(path).map_err(|e| {
                    SyncError::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
            }
            None => {
                let _ = dotenvy::dotenv();
            }
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &str| {
            get(key).ok_or_else(|| SyncError::Config(format!("{} is required", key)))
        };

        let server_path = match (get("SERVER_PATH"), get("WORLD_PATH")) {
            (Some(path), _) => PathBuf::from(path),
            (None, Some(world)) => {
                let world = PathBuf::from(world);
                world
                    .parent()
                    .map(Path::to_path_buf)
                    .ok_or_else(|| SyncError::Config("WORLD_PATH has no parent directory".into()))?
            }
            (None, None) => return Err(SyncError::Config("SERVER_PATH is required".into())),
        };

        let timeout = Duration::from_secs(parse_or(&get, "NETWORK_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS)?);

        let storage = StorageConfig {
            key_id: require("B2_KEY_ID")?,
            app_key: require("B2_APP_KEY")?,
            bucket: require("B2_BUCKET_NAME")?,
            api_url: get("B2_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            timeout,
            retries: parse_or(&get, "UPLOAD_RETRIES", DEFAULT_RETRIES)?.max(1),
        };

        let exclude = get("EXCLUDE_FILES")
            .unwrap_or_else(|| DEFAULT_EXCLUDE.to_string())
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect();

        let world = WorldConfig {
            prefix: get("WORLD_PREFIX").unwrap_or_else(|| DEFAULT_WORLD_PREFIX.to_string()),
            exclude,
            server_path,
        };

        let policy = match get("RETENTION_POLICY") {
            Some(value) => value.parse()?,
            None => RetentionPolicy::default(),
        };

        let compression_level = parse_or(&get, "COMPRESSION_LEVEL", DEFAULT_COMPRESSION_LEVEL)?;
        if !(1..=22).contains(&compression_level) {
            return Err(SyncError::Config(format!(
                "COMPRESSION_LEVEL must be between 1 and 22, got {}",
                compression_level
            )));
        }

        let backup = BackupConfig {
            dir: PathBuf::from(get("BACKUP_DIR").unwrap_or_else(|| DEFAULT_BACKUP_DIR.to_string())),
            keep_local: parse_or(&get, "LOCAL_KEEP", DEFAULT_KEEP_LOCAL)?,
            policy,
            compression_level,
        };

        let settle = Duration::from_secs(parse_or(&get, "RCON_SETTLE_SECS", DEFAULT_SETTLE_SECS)?);
        let rcon = match get("RCON_PASSWORD") {
            Some(password) => {
                let host = get("RCON_HOST").unwrap_or_else(|| DEFAULT_RCON_HOST.to_string());
                let port: u16 = parse_or(&get, "RCON_PORT", DEFAULT_RCON_PORT)?;
                Some(RconConfig {
                    address: format!("{}:{}", host, port),
                    password,
                    settle,
                    timeout,
                    discovered_in: None,
                })
            }
            None => crate::rcon::load_rcon_settings(&world.server_path)?.map(|(address, password)| {
                RconConfig {
                    address,
                    password,
                    settle,
                    timeout,
                    discovered_in: Some(world.server_path.join("server.properties")),
                }
            }),
        };

        let log = LogConfig {
            level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        };

        Ok(Config {
            storage,
            world,
            backup,
            rcon,
            log,
        })
    }
}

fn parse_or<G, T>(get: &G, key: &str, default: T) -> Result<T>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| SyncError::Config(format!("{}={:?} is invalid: {}", key, raw, e))),
        None => Ok(default),
    }
}
