//! World Sync Library
//!
//! Minecraft world backups: freeze saving over RCON, archive the `world*`
//! directories, publish the archive to Backblaze B2 under a retention tag and
//! prune what it supersedes.

pub mod config;
pub mod executor;
pub mod fs;
pub mod rcon;
pub mod retention;
pub mod storage;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use executor::{BackupRun, RunReport, RunSettings};
pub use utils::errors::SyncError;
pub type Result<T> = std::result::Result<T, SyncError>;
