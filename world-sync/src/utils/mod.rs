//! Utility modules for world-sync.

pub mod errors;
pub mod logger;

pub use errors::{Result, SyncError};
