//! Backup retention: tag classification, remote publishing, local pruning.

pub mod local;
pub mod remote;
pub mod tag;

pub use local::prune_local;
pub use remote::{PublishOutcome, Publisher, RetentionPolicy};
pub use tag::{classify, RetentionTag};
