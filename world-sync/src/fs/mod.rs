//! Local filesystem: world traversal, archive writing, run locking.

pub mod archive;
pub mod lock;
pub mod walker;

pub use archive::{archive_name, create_archive, ArchiveOptions, ArchiveSummary};
pub use lock::RunLock;
pub use walker::WalkOptions;
