//! Upload transfer helpers.

pub mod progress;
pub mod progress_stream;

pub use progress::{format_bytes, UploadProgress};
pub use progress_stream::ProgressStream;
