//! Database repositories for data access layer
//!
//! Each repository is responsible for one table and provides the queries
//! the pipeline needs. No other crate issues SQL.

pub mod job;
pub mod media_file;

pub use job::{ReapOutcome, UploadJobRepository, JOB_NOTIFY_CHANNEL};
pub use media_file::MediaFileRepository;
