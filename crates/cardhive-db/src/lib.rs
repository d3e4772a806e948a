//! CardHive Database Library
//!
//! Repository implementations for the media upload pipeline. Repositories
//! own all SQL; callers work with the domain models from `cardhive-core`.

pub mod db;

pub use db::{MediaFileRepository, ReapOutcome, UploadJobRepository, JOB_NOTIFY_CHANNEL};
