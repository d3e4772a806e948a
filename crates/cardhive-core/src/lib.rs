//! CardHive Core Library
//!
//! Domain models, configuration, error types, and the pure upload helpers
//! (key sanitization, URL building, progress math) shared across the media
//! pipeline crates.

pub mod config;
pub mod error;
pub mod job_error;
pub mod models;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use error::AppError;
pub use job_error::{JobError, JobResultExt};
