//! CardHive Cache Library
//!
//! Read-optimized progress snapshot cache backed by Redis. The cache is
//! strictly an accelerator for progress polling: every write is
//! best-effort and every miss falls back to the database record.

pub mod progress;

pub use progress::{ProgressCache, RedisProgressCache};
