//! CardHive Storage Library
//!
//! Object-storage abstraction for the media pipeline: the [`ObjectStorage`]
//! trait plus the S3 implementation used in production. Uploads stream the
//! staged file to the store as a multipart upload with a bounded part size
//! and a bounded number of in-flight parts, emitting byte-count progress
//! events as parts complete.

pub mod factory;
pub mod s3;
pub mod traits;

pub use factory::create_storage;
pub use s3::S3Storage;
pub use traits::{
    ObjectStorage, ProgressFn, StorageError, StorageResult, TransferProgress, UploadOutcome,
};
