//! Domain models for the media pipeline.

pub mod job;
pub mod media_file;

pub use job::{UploadJob, UploadJobPayload, UploadJobStatus};
pub use media_file::{
    CreateMediaUpload, FindMediaFilesQuery, MediaFile, MediaFileResponse, MediaFileStatus,
    Pagination, ProgressSnapshot, SortOrder,
};
