//! CardHive Worker Library
//!
//! Background upload machinery: the durable job queue's worker pool, the
//! progress reporting gate, and the upload handler that streams staged
//! files to object storage.

pub mod context;
pub mod gate;
pub mod queue;
pub mod worker;

pub use context::{MediaFileStore, UploadJobHandler};
pub use gate::ProgressGate;
pub use queue::{UploadQueue, UploadQueueConfig};
pub use worker::UploadWorker;
