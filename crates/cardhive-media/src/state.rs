use std::sync::Arc;

use cardhive_core::Config;
use cardhive_worker::UploadWorker;

use crate::services::MediaService;

/// Shared application state handed to every handler.
pub struct AppState {
    pub config: Config,
    pub media: MediaService,
    /// The queue holds only a weak reference to the handler; the state
    /// keeps it alive for the lifetime of the process.
    pub upload_worker: Arc<UploadWorker>,
}
