//! CardHive Media Service
//!
//! Media intake and delivery for the card platform: accepts uploads over
//! HTTP, stages them locally, hands them to the durable upload queue, and
//! serves media records and live upload progress.

pub mod error;
pub mod handlers;
pub mod reconciler;
pub mod routes;
pub mod services;
pub mod staging;
pub mod state;

pub use reconciler::FailedUploadReconciler;
pub use routes::build_router;
pub use services::MediaService;
pub use state::AppState;
