pub mod media_get;
pub mod media_list;
pub mod media_upload;

pub use media_get::{get_media, get_media_progress};
pub use media_list::list_media;
pub use media_upload::upload_media;
