mod content_type;
mod file_info;
mod store_key;

pub use content_type::ContentType;
pub use file_info::FileInfo;
pub use store_key::{StoreKey, StoreKeyParseError};
