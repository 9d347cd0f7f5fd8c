pub mod content_store;
pub mod metadata;

pub use content_store::{ContentStore, HasResult, ListEntry};
pub use metadata::ContentMetadata;
