//! Upload resolution and storage

pub mod resolver;
pub mod store;

pub use resolver::{resolve_base64, resolve_path, ResolvedPdf};
pub use store::{spawn_sweeper, FileStore, StoredFile, DEFAULT_FILE_EXPIRY};
