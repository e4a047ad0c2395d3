pub mod config;
pub mod error;
pub mod fs;
pub mod types;

pub use error::{PqvError, PqvResult};
pub use types::{
    validate_archive_name, validate_entry_name, validate_new_username, validate_username, ArchiveId,
};
