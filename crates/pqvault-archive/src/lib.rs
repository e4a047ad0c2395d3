//! pqvault-archive: per-user encrypted file containers
//!
//! A container is one file, `<username>_<archive>.enc`, holding a name → blob
//! map. Each blob carries its SHA-256 so damage is detectable after decryption;
//! damaged entries are quarantined, never rewritten.

pub mod archive;
pub mod codec;
pub mod entry;
pub mod envelope;
pub mod format;
pub mod store;

pub use archive::{AddOutcome, Archive, ArchiveStats, DiagnosticReport, RepairReport};
pub use codec::Limits;
pub use entry::{calculate_hash, FileEntry};
pub use store::ArchiveStore;
