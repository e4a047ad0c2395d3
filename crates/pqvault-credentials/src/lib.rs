//! pqvault-credentials: per-user credential records and master password rotation
//!
//! Record lifecycle per username:
//!   nonexistent -> `create_user` -> v3
//!   v3 -> `change_master_password` -> v3 under the new password
//!   v2 or legacy v1 -> verify, or `upgrade_legacy_record` -> v3

pub mod record;
pub mod rotate;
pub mod vault;

pub use record::{CredentialRecord, LegacyRecord, SealedRecord, CURRENT_VERSION, UNBOUND_VERSION};
pub use rotate::{rotate_archive, ArchiveRotation, RotationReport};
pub use vault::CredentialVault;
