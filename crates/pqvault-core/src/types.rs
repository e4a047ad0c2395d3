use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PqvError, PqvResult};

/// File extension shared by credential records and archive containers.
pub const ENC_EXTENSION: &str = "enc";

/// Identity of an archive container: the owning user plus the archive name.
///
/// On disk this maps to `<username>_<archive_name>.enc`. New usernames may
/// not contain `_`; records carried over from older releases may, so the
/// split is made against a known username rather than the first underscore.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArchiveId {
    pub username: String,
    pub archive_name: String,
}

impl ArchiveId {
    pub fn new(username: &str, archive_name: &str) -> PqvResult<Self> {
        validate_username(username)?;
        validate_archive_name(archive_name)?;
        Ok(Self {
            username: username.to_string(),
            archive_name: archive_name.to_string(),
        })
    }

    pub fn file_name(&self) -> String {
        format!("{}_{}.{ENC_EXTENSION}", self.username, self.archive_name)
    }

    /// Bytes bound into the payload AAD so a container cannot be swapped
    /// for another user's or another archive's file.
    pub fn binding(&self) -> String {
        format!("{}_{}", self.username, self.archive_name)
    }

    /// Recover an id from a directory entry owned by `username`.
    /// Returns `None` for files that belong to other users or are not containers.
    pub fn parse(username: &str, file_name: &str) -> Option<Self> {
        let rest = file_name.strip_prefix(username)?.strip_prefix('_')?;
        let archive_name = rest.strip_suffix(&format!(".{ENC_EXTENSION}"))?;
        if archive_name.is_empty() {
            return None;
        }
        Some(Self {
            username: username.to_string(),
            archive_name: archive_name.to_string(),
        })
    }
}

impl fmt::Display for ArchiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.username, self.archive_name)
    }
}

fn validate_path_component(kind: &str, value: &str) -> PqvResult<()> {
    if value.is_empty() {
        return Err(PqvError::InvalidName(format!("{kind} must not be empty")));
    }
    if value == "." || value == ".." {
        return Err(PqvError::InvalidName(format!("{kind} must not be '{value}'")));
    }
    if value.contains(['/', '\\', '\0']) {
        return Err(PqvError::InvalidName(format!(
            "{kind} '{value}' contains a path separator"
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(PqvError::InvalidName(format!(
            "{kind} '{value}' contains control characters"
        )));
    }
    Ok(())
}

/// Usernames become file names, so they are restricted to a single safe
/// path component. Accepts every name an existing record can carry.
pub fn validate_username(username: &str) -> PqvResult<()> {
    validate_path_component("username", username)
}

/// Rules for creating a user: a valid username without `_`, so that new
/// archive file names split unambiguously.
pub fn validate_new_username(username: &str) -> PqvResult<()> {
    validate_username(username)?;
    if username.contains('_') {
        return Err(PqvError::InvalidName(format!(
            "username '{username}' must not contain '_'"
        )));
    }
    Ok(())
}

pub fn validate_archive_name(name: &str) -> PqvResult<()> {
    validate_path_component("archive name", name)
}

/// Entry names are stored inside the encrypted payload and written out on
/// extraction, so they must be a single path component within `max_len` bytes.
pub fn validate_entry_name(name: &str, max_len: usize) -> PqvResult<()> {
    validate_path_component("entry name", name)?;
    if name.len() > max_len {
        return Err(PqvError::LimitExceeded(format!(
            "entry name is {} bytes (max {max_len})",
            name.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_and_parse() {
        let id = ArchiveId::new("alice", "docs").unwrap();
        assert_eq!(id.file_name(), "alice_docs.enc");
        assert_eq!(id.binding(), "alice_docs");
        assert_eq!(ArchiveId::parse("alice", "alice_docs.enc"), Some(id));
    }

    #[test]
    fn test_parse_archive_name_with_underscore() {
        let id = ArchiveId::parse("bob", "bob_tax_2024.enc").unwrap();
        assert_eq!(id.archive_name, "tax_2024");
    }

    #[test]
    fn test_parse_rejects_other_users() {
        assert!(ArchiveId::parse("al", "alice_docs.enc").is_none());
        assert!(ArchiveId::parse("alice", "alice.enc").is_none());
        assert!(ArchiveId::parse("alice", "alice_.enc").is_none());
        assert!(ArchiveId::parse("alice", "alice_docs.txt").is_none());
    }

    #[test]
    fn test_username_rules() {
        assert!(validate_username("alice").is_ok());
        assert!(validate_username("john_doe").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("..").is_err());
        assert!(validate_username("../etc").is_err());
        assert!(validate_username("a/b").is_err());

        assert!(validate_new_username("alice").is_ok());
        assert!(validate_new_username("a_b").is_err());
        assert!(validate_new_username("a/b").is_err());
    }

    #[test]
    fn test_embedded_dots_allowed() {
        assert!(validate_entry_name("report..final.pdf", 1024).is_ok());
        assert!(validate_entry_name("...", 1024).is_ok());
        assert!(validate_archive_name("v1..2").is_ok());
        assert!(ArchiveId::new("alice", "v1..2").is_ok());
        assert!(validate_archive_name(".").is_err());
        assert!(validate_archive_name("..").is_err());
    }

    #[test]
    fn test_entry_name_rules() {
        assert!(validate_entry_name("report.pdf", 1024).is_ok());
        assert!(validate_entry_name("", 1024).is_err());
        assert!(validate_entry_name("sub/dir.txt", 1024).is_err());
        assert!(validate_entry_name("..", 1024).is_err());
        assert!(validate_entry_name("a\\b", 1024).is_err());
        assert!(validate_entry_name("nul\0byte", 1024).is_err());
        assert!(matches!(
            validate_entry_name(&"x".repeat(1025), 1024),
            Err(PqvError::LimitExceeded(_))
        ));
    }
}
