use sha2::{Digest, Sha256};
use std::fmt;

/// Timestamp layout stored with every entry (local time).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One named blob inside an archive.
///
/// `path` records where the bytes were imported from. It is informational and
/// is not part of the on-disk payload, so it is empty after a load.
#[derive(Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub data: Vec<u8>,
    pub size: u64,
    pub timestamp: String,
    pub hash: String,
}

impl FileEntry {
    /// Build a consistent entry: size and hash are computed from `data`.
    pub fn new(name: impl Into<String>, path: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            size: data.len() as u64,
            hash: calculate_hash(&data),
            timestamp: current_timestamp(),
            data,
        }
    }

    pub fn size_matches(&self) -> bool {
        self.size == self.data.len() as u64
    }

    pub fn hash_matches(&self) -> bool {
        self.hash == calculate_hash(&self.data)
    }

    /// Declared size is non-zero but no bytes are present.
    pub fn is_empty_but_sized(&self) -> bool {
        self.data.is_empty() && self.size > 0
    }

    pub fn is_consistent(&self) -> bool {
        self.size_matches() && self.hash_matches()
    }
}

impl fmt::Debug for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileEntry")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("data_len", &self.data.len())
            .field("size", &self.size)
            .field("timestamp", &self.timestamp)
            .field("hash", &self.hash)
            .finish()
    }
}

/// Lowercase hex SHA-256 of `data`.
pub fn calculate_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn current_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_known_value() {
        assert_eq!(
            calculate_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_new_entry_is_consistent() {
        let entry = FileEntry::new("a.txt", "/tmp/a.txt", b"0123456789".to_vec());
        assert_eq!(entry.size, 10);
        assert!(entry.is_consistent());
        assert_eq!(entry.timestamp.len(), "2024-01-01 00:00:00".len());
    }

    #[test]
    fn test_detects_modified_data() {
        let mut entry = FileEntry::new("a.txt", "", b"original".to_vec());
        entry.data[0] = b'O';
        assert!(entry.size_matches());
        assert!(!entry.hash_matches());
    }

    #[test]
    fn test_empty_but_sized() {
        let mut entry = FileEntry::new("img.png", "", Vec::new());
        entry.size = 100;
        assert!(entry.is_empty_but_sized());
        assert!(!entry.size_matches());
    }

    #[test]
    fn test_debug_omits_data() {
        let entry = FileEntry::new("s.bin", "", vec![0xAB; 4]);
        let rendered = format!("{entry:?}");
        assert!(rendered.contains("data_len: 4"));
    }
}
