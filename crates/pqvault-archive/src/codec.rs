//! Binary payload codec
//!
//! Layout (all integers little-endian):
//! ```text
//! u32 file_count
//! per file:
//!   u32 name_len      name (UTF-8)
//!   u64 data_len      data
//!   u32 timestamp_len timestamp (UTF-8)
//!   u32 hash_len      hash (hex)
//! ```
//!
//! Decoding is all-or-nothing: any bound violation, short read, duplicate
//! name or trailing byte rejects the whole payload.

use std::collections::HashSet;

use pqvault_core::config::ArchiveConfig;
use pqvault_core::{PqvError, PqvResult};

use crate::entry::FileEntry;

/// Sanity bounds checked before any allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_files: u32,
    pub max_name_len: u32,
    pub max_timestamp_len: u32,
    pub max_hash_len: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self::from(&ArchiveConfig::default())
    }
}

impl From<&ArchiveConfig> for Limits {
    fn from(config: &ArchiveConfig) -> Self {
        Self {
            max_files: config.max_files,
            max_name_len: config.max_name_len,
            max_timestamp_len: config.max_timestamp_len,
            max_hash_len: config.max_hash_len,
        }
    }
}

/// Serialize entries. The data length written is always `data.len()`; a
/// declared `size` that disagrees with the data cannot be represented.
pub fn encode<'a>(
    entries: impl IntoIterator<Item = &'a FileEntry>,
    limits: &Limits,
) -> PqvResult<Vec<u8>> {
    let entries: Vec<&FileEntry> = entries.into_iter().collect();
    if entries.len() > limits.max_files as usize {
        return Err(PqvError::LimitExceeded(format!(
            "{} entries (max {})",
            entries.len(),
            limits.max_files
        )));
    }

    let capacity = 4 + entries
        .iter()
        .map(|e| 20 + e.name.len() + e.data.len() + e.timestamp.len() + e.hash.len())
        .sum::<usize>();
    let mut out = Vec::with_capacity(capacity);

    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for entry in entries {
        put_str(&mut out, "name", &entry.name, limits.max_name_len)?;
        out.extend_from_slice(&(entry.data.len() as u64).to_le_bytes());
        out.extend_from_slice(&entry.data);
        put_str(&mut out, "timestamp", &entry.timestamp, limits.max_timestamp_len)?;
        put_str(&mut out, "hash", &entry.hash, limits.max_hash_len)?;
    }
    Ok(out)
}

fn put_str(out: &mut Vec<u8>, field: &str, value: &str, max: u32) -> PqvResult<()> {
    if value.len() > max as usize {
        return Err(PqvError::LimitExceeded(format!(
            "{field} is {} bytes (max {max})",
            value.len()
        )));
    }
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

/// Parse a payload into entries. `path` is left empty; `size` is the stored
/// data length.
pub fn decode(bytes: &[u8], limits: &Limits) -> PqvResult<Vec<FileEntry>> {
    let mut reader = Reader { bytes, offset: 0 };

    let count = reader.u32("file count")?;
    if count > limits.max_files {
        return Err(corrupt(format!(
            "unreasonable file count {count} (max {})",
            limits.max_files
        )));
    }

    let mut entries = Vec::with_capacity(count as usize);
    let mut seen = HashSet::with_capacity(count as usize);
    for i in 0..count {
        let name = reader.string(&format!("file {i} name"), limits.max_name_len)?;
        let data_len = reader.u64(&format!("file {i} size"))?;
        let data = reader.take(&format!("file {i} data"), data_len)?.to_vec();
        let timestamp = reader.string(&format!("file {i} timestamp"), limits.max_timestamp_len)?;
        let hash = reader.string(&format!("file {i} hash"), limits.max_hash_len)?;

        if !seen.insert(name.clone()) {
            return Err(corrupt(format!("duplicate entry name '{name}'")));
        }
        entries.push(FileEntry {
            name,
            path: String::new(),
            size: data_len,
            data,
            timestamp,
            hash,
        });
    }

    if reader.remaining() != 0 {
        return Err(corrupt(format!(
            "{} trailing bytes after {count} entries",
            reader.remaining()
        )));
    }
    Ok(entries)
}

fn corrupt(msg: String) -> PqvError {
    PqvError::Corrupt(msg)
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, what: &str, len: u64) -> PqvResult<&'a [u8]> {
        if len > self.remaining() as u64 {
            return Err(corrupt(format!(
                "data overflow reading {what}: need {len} bytes, {} left",
                self.remaining()
            )));
        }
        let len = len as usize;
        let bytes = self.bytes;
        let slice = &bytes[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn u32(&mut self, what: &str) -> PqvResult<u32> {
        let raw = self.take(what, 4)?;
        let mut buf = [0u8; 4];
        buf.copy_from_slice(raw);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self, what: &str) -> PqvResult<u64> {
        let raw = self.take(what, 8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(raw);
        Ok(u64::from_le_bytes(buf))
    }

    fn string(&mut self, what: &str, max: u32) -> PqvResult<String> {
        let len = self.u32(what)?;
        if len > max {
            return Err(corrupt(format!("unreasonable {what} length {len} (max {max})")));
        }
        let raw = self.take(what, u64::from(len))?;
        String::from_utf8(raw.to_vec()).map_err(|_| corrupt(format!("{what} is not valid UTF-8")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> Vec<FileEntry> {
        vec![
            FileEntry::new("notes.txt", "/home/a/notes.txt", b"hello".to_vec()),
            FileEntry::new("empty.bin", "", Vec::new()),
            FileEntry::new("Photo.JPG", "", vec![0xFF; 300]),
        ]
    }

    #[test]
    fn test_roundtrip_preserves_fields() {
        let entries = sample();
        let bytes = encode(&entries, &Limits::default()).unwrap();
        let decoded = decode(&bytes, &Limits::default()).unwrap();

        assert_eq!(decoded.len(), 3);
        for (a, b) in entries.iter().zip(&decoded) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.data, b.data);
            assert_eq!(a.size, b.size);
            assert_eq!(a.timestamp, b.timestamp);
            assert_eq!(a.hash, b.hash);
            assert!(b.path.is_empty(), "path is not persisted");
        }
    }

    #[test]
    fn test_empty_payload() {
        let bytes = encode(std::iter::empty(), &Limits::default()).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0]);
        assert!(decode(&bytes, &Limits::default()).unwrap().is_empty());
    }

    #[test]
    fn test_layout_is_little_endian() {
        let entry = FileEntry {
            name: "a".into(),
            path: String::new(),
            data: vec![7],
            size: 1,
            timestamp: "t".into(),
            hash: "h".into(),
        };
        let bytes = encode([&entry], &Limits::default()).unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.push(b'a');
        expected.extend_from_slice(&1u64.to_le_bytes());
        expected.push(7);
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.push(b't');
        expected.extend_from_slice(&1u32.to_le_bytes());
        expected.push(b'h');
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_rejects_too_many_files() {
        let bytes = 1001u32.to_le_bytes();
        let err = decode(&bytes, &Limits::default()).unwrap_err();
        assert!(matches!(err, PqvError::Corrupt(_)));
    }

    #[test]
    fn test_rejects_long_name() {
        let mut bytes = 1u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&1025u32.to_le_bytes());
        bytes.extend(vec![b'a'; 1025]);
        assert!(decode(&bytes, &Limits::default()).is_err());
    }

    #[test]
    fn test_rejects_long_timestamp_and_hash() {
        let mut entry = FileEntry::new("a", "", vec![1]);
        entry.timestamp = "x".repeat(65);
        let lax = Limits {
            max_timestamp_len: 1000,
            ..Limits::default()
        };
        let bytes = encode([&entry], &lax).unwrap();
        assert!(decode(&bytes, &Limits::default()).is_err());

        let mut entry = FileEntry::new("a", "", vec![1]);
        entry.hash = "f".repeat(129);
        let lax = Limits {
            max_hash_len: 1000,
            ..Limits::default()
        };
        let bytes = encode([&entry], &lax).unwrap();
        assert!(decode(&bytes, &Limits::default()).is_err());
    }

    #[test]
    fn test_rejects_oversized_data_length() {
        let mut bytes = 1u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(b'a');
        bytes.extend_from_slice(&u64::MAX.to_le_bytes());
        assert!(decode(&bytes, &Limits::default()).is_err());
    }

    #[test]
    fn test_rejects_duplicate_names() {
        let a = FileEntry::new("same", "", vec![1]);
        let b = FileEntry::new("same", "", vec![2]);
        let bytes = encode([&a, &b], &Limits::default()).unwrap();
        let err = decode(&bytes, &Limits::default()).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut bytes = encode(&sample(), &Limits::default()).unwrap();
        bytes.push(0);
        assert!(decode(&bytes, &Limits::default()).is_err());
    }

    #[test]
    fn test_every_truncation_fails() {
        let bytes = encode(&sample(), &Limits::default()).unwrap();
        for cut in 0..bytes.len() {
            assert!(
                decode(&bytes[..cut], &Limits::default()).is_err(),
                "truncation at {cut} decoded"
            );
        }
    }

    #[test]
    fn test_encode_enforces_limits() {
        let entry = FileEntry::new("x".repeat(20), "", vec![]);
        let tight = Limits {
            max_name_len: 10,
            ..Limits::default()
        };
        assert!(matches!(
            encode([&entry], &tight),
            Err(PqvError::LimitExceeded(_))
        ));
    }

    fn arb_entry() -> impl Strategy<Value = FileEntry> {
        (
            "[a-zA-Z0-9._-]{1,40}",
            proptest::collection::vec(any::<u8>(), 0..256),
        )
            .prop_map(|(name, data)| FileEntry::new(name, "", data))
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(
            entries in proptest::collection::btree_map("[a-zA-Z0-9._-]{1,40}", arb_entry(), 0..16)
        ) {
            let entries: Vec<FileEntry> = entries
                .into_iter()
                .map(|(name, mut e)| { e.name = name; e })
                .collect();
            let bytes = encode(&entries, &Limits::default()).unwrap();
            let decoded = decode(&bytes, &Limits::default()).unwrap();

            prop_assert_eq!(decoded.len(), entries.len());
            for (a, b) in entries.iter().zip(&decoded) {
                prop_assert_eq!(&a.name, &b.name);
                prop_assert_eq!(&a.data, &b.data);
                prop_assert_eq!(&a.hash, &b.hash);
                prop_assert!(b.is_consistent());
            }
        }
    }
}
