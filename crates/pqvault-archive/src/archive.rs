//! Archive container state machine
//!
//! An [`Archive`] is `Unloaded` until `initialize`/`load` succeeds. While
//! loaded it holds the decoded entries plus the unwrapped container key, never
//! the password. Every mutation is written back atomically before returning.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::Serialize;

use pqvault_core::fs::atomic_write;
use pqvault_core::{validate_entry_name, ArchiveId, PqvError, PqvResult};
use pqvault_crypto::{legacy_password_key, mask, open, seal, KdfParams};

use crate::codec::{self, Limits};
use crate::entry::FileEntry;
use crate::envelope::Keyring;
use crate::format::{self, Frame};

/// Result of an add: a new name, or an existing entry overwritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Inserted,
    Replaced,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveStats {
    pub total_files: usize,
    pub total_size: u64,
    /// Newest entry timestamp, `None` for an empty archive.
    pub last_modified: Option<String>,
}

/// Read-only health report produced by [`Archive::diagnose`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiagnosticReport {
    pub total_entries: usize,
    pub size_mismatches: Vec<String>,
    pub hash_mismatches: Vec<String>,
    pub empty_but_sized: Vec<String>,
    pub empty_names: usize,
    pub quarantined: Vec<String>,
    pub legacy_format: bool,
}

impl DiagnosticReport {
    pub fn is_healthy(&self) -> bool {
        self.size_mismatches.is_empty()
            && self.hash_mismatches.is_empty()
            && self.empty_but_sized.is_empty()
            && self.empty_names == 0
            && self.quarantined.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub dropped_empty_names: usize,
    pub quarantined: Vec<String>,
    pub saved: bool,
}

impl RepairReport {
    pub fn changed(&self) -> bool {
        self.dropped_empty_names > 0 || !self.quarantined.is_empty()
    }
}

struct Loaded {
    keyring: Keyring,
    entries: BTreeMap<String, FileEntry>,
    /// Entries that failed an integrity check. Persisted untouched, hidden
    /// from listings and lookups until discarded.
    quarantine: BTreeMap<String, FileEntry>,
    /// lowercase name → exact names
    index: BTreeMap<String, Vec<String>>,
    legacy_format: bool,
}

impl Loaded {
    fn new(keyring: Keyring, decoded: Vec<FileEntry>, legacy_format: bool) -> Self {
        let mut loaded = Self {
            keyring,
            entries: BTreeMap::new(),
            quarantine: BTreeMap::new(),
            index: BTreeMap::new(),
            legacy_format,
        };
        for entry in decoded {
            if entry.hash_matches() {
                loaded.insert_live(entry);
            } else {
                tracing::warn!(entry = %entry.name, "hash mismatch on load, quarantining entry");
                loaded.quarantine.insert(entry.name.clone(), entry);
            }
        }
        loaded
    }

    fn insert_live(&mut self, entry: FileEntry) -> Option<FileEntry> {
        let name = entry.name.clone();
        let previous = self.entries.insert(name.clone(), entry);
        if previous.is_none() {
            self.index.entry(name.to_lowercase()).or_default().push(name);
        }
        previous
    }

    fn remove_live(&mut self, name: &str) -> Option<FileEntry> {
        let entry = self.entries.remove(name)?;
        let key = name.to_lowercase();
        if let Some(names) = self.index.get_mut(&key) {
            names.retain(|n| n != name);
            if names.is_empty() {
                self.index.remove(&key);
            }
        }
        Some(entry)
    }

    /// Exact match first, then the lowercase index. More than one
    /// case-insensitive candidate is an error rather than a guess.
    fn resolve(&self, name: &str) -> PqvResult<String> {
        if self.entries.contains_key(name) {
            return Ok(name.to_string());
        }
        match self.index.get(&name.to_lowercase()).map(Vec::as_slice) {
            Some([only]) => {
                tracing::debug!(requested = name, found = %only, "case-insensitive match");
                Ok(only.clone())
            }
            Some([_, _, ..]) => Err(PqvError::AmbiguousName(name.to_string())),
            _ => Err(PqvError::EntryNotFound(name.to_string())),
        }
    }

    fn entry_count(&self) -> usize {
        self.entries.len() + self.quarantine.len()
    }
}

pub struct Archive {
    id: ArchiveId,
    path: PathBuf,
    kdf: KdfParams,
    limits: Limits,
    state: Option<Loaded>,
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

impl Archive {
    /// Bind to `<dir>/<username>_<archive>.enc` without touching the disk.
    pub fn new(dir: &Path, id: ArchiveId, kdf: KdfParams, limits: Limits) -> Self {
        Self {
            path: dir.join(id.file_name()),
            id,
            kdf,
            limits,
            state: None,
        }
    }

    pub fn id(&self) -> &ArchiveId {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn is_loaded(&self) -> bool {
        self.state.is_some()
    }

    /// True if the archive was read from a legacy format and has not been
    /// saved since.
    pub fn is_legacy_format(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.legacy_format)
    }

    /// Load the existing file, or create and persist an empty archive.
    pub fn initialize(&mut self, password: &SecretString) -> PqvResult<()> {
        if self.exists() {
            tracing::debug!(archive = %self.id, "archive exists, loading");
            return self.load(password);
        }

        let keyring = Keyring::create(password, &self.kdf)?;
        self.state = Some(Loaded::new(keyring, Vec::new(), false));
        if let Err(e) = self.save() {
            self.state = None;
            return Err(e);
        }
        tracing::info!(archive = %self.id, "initialized new archive");
        Ok(())
    }

    /// Decrypt and decode the file. On any failure the archive is left
    /// unloaded and no entries are visible.
    pub fn load(&mut self, password: &SecretString) -> PqvResult<()> {
        self.state = None;

        let bytes = std::fs::read(&self.path)?;
        let loaded = self.decode_file(&bytes, password)?;

        tracing::info!(
            archive = %self.id,
            entries = loaded.entries.len(),
            quarantined = loaded.quarantine.len(),
            legacy = loaded.legacy_format,
            "archive loaded"
        );
        self.state = Some(loaded);
        Ok(())
    }

    fn decode_file(&self, bytes: &[u8], password: &SecretString) -> PqvResult<Loaded> {
        let frame = format::parse(bytes)?;
        match frame {
            Frame::Enveloped {
                salt,
                wrapped_key,
                sealed,
            } => {
                let keyring = Keyring::unlock(salt, wrapped_key, password, &self.kdf)?;
                let payload = open(&keyring.container_key, &format::payload_aad(&self.id), sealed)
                    .map_err(|e| PqvError::Corrupt(e.to_string()))?;
                let entries = codec::decode(&payload, &self.limits)?;
                Ok(Loaded::new(keyring, entries, false))
            }
            Frame::LegacyMasked(body) => {
                tracing::warn!(archive = %self.id, "reading legacy PQCENC01 archive; next save migrates it");
                let payload = mask::masked(body, &legacy_password_key(password));
                let entries = codec::decode(&payload, &self.limits)?;
                Ok(Loaded::new(Keyring::create(password, &self.kdf)?, entries, true))
            }
            Frame::LegacyPlain(body) => {
                tracing::warn!(archive = %self.id, "reading unencrypted legacy archive; next save encrypts it");
                let entries = codec::decode(body, &self.limits)?;
                Ok(Loaded::new(Keyring::create(password, &self.kdf)?, entries, true))
            }
        }
    }

    /// Check whether `password` opens the on-disk file without loading it.
    pub fn unlocks_with(&self, password: &SecretString) -> PqvResult<bool> {
        let bytes = std::fs::read(&self.path)?;
        match format::parse(&bytes)? {
            Frame::Enveloped {
                salt, wrapped_key, ..
            } => match Keyring::unlock(salt, wrapped_key, password, &self.kdf) {
                Ok(_) => Ok(true),
                Err(PqvError::AuthenticationFailed) => Ok(false),
                Err(e) => Err(e),
            },
            Frame::LegacyMasked(_) | Frame::LegacyPlain(_) => {
                Ok(self.decode_file(&bytes, password).is_ok())
            }
        }
    }

    /// Serialize, seal and atomically replace the file. Always writes the
    /// current `PQCENC02` format.
    pub fn save(&mut self) -> PqvResult<()> {
        let state = self.state.as_mut().ok_or(PqvError::NotLoaded)?;

        let payload = codec::encode(
            state.entries.values().chain(state.quarantine.values()),
            &self.limits,
        )?;
        let sealed = seal(
            &state.keyring.container_key,
            &format::payload_aad(&self.id),
            &payload,
        )?;
        let bytes = format::write_enveloped(&state.keyring.salt, &state.keyring.wrapped_key, &sealed);
        atomic_write(&self.path, &bytes, true)?;

        if state.legacy_format {
            tracing::info!(archive = %self.id, "migrated legacy archive to PQCENC02");
            state.legacy_format = false;
        }
        tracing::debug!(
            archive = %self.id,
            entries = state.entries.len(),
            bytes = bytes.len(),
            "archive saved"
        );
        Ok(())
    }

    /// Import a file from disk under `display_name` (default: its file name).
    pub fn add_file(&mut self, source: &Path, display_name: Option<&str>) -> PqvResult<AddOutcome> {
        if !self.is_loaded() {
            return Err(PqvError::NotLoaded);
        }
        if !source.is_file() {
            return Err(PqvError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("not a regular file: {}", source.display()),
            )));
        }
        let name = match display_name {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| PqvError::InvalidName(format!("{} has no file name", source.display())))?,
        };
        let data = std::fs::read(source)?;
        self.add_bytes(&name, data, &source.to_string_lossy())
    }

    /// Upsert an entry built from `data` and persist.
    pub fn add_bytes(&mut self, name: &str, data: Vec<u8>, source_path: &str) -> PqvResult<AddOutcome> {
        validate_entry_name(name, self.limits.max_name_len as usize)?;
        self.upsert(FileEntry::new(name, source_path, data))
    }

    /// Insert a prebuilt entry verbatim, without recomputing size or hash,
    /// and persist. Used when carrying entries over from another container.
    pub fn insert_entry(&mut self, entry: FileEntry) -> PqvResult<AddOutcome> {
        validate_entry_name(&entry.name, self.limits.max_name_len as usize)?;
        self.upsert(entry)
    }

    fn upsert(&mut self, entry: FileEntry) -> PqvResult<AddOutcome> {
        let max_files = self.limits.max_files as usize;
        let state = self.state.as_mut().ok_or(PqvError::NotLoaded)?;

        let name = entry.name.clone();
        let exists = state.entries.contains_key(&name) || state.quarantine.contains_key(&name);
        if !exists && state.entry_count() >= max_files {
            return Err(PqvError::LimitExceeded(format!(
                "archive already holds {max_files} entries"
            )));
        }

        let size = entry.data.len();
        let displaced_quarantine = state.quarantine.remove(&name);
        let previous = state.insert_live(entry);
        let outcome = if previous.is_some() || displaced_quarantine.is_some() {
            AddOutcome::Replaced
        } else {
            AddOutcome::Inserted
        };

        if let Err(e) = self.save() {
            self.rollback(&name, previous, displaced_quarantine);
            return Err(e);
        }
        tracing::info!(archive = %self.id, entry = %name, size, ?outcome, "entry stored");
        Ok(outcome)
    }

    fn rollback(
        &mut self,
        name: &str,
        previous: Option<FileEntry>,
        displaced_quarantine: Option<FileEntry>,
    ) {
        if let Some(state) = self.state.as_mut() {
            state.remove_live(name);
            if let Some(prev) = previous {
                state.insert_live(prev);
            }
            if let Some(q) = displaced_quarantine {
                state.quarantine.insert(name.to_string(), q);
            }
        }
    }

    fn lookup(&self, name: &str) -> PqvResult<&FileEntry> {
        let state = self.state.as_ref().ok_or(PqvError::NotLoaded)?;
        let key = state.resolve(name)?;
        state
            .entries
            .get(&key)
            .ok_or_else(|| PqvError::EntryNotFound(name.to_string()))
    }

    /// Write an entry to `output`. If `output` is an existing directory or
    /// ends with a separator, the stored entry name is appended. Returns the
    /// path written.
    pub fn extract(&self, name: &str, output: &Path) -> PqvResult<PathBuf> {
        let entry = self.lookup(name)?;
        if entry.data.is_empty() {
            return Err(PqvError::EmptyEntry(entry.name.clone()));
        }

        let raw = output.as_os_str().to_string_lossy();
        let target = if output.is_dir() || raw.ends_with('/') || raw.ends_with('\\') {
            validate_entry_name(&entry.name, self.limits.max_name_len as usize)?;
            output.join(&entry.name)
        } else {
            output.to_path_buf()
        };

        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&target, &entry.data)?;

        tracing::info!(
            archive = %self.id,
            entry = %entry.name,
            path = %target.display(),
            bytes = entry.data.len(),
            "entry extracted"
        );
        Ok(target)
    }

    pub fn extract_to_memory(&self, name: &str) -> PqvResult<Vec<u8>> {
        let entry = self.lookup(name)?;
        if entry.data.is_empty() {
            return Err(PqvError::EmptyEntry(entry.name.clone()));
        }
        Ok(entry.data.clone())
    }

    /// Remove an entry (same name resolution as extract) and persist.
    pub fn remove_file(&mut self, name: &str) -> PqvResult<FileEntry> {
        let state = self.state.as_mut().ok_or(PqvError::NotLoaded)?;
        let key = state.resolve(name)?;
        let removed = state
            .remove_live(&key)
            .ok_or_else(|| PqvError::EntryNotFound(name.to_string()))?;

        if let Err(e) = self.save() {
            if let Some(state) = self.state.as_mut() {
                state.insert_live(removed);
            }
            return Err(e);
        }
        tracing::info!(archive = %self.id, entry = %key, "entry removed");
        Ok(removed)
    }

    /// Live entries sorted by name. Empty when unloaded.
    pub fn file_list(&self) -> Vec<&FileEntry> {
        self.state
            .as_ref()
            .map(|s| s.entries.values().collect())
            .unwrap_or_default()
    }

    /// Exact-name access to an entry's bytes.
    pub fn file_data(&self, name: &str) -> Option<&[u8]> {
        self.state
            .as_ref()
            .and_then(|s| s.entries.get(name))
            .map(|e| e.data.as_slice())
    }

    pub fn stats(&self) -> ArchiveStats {
        let entries = self.file_list();
        ArchiveStats {
            total_files: entries.len(),
            total_size: entries.iter().map(|e| e.size).sum(),
            last_modified: entries.iter().map(|e| e.timestamp.clone()).max(),
        }
    }

    /// True only if every live entry matches its stored hash and nothing is
    /// quarantined. False when unloaded.
    pub fn verify_integrity(&self) -> bool {
        let Some(state) = self.state.as_ref() else {
            return false;
        };
        if !state.quarantine.is_empty() {
            tracing::warn!(
                archive = %self.id,
                quarantined = state.quarantine.len(),
                "integrity check failed: quarantined entries present"
            );
            return false;
        }
        match state.entries.values().find(|e| !e.hash_matches()) {
            Some(bad) => {
                tracing::warn!(archive = %self.id, entry = %bad.name, "integrity check failed");
                false
            }
            None => true,
        }
    }

    pub fn diagnose(&self) -> PqvResult<DiagnosticReport> {
        let state = self.state.as_ref().ok_or(PqvError::NotLoaded)?;
        let mut report = DiagnosticReport {
            total_entries: state.entries.len(),
            quarantined: state.quarantine.keys().cloned().collect(),
            legacy_format: state.legacy_format,
            ..DiagnosticReport::default()
        };

        for entry in state.entries.values() {
            if entry.name.is_empty() {
                report.empty_names += 1;
            }
            if entry.is_empty_but_sized() {
                report.empty_but_sized.push(entry.name.clone());
            } else if !entry.size_matches() {
                report.size_mismatches.push(entry.name.clone());
            }
            if !entry.hash_matches() {
                report.hash_mismatches.push(entry.name.clone());
            }
        }

        if !report.is_healthy() {
            tracing::warn!(archive = %self.id, ?report, "archive has problems");
        }
        Ok(report)
    }

    /// Drop nameless entries and quarantine inconsistent ones. Stored hashes
    /// are never recomputed and no data is synthesized. Persists if anything
    /// changed; a failed save leaves the loaded entries as they were.
    pub fn repair(&mut self) -> PqvResult<RepairReport> {
        let state = self.state.as_mut().ok_or(PqvError::NotLoaded)?;
        let mut report = RepairReport::default();

        let dropped_live = state.remove_live("");
        let dropped_quarantined = state.quarantine.remove("");
        report.dropped_empty_names =
            usize::from(dropped_live.is_some()) + usize::from(dropped_quarantined.is_some());

        let damaged: Vec<String> = state
            .entries
            .values()
            .filter(|e| !e.is_consistent())
            .map(|e| e.name.clone())
            .collect();
        for name in damaged {
            if let Some(entry) = state.remove_live(&name) {
                tracing::warn!(
                    archive = %self.id,
                    entry = %name,
                    size = entry.size,
                    data_len = entry.data.len(),
                    "quarantining inconsistent entry"
                );
                state.quarantine.insert(name.clone(), entry);
                report.quarantined.push(name);
            }
        }

        if report.changed() {
            if let Err(e) = self.save() {
                if let Some(state) = self.state.as_mut() {
                    for name in &report.quarantined {
                        if let Some(entry) = state.quarantine.remove(name) {
                            state.insert_live(entry);
                        }
                    }
                    if let Some(entry) = dropped_live {
                        state.insert_live(entry);
                    }
                    if let Some(entry) = dropped_quarantined {
                        state.quarantine.insert(String::new(), entry);
                    }
                }
                return Err(e);
            }
            report.saved = true;
        }
        tracing::info!(archive = %self.id, ?report, "repair finished");
        Ok(report)
    }

    /// Names of quarantined entries.
    pub fn quarantined(&self) -> Vec<&str> {
        self.state
            .as_ref()
            .map(|s| s.quarantine.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Permanently delete quarantined entries. Returns how many were removed.
    pub fn discard_quarantined(&mut self) -> PqvResult<usize> {
        let state = self.state.as_mut().ok_or(PqvError::NotLoaded)?;
        let discarded = std::mem::take(&mut state.quarantine);
        if discarded.is_empty() {
            return Ok(0);
        }

        if let Err(e) = self.save() {
            if let Some(state) = self.state.as_mut() {
                state.quarantine = discarded;
            }
            return Err(e);
        }
        tracing::warn!(archive = %self.id, count = discarded.len(), "discarded quarantined entries");
        Ok(discarded.len())
    }

    /// Delete the file (best effort) and start over empty under `password`.
    pub fn reset(&mut self, password: &SecretString) -> PqvResult<()> {
        self.state = None;
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(archive = %self.id, error = %e, "could not delete archive file");
            }
        }
        let keyring = Keyring::create(password, &self.kdf)?;
        self.state = Some(Loaded::new(keyring, Vec::new(), false));
        self.save()?;
        tracing::info!(archive = %self.id, "archive reset");
        Ok(())
    }

    /// Re-wrap the container key under `new`. `old` must unwrap the key
    /// stored on disk. The sealed payload is copied byte for byte. Legacy
    /// files are loaded with `old` and written fresh under `new`.
    pub fn change_password(&mut self, old: &SecretString, new: &SecretString) -> PqvResult<()> {
        let bytes = std::fs::read(&self.path)?;
        let frame = format::parse(&bytes)?;

        let rotated = match frame {
            Frame::Enveloped {
                salt,
                wrapped_key,
                sealed,
            } => {
                let current = Keyring::unlock(salt, wrapped_key, old, &self.kdf)?;
                let rotated = current.rewrap(new, &self.kdf)?;
                let out = format::write_enveloped(&rotated.salt, &rotated.wrapped_key, sealed);
                atomic_write(&self.path, &out, true)?;
                rotated
            }
            Frame::LegacyMasked(_) | Frame::LegacyPlain(_) => {
                let loaded = self.decode_file(&bytes, old)?;
                let rotated = loaded.keyring.rewrap(new, &self.kdf)?;
                self.state = Some(Loaded { keyring: rotated, ..loaded });
                self.save()?;
                tracing::info!(archive = %self.id, "archive password changed");
                return Ok(());
            }
        };

        let stale = match self.state.as_mut() {
            Some(state)
                if state.keyring.container_key.as_bytes() == rotated.container_key.as_bytes() =>
            {
                state.keyring = rotated;
                false
            }
            Some(_) => true,
            None => false,
        };
        if stale {
            // loaded from a different file generation; force a reload
            self.state = None;
        }
        tracing::info!(archive = %self.id, "archive password changed");
        Ok(())
    }
}
