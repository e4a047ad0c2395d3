//! Master password rotation across a real users directory and archive store.

use pqvault_archive::ArchiveStore;
use pqvault_core::config::PqvConfig;
use pqvault_core::PqvError;
use pqvault_credentials::{CredentialVault, SealedRecord, UNBOUND_VERSION};
use pqvault_crypto::{
    derive_key, encapsulate, keypair, mask, random_bytes, seal_detached, KdfParams,
    GCM_NONCE_SIZE, SALT_SIZE,
};
use secrecy::SecretString;
use tempfile::TempDir;

struct Fixture {
    _root: TempDir,
    vault: CredentialVault,
    store: ArchiveStore,
}

fn fixture() -> Fixture {
    let root = TempDir::new().unwrap();
    let mut config = PqvConfig::with_base_dir(root.path());
    config.kdf.scrypt_log_n = 10;
    Fixture {
        vault: CredentialVault::open(&config).unwrap(),
        store: ArchiveStore::from_config(&config),
        _root: root,
    }
}

fn pw(s: &str) -> SecretString {
    SecretString::from(s)
}

/// Write a record the way older releases did: id 2, raw scrypt key, no AAD.
fn write_unbound_record(vault: &CredentialVault, username: &str, password: &str) {
    let kdf = KdfParams {
        log_n: 10,
        ..KdfParams::default()
    };
    let salt: [u8; SALT_SIZE] = random_bytes();
    let iv: [u8; GCM_NONCE_SIZE] = random_bytes();
    let key = derive_key(&pw(password), &salt, &kdf).unwrap();

    let kem = keypair();
    let (encrypted_secret_key, secret_key_tag) =
        seal_detached(key.as_bytes(), &iv, b"", kem.secret.as_bytes()).unwrap();
    let (kem_ciphertext, shared) = encapsulate(&kem.public).unwrap();
    let masked = mask::masked(password.as_bytes(), shared.as_bytes());
    let (encrypted_password, password_tag) =
        seal_detached(key.as_bytes(), &iv, b"", &masked).unwrap();

    let record = SealedRecord {
        salt,
        iv,
        kem_ciphertext,
        kem_public_key: kem.public,
        encrypted_secret_key,
        encrypted_password,
        password_tag,
        secret_key_tag,
    };
    let mut bytes = record.encode();
    bytes[..4].copy_from_slice(&UNBOUND_VERSION.to_le_bytes());
    std::fs::write(vault.users_dir().join(format!("{username}.enc")), bytes).unwrap();
}

fn archive_with(store: &ArchiveStore, user: &str, name: &str, password: &str, data: &[u8]) {
    let mut archive = store.create_new(user, name, &pw(password)).unwrap();
    archive.add_bytes("file.bin", data.to_vec(), "").unwrap();
}

fn read_back(store: &ArchiveStore, user: &str, name: &str, password: &str) -> Vec<u8> {
    let mut archive = store.open(user, name).unwrap();
    archive.load(&pw(password)).unwrap();
    archive.extract_to_memory("file.bin").unwrap()
}

#[test]
fn rotation_rekeys_record_and_archives() {
    let f = fixture();
    f.vault.create_user("alice", &pw("old")).unwrap();
    archive_with(&f.store, "alice", "img", "old", b"0123456789");
    archive_with(&f.store, "alice", "docs", "old", b"tax return");
    archive_with(&f.store, "bob", "img", "bobs", b"not alice's");

    let report = f
        .vault
        .change_master_password(&f.store, "alice", &pw("old"), &pw("new"))
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.rotated, vec!["docs".to_string(), "img".to_string()]);
    assert!(report.already_current.is_empty());

    assert!(f.vault.verify_password("alice", &pw("new")).unwrap());
    assert!(!f.vault.verify_password("alice", &pw("old")).unwrap());

    assert_eq!(read_back(&f.store, "alice", "img", "new"), b"0123456789");
    assert_eq!(read_back(&f.store, "alice", "docs", "new"), b"tax return");

    let mut stale = f.store.open("alice", "img").unwrap();
    assert!(stale.load(&pw("old")).unwrap_err().is_authentication());

    // other users are untouched
    assert_eq!(read_back(&f.store, "bob", "img", "bobs"), b"not alice's");
}

#[test]
fn wrong_old_password_has_no_side_effects() {
    let f = fixture();
    f.vault.create_user("alice", &pw("old")).unwrap();
    archive_with(&f.store, "alice", "img", "old", b"data");
    let record_before = std::fs::read(f.vault.users_dir().join("alice.enc")).unwrap();
    let archive_path = f.store.open("alice", "img").unwrap().path().to_path_buf();
    let archive_before = std::fs::read(&archive_path).unwrap();

    let err = f
        .vault
        .change_master_password(&f.store, "alice", &pw("guess"), &pw("new"))
        .unwrap_err();
    assert!(matches!(err, PqvError::AuthenticationFailed));

    assert_eq!(
        std::fs::read(f.vault.users_dir().join("alice.enc")).unwrap(),
        record_before
    );
    assert_eq!(std::fs::read(&archive_path).unwrap(), archive_before);
    assert!(f.vault.verify_password("alice", &pw("old")).unwrap());
}

#[test]
fn unknown_user_cannot_rotate() {
    let f = fixture();
    let err = f
        .vault
        .change_master_password(&f.store, "nobody", &pw("a"), &pw("b"))
        .unwrap_err();
    assert!(matches!(err, PqvError::UserNotFound(_)));
}

#[test]
fn interrupted_sweep_is_resumable() {
    let f = fixture();
    f.vault.create_user("alice", &pw("old")).unwrap();
    archive_with(&f.store, "alice", "a", "old", b"first");
    archive_with(&f.store, "alice", "b", "old", b"second");

    // make "b" unreadable for the first sweep
    let b_path = f.store.open("alice", "b").unwrap().path().to_path_buf();
    let b_bytes = std::fs::read(&b_path).unwrap();
    std::fs::write(&b_path, &b_bytes[..b_bytes.len() - 4]).unwrap();

    let report = f
        .vault
        .change_master_password(&f.store, "alice", &pw("old"), &pw("new"))
        .unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.rotated, vec!["a".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "b");
    assert!(f.vault.verify_password("alice", &pw("new")).unwrap());

    std::fs::write(&b_path, &b_bytes).unwrap();

    let resumed = f
        .vault
        .resume_rotation(&f.store, "alice", &pw("old"), &pw("new"))
        .unwrap();
    assert!(resumed.is_complete());
    assert_eq!(resumed.already_current, vec!["a".to_string()]);
    assert_eq!(resumed.rotated, vec!["b".to_string()]);

    assert_eq!(read_back(&f.store, "alice", "a", "new"), b"first");
    assert_eq!(read_back(&f.store, "alice", "b", "new"), b"second");

    // a second resume is a no-op
    let again = f
        .vault
        .resume_rotation(&f.store, "alice", &pw("old"), &pw("new"))
        .unwrap();
    assert_eq!(again.already_current.len(), 2);
    assert!(again.rotated.is_empty());
}

#[test]
fn resume_requires_new_password() {
    let f = fixture();
    f.vault.create_user("alice", &pw("old")).unwrap();

    let err = f
        .vault
        .resume_rotation(&f.store, "alice", &pw("old"), &pw("new"))
        .unwrap_err();
    assert!(err.is_authentication());
}

#[test]
fn foreign_password_archive_is_reported() {
    let f = fixture();
    f.vault.create_user("alice", &pw("old")).unwrap();
    archive_with(&f.store, "alice", "mine", "old", b"ok");
    archive_with(&f.store, "alice", "odd", "something else", b"??");

    let report = f
        .vault
        .change_master_password(&f.store, "alice", &pw("old"), &pw("new"))
        .unwrap();
    assert_eq!(report.rotated, vec!["mine".to_string()]);
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].1.contains("neither"));

    // the odd archive still opens with its own password
    assert_eq!(read_back(&f.store, "alice", "odd", "something else"), b"??");
}

#[test]
fn user_without_archives_rotates_record_only() {
    let f = fixture();
    f.vault.create_user("alice", &pw("old")).unwrap();

    let report = f
        .vault
        .change_master_password(&f.store, "alice", &pw("old"), &pw("new"))
        .unwrap();
    assert_eq!(report.total(), 0);
    assert!(f.vault.verify_password("alice", &pw("new")).unwrap());
}

#[test]
fn older_release_user_rotates_into_current_format() {
    let f = fixture();
    write_unbound_record(&f.vault, "john_doe", "old");
    f.vault.create_user("john", &pw("johns")).unwrap();
    archive_with(&f.store, "john_doe", "tax", "old", b"1040");
    archive_with(&f.store, "john", "photos", "johns", b"jpeg");

    assert!(f.vault.verify_password("john_doe", &pw("old")).unwrap());
    assert!(!f.vault.read_record("john_doe").unwrap().is_current());

    let report = f
        .vault
        .change_master_password(&f.store, "john_doe", &pw("old"), &pw("new"))
        .unwrap();
    assert!(report.is_complete());
    assert_eq!(report.rotated, vec!["tax".to_string()]);
    assert!(f.vault.read_record("john_doe").unwrap().is_current());
    assert!(f.vault.verify_password("john_doe", &pw("new")).unwrap());
    assert_eq!(read_back(&f.store, "john_doe", "tax", "new"), b"1040");

    // john's sweep leaves john_doe's archive alone
    let report = f
        .vault
        .change_master_password(&f.store, "john", &pw("johns"), &pw("johns2"))
        .unwrap();
    assert!(report.is_complete());
    assert_eq!(report.rotated, vec!["photos".to_string()]);
    assert_eq!(read_back(&f.store, "john_doe", "tax", "new"), b"1040");
}
