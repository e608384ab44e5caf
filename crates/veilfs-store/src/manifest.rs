//! Encrypted per-directory manifests
//!
//! Each on-disk directory carries one `.manifest` file: the stream-codec
//! encryption of a JSON document listing the plaintext name, on-disk slug,
//! type, and metadata of every child. The manifest is the only mapping
//! between logical names and slugs; a slug with no manifest entry is
//! unreachable through the logical tree.
//!
//! Manifests are rewritten whole on every mutation: serialize, encrypt to
//! `.manifest.tmp`, atomic rename. Readers see either the previous or the
//! new ciphertext, never a torn write. Read-modify-write cycles for one
//! directory are serialised by an in-process lock table keyed by the
//! directory path.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use veilfs_core::StoreResult;
use veilfs_crypto::stream::{decrypt_bytes, encrypt_bytes};
use veilfs_crypto::MasterKey;

/// Fixed manifest file name inside every storage directory.
pub const MANIFEST_FILE: &str = ".manifest";

/// Chunk size used when encrypting manifest documents.
pub const MANIFEST_CHUNK_SIZE: u32 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// One child of a storage directory. `name` is plaintext only inside the
/// decrypted manifest; `enc` is the 32-hex-char slug used on disk
/// (`<enc>.bin` for files, `<enc>/` for directories).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub enc: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Plaintext size in bytes (files)
    #[serde(default)]
    pub size: u64,
    /// Unix seconds
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub mod_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirManifest {
    pub version: u32,
    #[serde(default)]
    pub entries: Vec<ManifestEntry>,
}

impl DirManifest {
    pub fn empty() -> Self {
        Self {
            version: 1,
            entries: Vec::new(),
        }
    }

    /// First entry matching both name and type. `(name, type)` pairs are
    /// unique within a directory, so first match is the match.
    pub fn find(&self, name: &str, kind: EntryKind) -> Option<&ManifestEntry> {
        self.entries
            .iter()
            .find(|e| e.name == name && e.kind == kind)
    }

    pub fn find_mut(&mut self, name: &str, kind: EntryKind) -> Option<&mut ManifestEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.name == name && e.kind == kind)
    }
}

/// Load and decrypt a directory's manifest. A directory with no manifest
/// file is an empty directory.
pub fn load(master: &MasterKey, dir: &Path) -> StoreResult<DirManifest> {
    let path = dir.join(MANIFEST_FILE);
    let ciphertext = match fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(DirManifest::empty()),
        Err(e) => return Err(e.into()),
    };
    let plaintext = decrypt_bytes(master, &ciphertext)?;
    let manifest: DirManifest = serde_json::from_slice(&plaintext)?;
    Ok(manifest)
}

/// Encrypt and persist a manifest via temp file + atomic rename.
pub fn save(master: &MasterKey, dir: &Path, manifest: &DirManifest) -> StoreResult<()> {
    let plaintext = serde_json::to_vec(manifest)?;
    let ciphertext = encrypt_bytes(master, &plaintext, MANIFEST_CHUNK_SIZE)?;

    let tmp = dir.join(format!("{MANIFEST_FILE}.tmp"));
    fs::write(&tmp, &ciphertext)?;
    fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
    Ok(())
}

static DIR_LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();

fn lock_for(dir: &Path) -> Arc<Mutex<()>> {
    let table = DIR_LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = table.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    map.entry(dir.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

/// Run `f` while holding this directory's manifest lock. Two concurrent
/// read-modify-write cycles for the same directory would otherwise race on
/// the rename and the loser's entries would vanish.
pub fn with_dir_lock<T>(dir: &Path, f: impl FnOnce() -> StoreResult<T>) -> StoreResult<T> {
    let lock = lock_for(dir);
    let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    f()
}
