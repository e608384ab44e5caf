//! Logical path → on-disk slug path resolution
//!
//! A logical path like `docs/2024/taxes/april.pdf` is walked one segment
//! at a time from the storage root, looking each segment up in that
//! directory's manifest. Slugs never appear in the logical namespace and
//! are never derived from plaintext names. Create walks mint missing
//! directories on the way down; read walks fail on the first missing
//! segment.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use veilfs_core::{StoreError, StoreResult};
use veilfs_crypto::{new_slug, MasterKey};

use crate::manifest::{self, DirManifest, EntryKind, ManifestEntry};

/// Root of the encrypted store under the base directory.
pub const STORE_DIR: &str = "filestorage";

/// Extension of encrypted file objects on disk.
pub const FILE_SUFFIX: &str = ".bin";

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Normalise a logical path into its segments. Empty and `.` segments are
/// dropped; `..` never resolves inside the store.
pub(crate) fn split_path(logical: &str) -> StoreResult<Vec<&str>> {
    let mut parts = Vec::new();
    for segment in logical.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(StoreError::BadRequest(
                    "path may not contain '..'".to_string(),
                ))
            }
            s => parts.push(s),
        }
    }
    Ok(parts)
}

/// Ensure `<base>/filestorage/` exists and carries a manifest. The root
/// manifest may be empty but is always present.
pub fn ensure_root(master: &MasterKey, base: &Path) -> StoreResult<PathBuf> {
    let root = base.join(STORE_DIR);
    fs::create_dir_all(&root)?;
    manifest::with_dir_lock(&root, || {
        if !root.join(manifest::MANIFEST_FILE).exists() {
            manifest::save(master, &root, &DirManifest::empty())?;
        }
        Ok(())
    })?;
    Ok(root)
}

/// Walk directory segments from `root`, descending through manifest
/// lookups. In create mode, missing segments get a fresh slug directory
/// with an empty manifest; in read mode they fail `DirNotFound`.
fn walk_dirs(
    master: &MasterKey,
    root: &Path,
    dirs: &[&str],
    create: bool,
) -> StoreResult<PathBuf> {
    let mut current = root.to_path_buf();
    for segment in dirs {
        let existing = manifest::load(master, &current)?
            .find(segment, EntryKind::Dir)
            .map(|e| e.enc.clone());
        if let Some(slug) = existing {
            current = current.join(slug);
            continue;
        }
        if !create {
            return Err(StoreError::DirNotFound((*segment).to_string()));
        }

        // Re-check under the lock: another walker may have created the
        // segment between the lookup above and here.
        let next = manifest::with_dir_lock(&current, || {
            let mut m = manifest::load(master, &current)?;
            if let Some(e) = m.find(segment, EntryKind::Dir) {
                return Ok(current.join(&e.enc));
            }

            let slug = new_slug();
            let child = current.join(&slug);
            fs::create_dir_all(&child)?;
            let now = unix_now();
            m.entries.push(ManifestEntry {
                name: (*segment).to_string(),
                enc: slug,
                kind: EntryKind::Dir,
                size: 0,
                created: now,
                mod_time: now,
            });
            manifest::save(master, &current, &m)?;
            manifest::save(master, &child, &DirManifest::empty())?;
            Ok(child)
        })?;
        current = next;
    }
    Ok(current)
}

fn split_file_path<'a>(logical: &'a str) -> StoreResult<(Vec<&'a str>, &'a str)> {
    let mut parts = split_path(logical)?;
    match parts.pop() {
        Some(name) => Ok((parts, name)),
        None => Err(StoreError::BadRequest("empty logical path".to_string())),
    }
}

/// Resolve a logical file path for writing, creating intermediate
/// directories and the file's manifest entry as needed.
///
/// Re-uploading an existing name reuses its slug; the entry's size and
/// mod_time are left untouched here and callers follow up with
/// [`update_meta`] once the content is on disk.
pub fn resolve_for_create(master: &MasterKey, base: &Path, logical: &str) -> StoreResult<PathBuf> {
    let (dirs, file_name) = split_file_path(logical)?;
    let root = ensure_root(master, base)?;
    let parent = walk_dirs(master, &root, &dirs, true)?;

    manifest::with_dir_lock(&parent, || {
        let mut m = manifest::load(master, &parent)?;
        if let Some(e) = m.find(file_name, EntryKind::File) {
            return Ok(parent.join(format!("{}{FILE_SUFFIX}", e.enc)));
        }

        let slug = new_slug();
        let now = unix_now();
        m.entries.push(ManifestEntry {
            name: file_name.to_string(),
            enc: slug.clone(),
            kind: EntryKind::File,
            size: 0,
            created: now,
            mod_time: now,
        });
        manifest::save(master, &parent, &m)?;
        Ok(parent.join(format!("{slug}{FILE_SUFFIX}")))
    })
}

/// Resolve a logical file path for reading. Fails with `DirNotFound` /
/// `FileNotFound` without touching the tree.
pub fn resolve_for_read(master: &MasterKey, base: &Path, logical: &str) -> StoreResult<PathBuf> {
    let (dirs, file_name) = split_file_path(logical)?;
    let root = ensure_root(master, base)?;
    let parent = walk_dirs(master, &root, &dirs, false)?;

    let m = manifest::load(master, &parent)?;
    match m.find(file_name, EntryKind::File) {
        Some(e) => Ok(parent.join(format!("{}{FILE_SUFFIX}", e.enc))),
        None => Err(StoreError::FileNotFound(logical.to_string())),
    }
}

/// Resolve a logical directory path (for listing). `""` and `"."` resolve
/// to the storage root.
pub fn resolve_dir(master: &MasterKey, base: &Path, logical: &str) -> StoreResult<PathBuf> {
    let dirs = split_path(logical)?;
    let root = ensure_root(master, base)?;
    walk_dirs(master, &root, &dirs, false)
}

/// Update a file entry's size and mod_time in its parent manifest.
pub fn update_meta(
    master: &MasterKey,
    base: &Path,
    logical: &str,
    size: u64,
    mod_time: i64,
) -> StoreResult<()> {
    let (dirs, file_name) = split_file_path(logical)?;
    let root = ensure_root(master, base)?;
    let parent = walk_dirs(master, &root, &dirs, false)?;

    manifest::with_dir_lock(&parent, || {
        let mut m = manifest::load(master, &parent)?;
        let entry = m
            .find_mut(file_name, EntryKind::File)
            .ok_or_else(|| StoreError::FileNotFound(logical.to_string()))?;
        entry.size = size;
        entry.mod_time = mod_time;
        manifest::save(master, &parent, &m)
    })
}
