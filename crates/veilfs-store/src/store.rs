//! Public store operations
//!
//! `Store` owns the `filestorage/` subtree (and its `_uploads/` staging
//! area) exclusively: the master key is fixed at open and every operation
//! resolves logical paths through the manifest tree.

use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, warn};

use veilfs_core::StoreResult;
use veilfs_crypto::{stream, MasterKey};

use crate::ingest::{self, ChunkMeta, IngestOutcome, STAGING_DIR};
use crate::manifest::{self, EntryKind};
use crate::resolve::{self, unix_now, STORE_DIR};

/// One row of a directory listing: a manifest entry with the on-disk slug
/// stripped.
#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub size: u64,
    pub created: i64,
    pub mod_time: i64,
}

pub struct Store {
    master: MasterKey,
    base_dir: PathBuf,
    chunk_size: u32,
}

impl Store {
    /// Open a store over `base_dir` with the codec's default chunk size,
    /// ensuring the storage root and its manifest exist.
    pub fn open(master: MasterKey, base_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::open_with_chunk_size(master, base_dir, 0)
    }

    /// Open with an explicit whole-file chunk size (0 = 1 MiB default).
    pub fn open_with_chunk_size(
        master: MasterKey,
        base_dir: impl Into<PathBuf>,
        chunk_size: u32,
    ) -> StoreResult<Self> {
        let base_dir = base_dir.into();
        resolve::ensure_root(&master, &base_dir)?;
        Ok(Self {
            master,
            base_dir,
            chunk_size,
        })
    }

    /// Encrypt `reader` to the resolved destination. Returns the plaintext
    /// byte count.
    ///
    /// The ciphertext is written to a sibling temp file and renamed over
    /// the destination, so a failed upload never leaves a half-written
    /// object behind.
    pub fn put_whole(&self, logical_path: &str, reader: &mut impl Read) -> StoreResult<u64> {
        let dst = resolve::resolve_for_create(&self.master, &self.base_dir, logical_path)?;

        let tmp = dst.with_extension("bin.tmp");
        let mut out = fs::File::create(&tmp)?;
        let written = stream::encrypt(&self.master, reader, &mut out, self.chunk_size)
            .and_then(|written| {
                out.sync_all()?;
                Ok(written)
            });
        drop(out);
        let written = match written {
            Ok(w) => w,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };
        fs::rename(&tmp, &dst)?;

        resolve::update_meta(&self.master, &self.base_dir, logical_path, written, unix_now())?;
        debug!(path = logical_path, bytes = written, "file stored");
        Ok(written)
    }

    /// Stage one chunk of a stateless upload; assembles the file when the
    /// set completes.
    pub fn put_chunk(&self, meta: &ChunkMeta, body: &[u8]) -> StoreResult<IngestOutcome> {
        ingest::ingest_chunk(&self.master, &self.base_dir, meta, body)
    }

    /// Decrypt a stored file into `writer`. Returns the plaintext byte
    /// count.
    pub fn get(&self, logical_path: &str, writer: &mut impl Write) -> StoreResult<u64> {
        let src = resolve::resolve_for_read(&self.master, &self.base_dir, logical_path)?;
        let mut file = fs::File::open(&src)?;
        stream::decrypt(&self.master, &mut file, writer)
    }

    /// List a logical directory. `""` and `"."` list the root.
    pub fn list(&self, logical_path: &str) -> StoreResult<Vec<Entry>> {
        let dir = resolve::resolve_dir(&self.master, &self.base_dir, logical_path)?;
        let m = manifest::load(&self.master, &dir)?;
        Ok(m.entries
            .into_iter()
            .map(|e| Entry {
                name: e.name,
                kind: e.kind,
                size: e.size,
                created: e.created,
                mod_time: e.mod_time,
            })
            .collect())
    }

    /// Update a file entry's size and mod_time.
    pub fn update_meta(&self, logical_path: &str, size: u64, mod_time: i64) -> StoreResult<()> {
        resolve::update_meta(&self.master, &self.base_dir, logical_path, size, mod_time)
    }

    /// Drop all staged uploads. Intended for startup or maintenance, when
    /// no uploads are in flight; any client mid-upload has to resend its
    /// chunks. Returns how many staging trees were removed.
    pub fn sweep_staging(&self) -> StoreResult<usize> {
        let staging_root = self.base_dir.join(STORE_DIR).join(STAGING_DIR);
        let entries = match fs::read_dir(&staging_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            match fs::remove_dir_all(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to sweep staging"),
            }
        }
        if removed > 0 {
            warn!(removed, "dropped stale staged uploads");
        }
        Ok(removed)
    }

    pub fn base_dir(&self) -> &std::path::Path {
        &self.base_dir
    }
}
