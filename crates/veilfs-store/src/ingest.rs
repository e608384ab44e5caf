//! Stateless resumable chunk ingest
//!
//! Each chunk of a large upload arrives as an independent request carrying
//! `(logical_path, file_id, chunk_size, index, total_chunks)`. The stream
//! header is derived deterministically from `(master key, file_id,
//! chunk_size)`, so every chunk encrypts to the exact record the stream
//! codec would have produced at that index, in any arrival order, with no
//! server-side session state. Ciphertext records are staged as
//! `_uploads/<file_id>/<index>.part` files; the request that completes the
//! set concatenates header and parts into the final file.
//!
//! The deterministic derivation makes `(file_id, index)` collisions a
//! nonce reuse. Part files are therefore opened exclusive-create and never
//! overwritten, and callers MUST namespace `file_id` by authenticated user
//! identity before it reaches this layer.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use veilfs_core::{StoreError, StoreResult};
use veilfs_crypto::stream::{encrypt_record, FileHeader};
use veilfs_crypto::{derive_upload_params, MasterKey};

use crate::resolve::{self, unix_now};

/// Staging area under the storage root. Scratch space: safe to wipe when
/// no uploads are in flight.
pub const STAGING_DIR: &str = "_uploads";

/// Per-chunk request metadata.
#[derive(Debug, Clone)]
pub struct ChunkMeta {
    /// Plaintext logical destination path; mapped to a slug on assembly.
    pub logical_path: String,
    /// Client-provided stable upload id. MUST be bound to the
    /// authenticated user by the caller.
    pub file_id: String,
    /// Plaintext chunk size every chunk but the last must fill.
    pub chunk_size: u32,
    /// Zero-based chunk index.
    pub index: u32,
    pub total_chunks: u32,
    /// Plaintext size of the whole file; 0 when the client doesn't know
    /// it. Used for the manifest entry on assembly.
    pub total_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Part persisted (or already present); more chunks outstanding.
    Pending,
    /// This request completed the set and the file was assembled.
    Assembled { logical_path: String },
}

/// Filesystem-friendly rendition of a client-supplied file id. Sanitises
/// the staging directory name only; it does not authorise anything.
fn safe_file_id(id: &str) -> String {
    let id = id.trim();
    if id.is_empty() {
        "missing".to_string()
    } else {
        id.replace('/', "_")
    }
}

fn staging_dir(root: &Path, file_id: &str) -> PathBuf {
    root.join(STAGING_DIR).join(safe_file_id(file_id))
}

fn part_path(staging: &Path, index: u32) -> PathBuf {
    staging.join(format!("{index:08}.part"))
}

fn validate(meta: &ChunkMeta, body_len: usize) -> StoreResult<()> {
    if meta.chunk_size == 0 {
        return Err(StoreError::BadRequest("chunk_size must be > 0".into()));
    }
    if body_len == 0 || body_len > meta.chunk_size as usize {
        return Err(StoreError::BadRequest(format!(
            "invalid body length {body_len} (max {})",
            meta.chunk_size
        )));
    }
    if meta.total_chunks == 0 {
        return Err(StoreError::BadRequest("total_chunks must be > 0".into()));
    }
    if meta.index >= meta.total_chunks {
        return Err(StoreError::BadRequest(format!(
            "chunk index {} out of range (total {})",
            meta.index, meta.total_chunks
        )));
    }
    if meta.logical_path.is_empty() || meta.file_id.is_empty() {
        return Err(StoreError::BadRequest(
            "missing logical path or file_id".into(),
        ));
    }
    Ok(())
}

/// Persist one ciphertext record as a part file. Exclusive-create: a part
/// that already exists is a client retry and the write is an idempotent
/// no-op, never an overwrite (same index + different body would reuse the
/// nonce).
fn write_part(staging: &Path, index: u32, record: &[u8]) -> StoreResult<()> {
    fs::create_dir_all(staging)?;
    let path = part_path(staging, index);
    let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            debug!(part = %path.display(), "part already staged, retry ignored");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    file.write_all(record)?;
    file.sync_all()?;
    Ok(())
}

fn have_all_parts(staging: &Path, total: u32) -> bool {
    (0..total).all(|i| part_path(staging, i).exists())
}

/// Concatenate header and staged parts into the final encrypted file.
///
/// The destination is opened exclusive-create so a racing assembler (or a
/// destination left by an earlier upload of the same logical path) fails
/// loudly with `AlreadyExists` instead of tearing the file.
fn assemble(
    master: &MasterKey,
    base: &Path,
    meta: &ChunkMeta,
    staging: &Path,
    header: &FileHeader,
) -> StoreResult<String> {
    let dst = resolve::resolve_for_create(master, base, &meta.logical_path)?;

    let mut out = match OpenOptions::new().write(true).create_new(true).open(&dst) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(StoreError::AlreadyExists(meta.logical_path.clone()))
        }
        Err(e) => return Err(e.into()),
    };
    out.write_all(&header.to_bytes())?;
    for i in 0..meta.total_chunks {
        let record = fs::read(part_path(staging, i))?;
        out.write_all(&record)?;
    }
    out.sync_all()?;
    drop(out);

    if meta.total_size > 0 {
        resolve::update_meta(master, base, &meta.logical_path, meta.total_size, unix_now())?;
    }

    if let Err(e) = fs::remove_dir_all(staging) {
        debug!(staging = %staging.display(), error = %e, "staging cleanup failed");
    }

    info!(
        path = %meta.logical_path,
        chunks = meta.total_chunks,
        bytes = meta.total_size,
        "chunked upload assembled"
    );
    Ok(meta.logical_path.clone())
}

/// Encrypt and stage one chunk; assemble the file when this chunk
/// completes the set.
pub fn ingest_chunk(
    master: &MasterKey,
    base: &Path,
    meta: &ChunkMeta,
    body: &[u8],
) -> StoreResult<IngestOutcome> {
    validate(meta, body.len())?;

    let root = resolve::ensure_root(master, base)?;

    let params = derive_upload_params(master, &meta.file_id)?;
    let header = FileHeader::from_upload_params(params, meta.chunk_size);
    let record = encrypt_record(master, &header, meta.index, body)?;

    let staging = staging_dir(&root, &meta.file_id);
    write_part(&staging, meta.index, &record)?;
    debug!(
        file_id = %meta.file_id,
        index = meta.index,
        total = meta.total_chunks,
        "chunk staged"
    );

    if !have_all_parts(&staging, meta.total_chunks) {
        return Ok(IngestOutcome::Pending);
    }

    let logical_path = assemble(master, base, meta, &staging, &header)?;
    Ok(IngestOutcome::Assembled { logical_path })
}
