//! Key hierarchy: process master key → per-file keys via HKDF-SHA256

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use veilfs_core::{StoreError, StoreResult};

use crate::{KEY_SIZE, NONCE_PREFIX_SIZE, SALT_SIZE, SLUG_SIZE};

/// Both key levels share one discipline: 256-bit material that is wiped
/// on drop and never reaches a log line. `Debug` renders only the key's
/// role, so `tracing` field capture of any surrounding struct stays safe.
macro_rules! key_material {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        pub struct $name([u8; KEY_SIZE]);

        impl $name {
            pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
                &self.0
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                self.0.zeroize();
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(concat!(stringify!($name), "(..)"))
            }
        }
    };
}

key_material!(
    /// The process-wide 256-bit master key: loaded once at startup from
    /// the environment, held immutably, never persisted.
    MasterKey
);

key_material!(
    /// A per-file encryption key, derived from the master key and the
    /// file's salt. Lives only for the duration of one codec run.
    FileKey
);

// The store holds the master key for its lifetime and hands copies to
// worker threads; file keys are single-use and deliberately not Clone.
impl Clone for MasterKey {
    fn clone(&self) -> Self {
        Self(self.0)
    }
}

impl MasterKey {
    /// Parse a master key from 64 hex characters. Anything else is a
    /// configuration error.
    pub fn from_hex(s: &str) -> StoreResult<Self> {
        let raw = hex::decode(s.trim())
            .map_err(|e| StoreError::Config(format!("master key is not valid hex: {e}")))?;
        let bytes: [u8; KEY_SIZE] = raw.try_into().map_err(|v: Vec<u8>| {
            StoreError::Config(format!(
                "master key must be {KEY_SIZE} bytes, got {}",
                v.len()
            ))
        })?;
        Ok(Self::from_bytes(bytes))
    }
}

/// Derive the per-file key from the master key and the file's salt.
pub fn derive_file_key(master: &MasterKey, salt: &[u8; SALT_SIZE]) -> StoreResult<FileKey> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), master.as_bytes());
    let mut okm = [0u8; KEY_SIZE];
    hkdf.expand(b"file-key:v1", &mut okm)
        .map_err(|_| StoreError::Crypto("HKDF expand failed"))?;
    Ok(FileKey::from_bytes(okm))
}

/// Deterministic salt and nonce prefix for a stateless chunked upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadParams {
    pub salt: [u8; SALT_SIZE],
    pub nonce_prefix: [u8; NONCE_PREFIX_SIZE],
}

/// Derive the upload salt and nonce prefix from `(master key, file_id)`.
///
/// The file id plays HKDF's salt role so every chunk of one upload shares
/// the same header bytes regardless of arrival order. Uniqueness rests
/// entirely on the file id: callers MUST bind it to the authenticated user
/// identity before it reaches this layer, or two users picking the same id
/// reuse the same key/nonce sequence.
pub fn derive_upload_params(master: &MasterKey, file_id: &str) -> StoreResult<UploadParams> {
    let hkdf = Hkdf::<Sha256>::new(Some(file_id.as_bytes()), master.as_bytes());

    let mut salt = [0u8; SALT_SIZE];
    hkdf.expand(b"upload-salt:v1", &mut salt)
        .map_err(|_| StoreError::Crypto("HKDF expand failed"))?;

    let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
    hkdf.expand(b"upload-nonceprefix:v1", &mut nonce_prefix)
        .map_err(|_| StoreError::Crypto("HKDF expand failed"))?;

    Ok(UploadParams { salt, nonce_prefix })
}

/// Fresh random per-file salt.
pub fn random_salt() -> [u8; SALT_SIZE] {
    let mut bytes = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Fresh random per-file nonce prefix.
pub fn random_nonce_prefix() -> [u8; NONCE_PREFIX_SIZE] {
    let mut bytes = [0u8; NONCE_PREFIX_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// New random on-disk name: 16 bytes rendered as 32 lowercase hex chars,
/// unlinkable to the plaintext name without the manifest.
pub fn new_slug() -> String {
    let mut bytes = [0u8; SLUG_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
