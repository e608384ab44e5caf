//! veilfs-crypto: encryption primitives for the veilfs store
//!
//! Every stored object is a framed AES-256-GCM stream:
//!
//! ```text
//! [1 byte: version=0x01][16 bytes: salt][8 bytes: nonce prefix][4 bytes: chunk size BE]
//! [record 0][record 1]...
//! record: [4 bytes: ciphertext length BE][ciphertext + 16-byte tag]
//! nonce  = nonce_prefix || record_index (4 bytes BE)
//! AAD    = header bytes || record_index (4 bytes BE)
//! ```
//!
//! Key hierarchy:
//! ```text
//! Master Key (256-bit, process environment)
//!   ├── File Key: HKDF-SHA256(salt=file salt, info="file-key:v1")
//!   └── Upload params (stateless chunked uploads, deterministic per file id):
//!         salt         = HKDF-SHA256(salt=file_id, info="upload-salt:v1")
//!         nonce prefix = HKDF-SHA256(salt=file_id, info="upload-nonceprefix:v1")
//! ```

pub mod keys;
pub mod stream;

pub use keys::{
    derive_file_key, derive_upload_params, new_slug, random_nonce_prefix, random_salt, FileKey,
    MasterKey, UploadParams,
};
pub use stream::{decrypt, decrypt_bytes, encrypt, encrypt_bytes, encrypt_record, FileHeader};

/// Size of a master or file key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of the per-file salt
pub const SALT_SIZE: usize = 16;

/// Size of the per-file nonce prefix; a 4-byte BE record counter completes
/// the 12-byte AES-GCM nonce
pub const NONCE_PREFIX_SIZE: usize = 8;

/// Size of an AES-GCM nonce
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Wire size of the stream header
pub const HEADER_SIZE: usize = 1 + SALT_SIZE + NONCE_PREFIX_SIZE + 4;

/// Stream format version byte
pub const FORMAT_VERSION: u8 = 1;

/// Plaintext chunk size used when the caller passes 0
pub const DEFAULT_CHUNK_SIZE: u32 = 1 << 20;

/// Size of a slug before hex encoding (32 hex chars on disk)
pub const SLUG_SIZE: usize = 16;
