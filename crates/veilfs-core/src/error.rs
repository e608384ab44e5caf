use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

/// Error surface of the storage core. Every operation reports through this
/// enum; the core never retries I/O on its own.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("file {0:?} not found")]
    FileNotFound(String),

    #[error("directory {0:?} not found")]
    DirNotFound(String),

    #[error("{0:?} already exists")]
    AlreadyExists(String),

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),

    /// AEAD tag mismatch on one record. The stream is unusable from this
    /// record onward: either the data was tampered with or the master key
    /// is wrong.
    #[error("authentication failed on record {index}")]
    AuthFailed { index: u32 },

    #[error("corrupt frame: {0}")]
    CorruptFrame(&'static str),

    #[error("record index overflow: more than 2^32 records")]
    ChunkLimitExceeded,

    #[error("manifest decode error: {0}")]
    ManifestDecode(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("cipher failure: {0}")]
    Crypto(&'static str),
}
