use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable holding the 32-byte master key as 64 hex characters.
///
/// The key is read once at process start and never written to disk or
/// included in the TOML config file.
pub const MASTER_KEY_ENV: &str = "VEILFS_MASTER_KEY";

/// Top-level configuration (loaded from veilfs.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VeilConfig {
    pub storage: StorageSection,
    pub log: LogSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Directory under which the encrypted `filestorage/` tree lives
    /// (default: process working directory)
    pub base_dir: PathBuf,
    /// Plaintext chunk size in bytes for whole-file uploads
    /// (0 = codec default of 1 MiB)
    pub chunk_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            chunk_size: 0,
        }
    }
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}
