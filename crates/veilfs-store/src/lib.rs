//! veilfs-store: the encrypted storage engine
//!
//! Logical pathnames are mapped to random on-disk slugs through a tree of
//! per-directory encrypted manifests, so nothing at rest reveals plaintext
//! names, the directory shape, or file sizes beyond chunk granularity.
//! File contents go through the veilfs-crypto stream codec; large uploads
//! arrive as independent chunk requests and are assembled atomically once
//! complete.

pub mod ingest;
pub mod manifest;
pub mod resolve;
pub mod store;

pub use ingest::{ChunkMeta, IngestOutcome};
pub use manifest::{DirManifest, EntryKind, ManifestEntry};
pub use store::{Entry, Store};
