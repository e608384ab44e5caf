//! veilfs: operator CLI for the encrypted file store
//!
//! Usage:
//!   VEILFS_MASTER_KEY=<64 hex chars> veilfs [--config veilfs.toml] <command>
//!
//! The master key comes from the environment only; the TOML config carries
//! the base directory and logging defaults.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use veilfs_core::config::{LogSection, VeilConfig, MASTER_KEY_ENV};
use veilfs_crypto::{new_slug, MasterKey};
use veilfs_store::{ChunkMeta, IngestOutcome, Store};

#[derive(Parser, Debug)]
#[command(name = "veilfs", version, about = "Encrypted file store CLI")]
struct Cli {
    /// Path to veilfs.toml configuration file
    #[arg(long, short = 'c', env = "VEILFS_CONFIG", default_value = "veilfs.toml")]
    config: PathBuf,

    /// Base directory override (default from config)
    #[arg(long)]
    base_dir: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, env = "VEILFS_LOG")]
    log: Option<String>,

    /// Log format override (json, text)
    #[arg(long, env = "VEILFS_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Encrypt a local file into the store
    Put {
        /// Logical destination path, e.g. docs/2024/report.pdf
        logical_path: String,
        /// Local file to upload
        file: PathBuf,
    },
    /// Upload a local file in independent encrypted chunks
    PutChunks {
        logical_path: String,
        file: PathBuf,
        /// Plaintext bytes per chunk
        #[arg(long, default_value_t = 1 << 20)]
        chunk_size: u32,
        /// Stable upload id (random if omitted)
        #[arg(long)]
        file_id: Option<String>,
    },
    /// Decrypt a stored file
    Get {
        logical_path: String,
        /// Local destination (stdout if omitted)
        out: Option<PathBuf>,
    },
    /// List a logical directory as JSON
    Ls {
        #[arg(default_value = ".")]
        logical_path: String,
    },
    /// Set a file entry's size and mod_time
    SetMeta {
        logical_path: String,
        size: u64,
        #[arg(long)]
        mod_time: Option<i64>,
    },
    /// Drop all staged uploads
    Sweep,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, config_found) = load_config(&cli.config)?;

    let mut log = config.log.clone();
    if let Some(level) = &cli.log {
        log.level = level.clone();
    }
    if let Some(format) = &cli.log_format {
        log.format = format.clone();
    }
    init_logging(&log);
    if !config_found {
        warn!("config file not found: {} (using defaults)", cli.config.display());
    }

    let master = master_key_from_env()?;
    let base_dir = cli
        .base_dir
        .clone()
        .unwrap_or_else(|| config.storage.base_dir.clone());
    let store = Store::open_with_chunk_size(master, base_dir, config.storage.chunk_size)?;

    match cli.command {
        Command::Put { logical_path, file } => {
            let mut src = fs::File::open(&file)
                .with_context(|| format!("opening {}", file.display()))?;
            let written = store.put_whole(&logical_path, &mut src)?;
            info!(path = %logical_path, bytes = written, "uploaded");
            println!("{written}");
        }
        Command::PutChunks {
            logical_path,
            file,
            chunk_size,
            file_id,
        } => {
            let data = fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let file_id = file_id.unwrap_or_else(new_slug);
            put_chunks(&store, &logical_path, &file_id, chunk_size, &data)?;
        }
        Command::Get { logical_path, out } => match out {
            Some(path) => {
                let mut dst = fs::File::create(&path)
                    .with_context(|| format!("creating {}", path.display()))?;
                let read = store.get(&logical_path, &mut dst)?;
                info!(path = %logical_path, bytes = read, "downloaded");
            }
            None => {
                let stdout = std::io::stdout();
                let mut lock = stdout.lock();
                store.get(&logical_path, &mut lock)?;
                lock.flush()?;
            }
        },
        Command::Ls { logical_path } => {
            let entries = store.list(&logical_path)?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Command::SetMeta {
            logical_path,
            size,
            mod_time,
        } => {
            let mod_time = mod_time.unwrap_or_else(|| {
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_secs() as i64)
                    .unwrap_or(0)
            });
            store.update_meta(&logical_path, size, mod_time)?;
        }
        Command::Sweep => {
            let removed = store.sweep_staging()?;
            println!("{removed}");
        }
    }

    Ok(())
}

/// Drive the stateless ingest path chunk by chunk, the way an upload
/// client would across independent requests.
fn put_chunks(
    store: &Store,
    logical_path: &str,
    file_id: &str,
    chunk_size: u32,
    data: &[u8],
) -> Result<()> {
    anyhow::ensure!(chunk_size > 0, "chunk size must be > 0");
    anyhow::ensure!(!data.is_empty(), "refusing to chunk-upload an empty file");

    let chunks: Vec<&[u8]> = data.chunks(chunk_size as usize).collect();
    let total_chunks = u32::try_from(chunks.len()).context("too many chunks")?;

    for (index, body) in chunks.iter().enumerate() {
        let meta = ChunkMeta {
            logical_path: logical_path.to_string(),
            file_id: file_id.to_string(),
            chunk_size,
            index: index as u32,
            total_chunks,
            total_size: data.len() as u64,
        };
        match store.put_chunk(&meta, body)? {
            IngestOutcome::Pending => {}
            IngestOutcome::Assembled { logical_path } => {
                info!(path = %logical_path, chunks = total_chunks, "assembled");
                println!("{logical_path}");
            }
        }
    }
    Ok(())
}

fn master_key_from_env() -> Result<MasterKey> {
    let hex = std::env::var(MASTER_KEY_ENV)
        .with_context(|| format!("{MASTER_KEY_ENV} is not set"))?;
    Ok(MasterKey::from_hex(&hex)?)
}

fn load_config(path: &PathBuf) -> Result<(VeilConfig, bool)> {
    if path.exists() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config =
            toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((VeilConfig::default(), false))
    }
}

/// Wire the subscriber straight from the resolved `[log]` section. An
/// explicit RUST_LOG still wins over the configured level; any format
/// value other than "json" means human-readable text.
fn init_logging(log: &LogSection) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
