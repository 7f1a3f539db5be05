use clap::{Parser, Subcommand, ValueEnum};
use snip_core::ShortCode;
use snip_shortener::settings::DEFAULT_MAX_BATCH_SIZE;
use snip_shortener::BatchItem;
use snip_telemetry::LogFormat;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

pub const STORAGE_BACKEND_ENV: &str = "SNIP_STORAGE";
pub const STORAGE_FILE_ENV: &str = "SNIP_STORAGE_FILE";
pub const POSTGRES_DSN_ENV: &str = "SNIP_POSTGRES_DSN";
pub const POSTGRES_MAX_CONNECTIONS_ENV: &str = "SNIP_POSTGRES_MAX_CONNECTIONS";
pub const BASE_URL_ENV: &str = "SNIP_BASE_URL";
pub const MAX_BATCH_SIZE_ENV: &str = "SNIP_MAX_BATCH_SIZE";
pub const LOG_FORMAT_ENV: &str = "SNIP_LOG_FORMAT";
pub const LOG_LEVEL_ENV: &str = "SNIP_LOG_LEVEL";

pub const DEFAULT_STORAGE_FILE: &str = "./storage.jsonl";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendArg {
    #[value(name = "in-memory")]
    InMemory,
    #[value(name = "postgres")]
    Postgres,
}

impl Display for StorageBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendArg::InMemory => write!(f, "in-memory"),
            StorageBackendArg::Postgres => write!(f, "postgres"),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "snip", about = "Shorten, resolve and delete URLs")]
pub struct CLI {
    #[arg(
        long,
        env = STORAGE_BACKEND_ENV,
        value_enum,
        default_value_t = StorageBackendArg::InMemory
    )]
    pub storage: StorageBackendArg,

    /// Journal replayed by the in-memory backend.
    #[arg(long, env = STORAGE_FILE_ENV, default_value = DEFAULT_STORAGE_FILE)]
    pub storage_file: PathBuf,

    #[arg(long, env = POSTGRES_DSN_ENV, required_if_eq("storage", "postgres"))]
    pub postgres_dsn: Option<String>,

    #[arg(long, env = POSTGRES_MAX_CONNECTIONS_ENV, default_value_t = 10)]
    pub postgres_max_connections: u32,

    /// Prefix of the printed short URLs.
    #[arg(long, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    #[arg(long, env = MAX_BATCH_SIZE_ENV, default_value_t = DEFAULT_MAX_BATCH_SIZE)]
    pub max_batch_size: usize,

    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Default filter directive, overridden by `RUST_LOG`.
    #[arg(long, env = LOG_LEVEL_ENV, default_value = DEFAULT_LOG_LEVEL)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Shorten one URL.
    Shorten {
        url: String,
        #[arg(long, default_value = "")]
        owner: String,
    },
    /// Shorten several URLs given as ID=URL pairs.
    ShortenBatch {
        #[arg(long, default_value = "")]
        owner: String,
        #[arg(required = true, value_parser = parse_batch_item)]
        items: Vec<BatchItem>,
    },
    /// Show the record behind a short code.
    Resolve { code: ShortCode },
    /// List every URL of an owner.
    List {
        #[arg(long)]
        owner: String,
    },
    /// Soft-delete short codes owned by `--owner`.
    Delete {
        #[arg(long)]
        owner: String,
        #[arg(required = true)]
        codes: Vec<ShortCode>,
    },
    /// Check that the storage backend answers.
    Health,
}

fn parse_batch_item(raw: &str) -> Result<BatchItem, String> {
    let (correlation_id, original_url) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected ID=URL, got '{raw}'"))?;
    if correlation_id.is_empty() {
        return Err(format!("missing correlation id in '{raw}'"));
    }
    Ok(BatchItem {
        correlation_id: correlation_id.to_string(),
        original_url: original_url.to_string(),
    })
}
