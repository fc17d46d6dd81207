use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

pub const DEFAULT_DB_PATH: &str = "./alumni_connect.sqlite3";
pub const DEFAULT_BIND: &str = "127.0.0.1:4020";
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Parser)]
#[command(name = "alumni-connect-service")]
#[command(about = "HTTP service for the Alumni Connect directory")]
pub struct Args {
    /// YAML file with service settings; flags given here take precedence.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub db: Option<PathBuf>,
    #[arg(long)]
    pub bind: Option<SocketAddr>,
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,
    /// Fallback tracing filter when `RUST_LOG` is unset.
    #[arg(long)]
    pub log_filter: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    db: Option<PathBuf>,
    bind: Option<SocketAddr>,
    max_upload_bytes: Option<usize>,
    log_filter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub db: PathBuf,
    pub bind: SocketAddr,
    pub max_upload_bytes: usize,
    pub log_filter: String,
}

impl ServiceConfig {
    /// Resolve settings from flags, the optional config file, then defaults.
    ///
    /// # Errors
    /// Returns an error when the config file cannot be read or parsed.
    pub fn load(args: Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => read_file_config(path)?,
            None => FileConfig::default(),
        };
        Self::merge(args, file)
    }

    fn merge(args: Args, file: FileConfig) -> Result<Self> {
        let bind = match args.bind.or(file.bind) {
            Some(bind) => bind,
            None => DEFAULT_BIND.parse().context("invalid default bind address")?,
        };
        Ok(Self {
            db: args.db.or(file.db).unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            bind,
            max_upload_bytes: args
                .max_upload_bytes
                .or(file.max_upload_bytes)
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            log_filter: args
                .log_filter
                .or(file.log_filter)
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
        })
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}
