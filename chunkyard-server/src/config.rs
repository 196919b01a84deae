//! Command-line and environment configuration

use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use chunkyard_engine::StagingBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendArg {
    /// One directory per upload
    Fs,
    /// Embedded fjall keyspace
    Keyspace,
    /// Process memory, lost on restart
    Memory,
}

impl From<BackendArg> for StagingBackend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Fs => StagingBackend::Fs,
            BackendArg::Keyspace => StagingBackend::Keyspace,
            BackendArg::Memory => StagingBackend::Memory,
        }
    }
}

#[derive(Debug, Clone, Parser)]
#[command(name = "chunkyard-server", version, about = "Chunked upload receiver and merger")]
pub struct ServerConfig {
    /// Bind address
    #[arg(long, env = "CHUNKYARD_BIND", default_value = "127.0.0.1:3000")]
    pub bind: SocketAddr,

    /// Directory holding merged files
    #[arg(long, env = "CHUNKYARD_ARTIFACT_DIR", default_value = "./ReceivedFiles")]
    pub artifact_dir: PathBuf,

    /// Directory holding chunks of unmerged uploads
    #[arg(long, env = "CHUNKYARD_STAGING_DIR", default_value = "./ReceivedFiles/.staging")]
    pub staging_dir: PathBuf,

    /// Where staged chunks are kept
    #[arg(long, env = "CHUNKYARD_STAGING_BACKEND", value_enum, default_value_t = BackendArg::Fs)]
    pub staging_backend: BackendArg,

    /// Base URL used when reporting artifact locations (defaults to http://<bind>)
    #[arg(long, env = "CHUNKYARD_PUBLIC_URL")]
    pub public_url: Option<String>,

    /// Largest accepted chunk body in bytes
    #[arg(long, env = "CHUNKYARD_MAX_CHUNK_BYTES", default_value_t = 64 * 1024 * 1024)]
    pub max_chunk_bytes: usize,

    /// Emit logs as JSON lines
    #[arg(long, env = "CHUNKYARD_LOG_JSON")]
    pub log_json: bool,
}

impl ServerConfig {
    /// Base URL without a trailing slash
    pub fn public_base(&self) -> String {
        match &self.public_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://{}", self.bind),
        }
    }
}
