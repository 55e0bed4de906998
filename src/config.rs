use crate::{models::storage_mode::StorageMode, services::quota_ledger::Capacities};
use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub capacities: Capacities,
    pub default_mode: StorageMode,
    /// Remote upload endpoint; remote uploads fail per file when unset.
    pub remote_upload_url: Option<String>,
    pub remote_upload_preset: String,
    /// Largest accepted upload request body.
    pub max_upload_bytes: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Dual-destination personal drive")]
pub struct Args {
    /// Host to bind to (overrides DRIVE_HOST); loopback unless set
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DRIVE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides DRIVE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Local store capacity in bytes (overrides DRIVE_LOCAL_CAPACITY)
    #[arg(long)]
    pub local_capacity: Option<u64>,

    /// Remote store capacity in bytes (overrides DRIVE_REMOTE_CAPACITY)
    #[arg(long)]
    pub remote_capacity: Option<u64>,

    /// Storage mode for new sessions: dual, local or cloud (overrides DRIVE_DEFAULT_MODE)
    #[arg(long)]
    pub default_mode: Option<String>,

    /// Remote upload endpoint URL (overrides DRIVE_REMOTE_UPLOAD_URL)
    #[arg(long)]
    pub remote_upload_url: Option<String>,

    /// Remote upload preset (overrides DRIVE_REMOTE_UPLOAD_PRESET)
    #[arg(long)]
    pub remote_upload_preset: Option<String>,

    /// Maximum upload request size in bytes (overrides DRIVE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::merge(args, |key| env::var(key).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values looked up with `env`, over defaults.
    pub fn merge(args: Args, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Capacities::default();

        let port = pick(args.port, "DRIVE_PORT", &env)?.unwrap_or(3000);
        let local = pick(args.local_capacity, "DRIVE_LOCAL_CAPACITY", &env)?
            .unwrap_or(defaults.local);
        let remote = pick(args.remote_capacity, "DRIVE_REMOTE_CAPACITY", &env)?
            .unwrap_or(defaults.remote);
        let max_upload_bytes = pick(args.max_upload_bytes, "DRIVE_MAX_UPLOAD_BYTES", &env)?
            .unwrap_or(512 * 1024 * 1024);

        let default_mode = match args.default_mode.or_else(|| env("DRIVE_DEFAULT_MODE")) {
            Some(value) => value
                .parse::<StorageMode>()
                .map_err(|err| anyhow!(err))
                .context("parsing default storage mode")?,
            None => StorageMode::default(),
        };

        // --- Merge ---
        Ok(Self {
            host: args
                .host
                .or_else(|| env("DRIVE_HOST"))
                .unwrap_or_else(|| "127.0.0.1".into()),
            port,
            database_url: args
                .database_url
                .or_else(|| env("DRIVE_DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/drive.db".into()),
            capacities: Capacities { local, remote },
            default_mode,
            remote_upload_url: args
                .remote_upload_url
                .or_else(|| env("DRIVE_REMOTE_UPLOAD_URL"))
                .filter(|url| !url.trim().is_empty()),
            remote_upload_preset: args
                .remote_upload_preset
                .or_else(|| env("DRIVE_REMOTE_UPLOAD_PRESET"))
                .unwrap_or_else(|| "ml_default".into()),
            max_upload_bytes,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// CLI value if given, otherwise the parsed environment value.
fn pick<T>(cli: Option<T>, key: &str, env: &impl Fn(&str) -> Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if cli.is_some() {
        return Ok(cli);
    }
    match env(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(None),
    }
}
