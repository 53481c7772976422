use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::{env, fmt::Display, str::FromStr};

/// Which metadata backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MetadataBackend {
    /// Whole-file JSON snapshot.
    Json,
    /// Embedded SQLite database.
    Sqlite,
}

impl FromStr for MetadataBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        <Self as ValueEnum>::from_str(value, true)
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub content_dir: String,
    pub metadata_backend: MetadataBackend,
    pub metadata_path: String,
    pub database_url: String,
    pub public_base_url: Option<String>,
    pub max_upload_bytes: u64,
    pub rate_limit_max: u32,
    pub rate_limit_window_secs: u64,
    pub trust_proxy: bool,
    pub cors_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            content_dir: "./data/files".into(),
            metadata_backend: MetadataBackend::Json,
            metadata_path: "./data/meta/files.json".into(),
            database_url: "sqlite://./data/meta/filedrop.db".into(),
            public_base_url: None,
            max_upload_bytes: 100 * 1024 * 1024,
            rate_limit_max: 50,
            rate_limit_window_secs: 15 * 60,
            trust_proxy: false,
            cors_origins: Vec::new(),
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Minimal file hosting service")]
pub struct Args {
    /// Host to bind to (overrides FILEDROP_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILEDROP_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploaded files are stored (overrides FILEDROP_CONTENT_DIR)
    #[arg(long)]
    pub content_dir: Option<String>,

    /// Metadata backend (overrides FILEDROP_METADATA_BACKEND)
    #[arg(long, value_enum)]
    pub metadata_backend: Option<MetadataBackend>,

    /// Path of the JSON metadata snapshot (overrides FILEDROP_METADATA_PATH)
    #[arg(long)]
    pub metadata_path: Option<String>,

    /// SQLite URL for the sqlite backend (overrides FILEDROP_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Base of public file URLs, e.g. https://files.example.com (overrides FILEDROP_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Largest accepted upload in bytes (overrides FILEDROP_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<u64>,

    /// Upload attempts allowed per client per window (overrides FILEDROP_RATE_LIMIT_MAX)
    #[arg(long)]
    pub rate_limit_max: Option<u32>,

    /// Rate limit window in seconds (overrides FILEDROP_RATE_LIMIT_WINDOW_SECS)
    #[arg(long)]
    pub rate_limit_window_secs: Option<u64>,

    /// Honour X-Forwarded-* headers (overrides FILEDROP_TRUST_PROXY)
    #[arg(long)]
    pub trust_proxy: bool,

    /// Comma-separated CORS origins; empty allows any (overrides FILEDROP_CORS_ORIGINS)
    #[arg(long)]
    pub cors_origins: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();
        Self::resolve(args, |key| env::var(key).ok())
    }

    /// Merge CLI args over environment lookups over defaults.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let env_string = |key: &str, default: String| lookup(key).unwrap_or(default);

        let cfg = Self {
            host: args
                .host
                .unwrap_or_else(|| env_string("FILEDROP_HOST", defaults.host)),
            port: match args.port {
                Some(port) => port,
                None => env_parse(&lookup, "FILEDROP_PORT", defaults.port)?,
            },
            content_dir: args
                .content_dir
                .unwrap_or_else(|| env_string("FILEDROP_CONTENT_DIR", defaults.content_dir)),
            metadata_backend: match args.metadata_backend {
                Some(backend) => backend,
                None => env_parse(
                    &lookup,
                    "FILEDROP_METADATA_BACKEND",
                    defaults.metadata_backend,
                )?,
            },
            metadata_path: args
                .metadata_path
                .unwrap_or_else(|| env_string("FILEDROP_METADATA_PATH", defaults.metadata_path)),
            database_url: args
                .database_url
                .unwrap_or_else(|| env_string("FILEDROP_DATABASE_URL", defaults.database_url)),
            public_base_url: args
                .public_base_url
                .or_else(|| lookup("FILEDROP_PUBLIC_BASE_URL"))
                .map(|url| url.trim_end_matches('/').to_string())
                .filter(|url| !url.is_empty()),
            max_upload_bytes: match args.max_upload_bytes {
                Some(max) => max,
                None => env_parse(&lookup, "FILEDROP_MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            },
            rate_limit_max: match args.rate_limit_max {
                Some(max) => max,
                None => env_parse(&lookup, "FILEDROP_RATE_LIMIT_MAX", defaults.rate_limit_max)?,
            },
            rate_limit_window_secs: match args.rate_limit_window_secs {
                Some(secs) => secs,
                None => env_parse(
                    &lookup,
                    "FILEDROP_RATE_LIMIT_WINDOW_SECS",
                    defaults.rate_limit_window_secs,
                )?,
            },
            trust_proxy: args.trust_proxy
                || env_parse(&lookup, "FILEDROP_TRUST_PROXY", defaults.trust_proxy)?,
            cors_origins: args
                .cors_origins
                .or_else(|| lookup("FILEDROP_CORS_ORIGINS"))
                .map(|raw| split_list(&raw))
                .unwrap_or(defaults.cors_origins),
        };

        if cfg.rate_limit_max == 0 {
            anyhow::bail!("rate limit must allow at least one upload per window");
        }
        if cfg.rate_limit_window_secs == 0 {
            anyhow::bail!("rate limit window must be at least one second");
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
