use crate::handlers::upload_validation::DEFAULT_MAX_UPLOAD_SIZE;
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments; built once in `main`
/// and passed to constructors.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Root directory for blob buckets and upload spooling.
    pub storage_dir: String,
    /// Blob-store bucket (a directory under `storage_dir`).
    pub bucket: String,
    /// Metadata-store connection target.
    pub database_url: String,
    /// Metadata database name within `database_url`.
    pub database_name: String,
    pub max_upload_size: u64,
    /// Externally reachable base URL, used when issuing access URLs.
    pub public_base_url: String,
    pub url_signing_secret: String,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("storage_dir", &self.storage_dir)
            .field("bucket", &self.bucket)
            .field("database_url", &self.database_url)
            .field("database_name", &self.database_name)
            .field("max_upload_size", &self.max_upload_size)
            .field("public_base_url", &self.public_base_url)
            .field("url_signing_secret", &"<redacted>")
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Photo upload and retrieval service")]
pub struct Args {
    /// Host to bind to (overrides PHOTO_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PHOTO_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where blobs are stored (overrides PHOTO_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Blob bucket name (overrides PHOTO_STORE_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Metadata database URL (overrides PHOTO_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Metadata database name (overrides PHOTO_STORE_DATABASE_NAME)
    #[arg(long)]
    pub database_name: Option<String>,

    /// Maximum upload size in bytes (overrides PHOTO_STORE_MAX_UPLOAD_SIZE)
    #[arg(long)]
    pub max_upload_size: Option<u64>,

    /// Public base URL for access links (overrides PHOTO_STORE_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("PHOTO_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env("PHOTO_STORE_PORT", 8080)?;
        let env_storage =
            env::var("PHOTO_STORE_STORAGE_DIR").unwrap_or_else(|_| "./data/blobs".into());
        let env_bucket = env::var("PHOTO_STORE_BUCKET").unwrap_or_else(|_| "photos".into());
        let env_db = env::var("PHOTO_STORE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta".into());
        let env_db_name =
            env::var("PHOTO_STORE_DATABASE_NAME").unwrap_or_else(|_| "photocloud".into());
        let env_max_upload = parse_env("PHOTO_STORE_MAX_UPLOAD_SIZE", DEFAULT_MAX_UPLOAD_SIZE)?;
        let env_public_base = env::var("PHOTO_STORE_PUBLIC_BASE_URL").ok();
        let url_signing_secret = match env::var("PHOTO_STORE_URL_SIGNING_SECRET") {
            Ok(secret) if !secret.is_empty() => secret,
            Ok(_) | Err(env::VarError::NotPresent) => {
                if args.migrate {
                    String::new()
                } else {
                    bail!("PHOTO_STORE_URL_SIGNING_SECRET must be set");
                }
            }
            Err(err) => return Err(err).context("reading PHOTO_STORE_URL_SIGNING_SECRET"),
        };

        // --- Merge ---
        let host = args.host.unwrap_or(env_host);
        let port = args.port.unwrap_or(env_port);
        let public_base_url = args
            .public_base_url
            .or(env_public_base)
            .unwrap_or_else(|| format!("http://localhost:{}", port));

        let cfg = Self {
            host,
            port,
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            bucket: args.bucket.unwrap_or(env_bucket),
            database_url: args.database_url.unwrap_or(env_db),
            database_name: args.database_name.unwrap_or(env_db_name),
            max_upload_size: args.max_upload_size.unwrap_or(env_max_upload),
            public_base_url,
            url_signing_secret,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse an optional environment variable, falling back to `default`.
fn parse_env<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
