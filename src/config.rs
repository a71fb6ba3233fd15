use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::{env, fmt, path::PathBuf, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "VIDEO_INGEST_";

/// A configuration value that must never reach the logs.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: Secret,
    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_endpoint: Option<String>,
    /// Host used in public object URLs instead of `s3.<region>.amazonaws.com`.
    pub public_host: Option<String>,
    pub ffprobe_path: String,
    pub ffmpeg_path: String,
    /// Staging directory; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
    pub max_upload_bytes: u64,
    pub max_thumbnail_bytes: u64,
    pub process_timeout: Option<Duration>,
    pub upload_timeout: Option<Duration>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Video ingestion and normalization API")]
pub struct Args {
    /// Host to bind to (overrides VIDEO_INGEST_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides VIDEO_INGEST_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides VIDEO_INGEST_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Bucket receiving published objects (overrides VIDEO_INGEST_S3_BUCKET)
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// Bucket region (overrides VIDEO_INGEST_S3_REGION)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// Custom S3-compatible endpoint (overrides VIDEO_INGEST_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Host for public object URLs (overrides VIDEO_INGEST_PUBLIC_HOST)
    #[arg(long)]
    pub public_host: Option<String>,

    /// ffprobe binary (overrides VIDEO_INGEST_FFPROBE_PATH)
    #[arg(long)]
    pub ffprobe_path: Option<String>,

    /// ffmpeg binary (overrides VIDEO_INGEST_FFMPEG_PATH)
    #[arg(long)]
    pub ffmpeg_path: Option<String>,

    /// Directory for staged uploads (overrides VIDEO_INGEST_SCRATCH_DIR)
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,

    /// Largest accepted video upload in bytes (overrides VIDEO_INGEST_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<u64>,

    /// Largest accepted thumbnail in bytes (overrides VIDEO_INGEST_MAX_THUMBNAIL_BYTES)
    #[arg(long)]
    pub max_thumbnail_bytes: Option<u64>,

    /// Deadline for each ffprobe/ffmpeg run (overrides VIDEO_INGEST_PROCESS_TIMEOUT_SECS)
    #[arg(long)]
    pub process_timeout_secs: Option<u64>,

    /// Deadline for each bucket upload (overrides VIDEO_INGEST_UPLOAD_TIMEOUT_SECS)
    #[arg(long)]
    pub upload_timeout_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    ///
    /// The JWT secret is read from the environment only.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        Self::resolve(args, |name| env::var(name).ok())
    }

    /// Merge parsed args over values from `lookup`, which receives full
    /// environment variable names.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<(Self, bool)> {
        let env = EnvSource { lookup: &lookup };

        let jwt_secret = env
            .string("JWT_SECRET")
            .filter(|s| !s.is_empty())
            .map(Secret)
            .ok_or_else(|| anyhow!("{ENV_PREFIX}JWT_SECRET must be set"))?;

        let s3_bucket = args
            .s3_bucket
            .or_else(|| env.string("S3_BUCKET"))
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                anyhow!("an S3 bucket is required (--s3-bucket or {ENV_PREFIX}S3_BUCKET)")
            })?;

        // --- Merge ---
        let cfg = Self {
            host: args
                .host
                .or_else(|| env.string("HOST"))
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: args.port.or(env.parsed("PORT")?).unwrap_or(8091),
            database_url: args
                .database_url
                .or_else(|| env.string("DATABASE_URL"))
                .unwrap_or_else(|| "sqlite://./data/videos.db".into()),
            jwt_secret,
            s3_bucket,
            s3_region: args
                .s3_region
                .or_else(|| env.string("S3_REGION"))
                .unwrap_or_else(|| "us-east-1".into()),
            s3_endpoint: args.s3_endpoint.or_else(|| env.string("S3_ENDPOINT")),
            public_host: args.public_host.or_else(|| env.string("PUBLIC_HOST")),
            ffprobe_path: args
                .ffprobe_path
                .or_else(|| env.string("FFPROBE_PATH"))
                .unwrap_or_else(|| "ffprobe".into()),
            ffmpeg_path: args
                .ffmpeg_path
                .or_else(|| env.string("FFMPEG_PATH"))
                .unwrap_or_else(|| "ffmpeg".into()),
            scratch_dir: args
                .scratch_dir
                .or_else(|| env.string("SCRATCH_DIR").map(PathBuf::from)),
            max_upload_bytes: args
                .max_upload_bytes
                .or(env.parsed("MAX_UPLOAD_BYTES")?)
                .unwrap_or(1 << 30),
            max_thumbnail_bytes: args
                .max_thumbnail_bytes
                .or(env.parsed("MAX_THUMBNAIL_BYTES")?)
                .unwrap_or(10 << 20),
            process_timeout: args
                .process_timeout_secs
                .or(env.parsed("PROCESS_TIMEOUT_SECS")?)
                .map(Duration::from_secs),
            upload_timeout: args
                .upload_timeout_secs
                .or(env.parsed("UPLOAD_TIMEOUT_SECS")?)
                .map(Duration::from_secs),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct EnvSource<'a, F> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> EnvSource<'_, F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{name}"))
    }

    fn parsed<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.string(name) {
            Some(value) => value
                .parse::<T>()
                .map(Some)
                .with_context(|| format!("parsing {ENV_PREFIX}{name} value `{value}`")),
            None => Ok(None),
        }
    }
}
