use anyhow::Result;
use axum::Router;
use sqlx::sqlite::SqlitePoolOptions;
use std::{io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;

use services::{
    auth::TokenVerifier,
    ingest_service::{IngestService, IngestSettings, MediaTools, UploadLimits},
    keys::PublicUrlScheme,
    normalize::FfmpegNormalizer,
    probe::FfprobeProber,
    publish::ObjectStorePublisher,
    staging::ScratchArea,
    video_repository::SqliteVideoRepository,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting video-ingest with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    // Extract the local file path SQLx will use
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    let db_path_obj = Path::new(db_path);

    // Create parent directory if needed
    if let Some(parent) = db_path_obj.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    // SQLx will not create the file itself
    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(db_path)
    {
        Ok(_) => tracing::debug!("Database file {} is ready", db_path),
        Err(e) => tracing::warn!("Failed to open database file {}: {}", db_path, e),
    }

    let db: Arc<sqlx::Pool<sqlx::Sqlite>> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await?,
    );
    let repository = SqliteVideoRepository::new(db);

    // --- Handle migration mode ---
    if migrate {
        let applied = repository.migrate().await?;
        tracing::info!(statements = applied, "Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize collaborators ---
    let publisher = ObjectStorePublisher::s3(
        &cfg.s3_bucket,
        &cfg.s3_region,
        cfg.s3_endpoint.as_deref(),
        cfg.upload_timeout,
    )?;

    let scratch = match &cfg.scratch_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            ScratchArea::new(dir)
        }
        None => ScratchArea::system(),
    };

    let urls = match &cfg.public_host {
        Some(host) => PublicUrlScheme::new(cfg.s3_bucket.clone(), host.clone()),
        None => PublicUrlScheme::aws(cfg.s3_bucket.clone(), &cfg.s3_region),
    };

    let limits = UploadLimits {
        max_video_bytes: cfg.max_upload_bytes,
        max_thumbnail_bytes: cfg.max_thumbnail_bytes,
    };

    let service = IngestService::new(
        Arc::new(repository),
        TokenVerifier::new(cfg.jwt_secret.expose()),
        MediaTools {
            prober: Arc::new(FfprobeProber::new(
                cfg.ffprobe_path.clone(),
                cfg.process_timeout,
            )),
            normalizer: Arc::new(FfmpegNormalizer::new(
                cfg.ffmpeg_path.clone(),
                cfg.process_timeout,
            )),
        },
        Arc::new(publisher),
        IngestSettings {
            urls,
            scratch,
            limits,
        },
    );

    // --- Build router ---
    let app: Router = routes::routes::routes(limits).with_state(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
