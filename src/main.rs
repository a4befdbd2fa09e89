use anyhow::Result;
use photo_store::{
    config::AppConfig,
    repositories::{FsBlobRepository, SqlitePhotoRepository},
    routes::routes::routes,
    services::photo_service::PhotoService,
    state::AppState,
};
use std::{io::ErrorKind, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting photo-store with config: {:?}", cfg);

    // --- Metadata store ---
    let metadata = SqlitePhotoRepository::connect(&cfg.database_url, &cfg.database_name).await?;
    metadata.migrate().await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Blob store ---
    let blobs = Arc::new(
        FsBlobRepository::new(
            &cfg.storage_dir,
            &cfg.bucket,
            &cfg.public_base_url,
            cfg.url_signing_secret.as_bytes(),
        )
        .await?,
    );
    tracing::info!("Blob bucket at {}", blobs.root().display());

    let spool_dir = PathBuf::from(&cfg.storage_dir).join(".spool");
    tokio::fs::create_dir_all(&spool_dir).await?;

    // --- Initialize core service ---
    let photos = PhotoService::new(Arc::new(metadata), blobs.clone());
    let state = AppState {
        photos,
        blobs,
        max_upload_size: cfg.max_upload_size,
        spool_dir,
    };

    // --- Build router ---
    let app = routes(state);

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
