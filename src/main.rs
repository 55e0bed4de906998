use anyhow::Result;
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use services::{
    blob_store::{HttpBlobConfig, HttpBlobStore},
    drive_service::DriveService,
    identity::{IdentityProvider, SqliteIdentityProvider},
    record_store::{SqliteRecordStore, apply_schema},
};
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting dual-drive with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    // Create parent directory if needed
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?,
    );

    // --- Schema ---
    let applied = apply_schema(&db).await?;
    tracing::debug!("Applied {} schema statements", applied);

    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core services ---
    let blobs = HttpBlobStore::new(HttpBlobConfig {
        upload_url: cfg.remote_upload_url.clone(),
        upload_preset: cfg.remote_upload_preset.clone(),
    });
    let remote_configured = blobs.is_configured();
    if !remote_configured {
        tracing::warn!("No remote upload URL configured; cloud saves will fail per file");
    }

    let drive = DriveService::new(
        Arc::new(SqliteRecordStore::new(db.clone())),
        Arc::new(blobs),
        cfg.capacities,
        cfg.default_mode,
    );

    let identity = Arc::new(SqliteIdentityProvider::new(db.clone()));
    drive.watch_identity(identity.subscribe());

    let state = AppState {
        db,
        identity,
        drive,
        remote_configured,
    };

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_upload_bytes).with_state(state);

    // --- Start server ---
    if !matches!(cfg.host.as_str(), "127.0.0.1" | "localhost" | "::1") {
        tracing::warn!(
            "Listening on {}: any client reaching this port acts as the signed-in user",
            cfg.host
        );
    }
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
