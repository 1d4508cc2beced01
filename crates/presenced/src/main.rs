use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod extractor;
mod verifier;

use config::Config;
use dbus_interface::PresenceService;
use extractor::DbusExtractor;
use presence_store::Store;
use verifier::Verifier;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("presenced starting");

    let config = Config::from_env();
    tracing::info!(
        office_lat = config.office_latitude,
        office_lon = config.office_longitude,
        check_in_radius_m = config.check_in_radius_m,
        match_threshold = config.match_threshold,
        "geofence configured"
    );

    if let Some(dir) = config.db_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let store = Store::open(&config.db_path).await?;
    tracing::info!(path = %config.db_path.display(), "record store opened");

    let extractor = Arc::new(DbusExtractor::connect().await?);
    tracing::info!("embedding extractor connected");

    let verifier = Arc::new(Verifier::new(&config, store, extractor));
    let service = PresenceService::new(verifier, &config);

    let _conn = zbus::connection::Builder::system()?
        .name("org.freedesktop.Presence1")?
        .serve_at("/org/freedesktop/Presence1", service)?
        .build()
        .await?;

    tracing::info!("presenced ready on org.freedesktop.Presence1");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("presenced shutting down");

    Ok(())
}
