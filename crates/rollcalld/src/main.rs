use anyhow::{Context, Result};
use rollcall_core::{AttendanceRecorder, CsvAttendanceLog, GalleryStore, ModelPaths, Strategy};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod roster;

use config::{BusKind, Config};
use dbus_interface::{RollcallService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rollcalld starting");

    let config = Config::load()?;
    tracing::info!(
        images_dir = %config.images_dir.display(),
        attendance = %config.attendance_path.display(),
        model_dir = %config.model_dir.display(),
        mode = ?config.mode,
        bus = ?config.bus,
        "configuration loaded"
    );

    std::fs::create_dir_all(&config.images_dir)
        .with_context(|| format!("creating images directory {}", config.images_dir.display()))?;
    if let Some(parent) = config.attendance_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating attendance directory {}", parent.display()))?;
    }

    let strategy = Strategy::select(
        config.mode,
        &ModelPaths::in_dir(&config.model_dir),
        config.thresholds(),
    )?;
    let mode = strategy.mode();

    let store = Arc::new(GalleryStore::new(mode));
    let attendance = Arc::new(CsvAttendanceLog::new(config.attendance_path.clone()));
    let recorder: Arc<dyn AttendanceRecorder> = attendance.clone();

    let engine = engine::spawn_engine(
        strategy,
        Arc::clone(&store),
        config.images_dir.clone(),
        recorder,
    )?;

    let service = RollcallService::new(engine, store, attendance, mode);
    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _connection = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("registering on D-Bus")?;

    tracing::info!(bus_name = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
