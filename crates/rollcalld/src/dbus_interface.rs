use crate::engine::{EngineError, EngineHandle};
use crate::roster::RosterError;
use rollcall_core::{CsvAttendanceLog, GalleryStore, Mode, VerifyError};
use serde::Serialize;
use std::sync::Arc;
use zbus::{fdo, interface};

pub const BUS_NAME: &str = "org.rollcall.Rollcall1";
pub const OBJECT_PATH: &str = "/org/rollcall/Rollcall1";

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Rollcall1
/// Object path: /org/rollcall/Rollcall1
///
/// Every reply is a JSON document.
pub struct RollcallService {
    engine: EngineHandle,
    store: Arc<GalleryStore>,
    attendance: Arc<CsvAttendanceLog>,
    mode: Mode,
}

impl RollcallService {
    pub fn new(
        engine: EngineHandle,
        store: Arc<GalleryStore>,
        attendance: Arc<CsvAttendanceLog>,
        mode: Mode,
    ) -> Self {
        Self {
            engine,
            store,
            attendance,
            mode,
        }
    }
}

#[interface(name = "org.rollcall.Rollcall1")]
impl RollcallService {
    /// Identify the face in `image` and record attendance on a match.
    async fn verify(&self, image: Vec<u8>) -> fdo::Result<String> {
        tracing::info!(bytes = image.len(), "verify requested");
        let verification = self.engine.verify(image).await.map_err(to_fdo)?;
        to_json(&verification)
    }

    /// Register (or replace) a student's reference photo. An empty `image`
    /// stores a placeholder.
    async fn add_student(&self, name: &str, image: Vec<u8>) -> fdo::Result<String> {
        tracing::info!(name, bytes = image.len(), "add_student requested");
        let update = self
            .engine
            .register(name.to_string(), image)
            .await
            .map_err(to_fdo)?;
        to_json(&update)
    }

    async fn remove_student(&self, name: &str) -> fdo::Result<String> {
        tracing::info!(name, "remove_student requested");
        let update = self.engine.remove(name.to_string()).await.map_err(to_fdo)?;
        to_json(&update)
    }

    /// Rescan the images directory, e.g. after photos were copied in by hand.
    async fn rescan(&self) -> fdo::Result<String> {
        tracing::info!("rescan requested");
        let update = self.engine.rebuild().await.map_err(to_fdo)?;
        to_json(&update)
    }

    /// Identities in the currently published gallery.
    async fn list_students(&self) -> fdo::Result<String> {
        to_json(&self.store.snapshot().identities())
    }

    /// Every attendance record, oldest first.
    async fn attendance(&self) -> fdo::Result<String> {
        attendance_json(Arc::clone(&self.attendance)).await
    }

    async fn status(&self) -> fdo::Result<String> {
        let gallery = self.store.snapshot();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "mode": self.mode,
            "gallery_version": gallery.version(),
            "students": gallery.len(),
            "attendance_path": self.attendance.path().display().to_string(),
        })
        .to_string())
    }
}

/// Reads the log on the blocking pool so a large file never stalls the bus.
async fn attendance_json(log: Arc<CsvAttendanceLog>) -> fdo::Result<String> {
    let records = tokio::task::spawn_blocking(move || log.read_records())
        .await
        .map_err(|e| fdo::Error::Failed(e.to_string()))?
        .map_err(|e| fdo::Error::Failed(e.to_string()))?;
    to_json(&records)
}

fn to_json<T: Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(e.to_string()))
}

/// Caller mistakes become `InvalidArgs`; everything else is `Failed`.
fn to_fdo(err: EngineError) -> fdo::Error {
    match &err {
        EngineError::Verify(VerifyError::Decode(_))
        | EngineError::Roster(RosterError::InvalidName(_)) => {
            fdo::Error::InvalidArgs(err.to_string())
        }
        _ => {
            tracing::warn!(error = %err, "request failed");
            fdo::Error::Failed(err.to_string())
        }
    }
}
