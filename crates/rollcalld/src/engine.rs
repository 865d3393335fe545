use crate::roster::{self, RosterError};
use rollcall_core::{
    AttendanceRecorder, GalleryError, GalleryStore, SkippedImage, Strategy, Verification,
    VerifyError,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("gallery rebuild failed: {0}")]
    Gallery(#[from] GalleryError),
    #[error("roster update failed: {0}")]
    Roster(#[from] RosterError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Outcome of a rebuild triggered by a roster change.
#[derive(Debug, Clone, Serialize)]
pub struct RosterUpdate {
    /// Only set by removals: whether any file matched the name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<bool>,
    pub students: Vec<String>,
    pub skipped: Vec<SkippedImage>,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Verify {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Verification, EngineError>>,
    },
    Register {
        name: String,
        image: Vec<u8>,
        reply: oneshot::Sender<Result<RosterUpdate, EngineError>>,
    },
    Remove {
        name: String,
        reply: oneshot::Sender<Result<RosterUpdate, EngineError>>,
    },
    Rebuild {
        reply: oneshot::Sender<Result<RosterUpdate, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Identify a probe image against the current gallery, recording attendance on a match.
    pub async fn verify(&self, image: Vec<u8>) -> Result<Verification, EngineError> {
        self.request(|reply| EngineRequest::Verify { image, reply }).await
    }

    /// Store a reference photo for `name` and rebuild the gallery.
    pub async fn register(
        &self,
        name: String,
        image: Vec<u8>,
    ) -> Result<RosterUpdate, EngineError> {
        self.request(|reply| EngineRequest::Register { name, image, reply })
            .await
    }

    /// Delete the reference photos for `name` and rebuild the gallery.
    pub async fn remove(&self, name: String) -> Result<RosterUpdate, EngineError> {
        self.request(|reply| EngineRequest::Remove { name, reply }).await
    }

    /// Rescan the images directory and publish the result.
    pub async fn rebuild(&self) -> Result<RosterUpdate, EngineError> {
        self.request(|reply| EngineRequest::Rebuild { reply }).await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// State owned by the engine thread. Every extraction and every rebuild
/// happens here, one request at a time.
struct Engine {
    strategy: Strategy,
    store: Arc<GalleryStore>,
    images_dir: PathBuf,
    recorder: Arc<dyn AttendanceRecorder>,
}

impl Engine {
    fn rebuild(&mut self) -> Result<RosterUpdate, EngineError> {
        let build = self.strategy.build_gallery(&self.images_dir)?;
        let published = self.store.publish(build.gallery);
        if !build.skipped.is_empty() {
            tracing::warn!(
                skipped = build.skipped.len(),
                version = published.version(),
                "some reference photos were left out of the gallery"
            );
        }
        Ok(RosterUpdate {
            removed: None,
            students: published.identities(),
            skipped: build.skipped,
        })
    }

    fn verify(&mut self, image: &[u8]) -> Result<Verification, EngineError> {
        let gallery = self.store.snapshot();
        let verification =
            rollcall_core::verify(&mut self.strategy, &gallery, self.recorder.as_ref(), image)?;
        Ok(verification)
    }

    fn register(&mut self, name: &str, image: &[u8]) -> Result<RosterUpdate, EngineError> {
        roster::store_image(&self.images_dir, name, image)?;
        self.rebuild()
    }

    fn remove(&mut self, name: &str) -> Result<RosterUpdate, EngineError> {
        let removed = roster::remove_images(&self.images_dir, name)?;
        let mut update = self.rebuild()?;
        update.removed = Some(removed);
        Ok(update)
    }

    fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::Verify { image, reply } => {
                let _ = reply.send(self.verify(&image));
            }
            EngineRequest::Register { name, image, reply } => {
                let _ = reply.send(self.register(&name, &image));
            }
            EngineRequest::Remove { name, reply } => {
                let _ = reply.send(self.remove(&name));
            }
            EngineRequest::Rebuild { reply } => {
                let _ = reply.send(self.rebuild());
            }
        }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Builds and publishes the initial gallery synchronously so startup fails
/// fast on an unreadable images directory, then enters the request loop.
pub fn spawn_engine(
    strategy: Strategy,
    store: Arc<GalleryStore>,
    images_dir: PathBuf,
    recorder: Arc<dyn AttendanceRecorder>,
) -> Result<EngineHandle, EngineError> {
    let mut engine = Engine {
        strategy,
        store,
        images_dir,
        recorder,
    };

    let initial = engine.rebuild()?;
    tracing::info!(
        mode = %engine.strategy.mode(),
        images_dir = %engine.images_dir.display(),
        students = initial.students.len(),
        skipped = initial.skipped.len(),
        "initial gallery built"
    );

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                engine.handle(req);
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use rollcall_core::{
        AttendanceStatus, CsvAttendanceLog, Mode, SkipReason, Thresholds, UNKNOWN_IDENTITY,
    };
    use std::io::Cursor;

    /// Smooth non-separable luma pattern; `invert` flips it around mid-grey.
    fn waves(invert: bool) -> Vec<u8> {
        let img = RgbImage::from_fn(128, 128, |x, y| {
            let u = x as f32 / 128.0;
            let v = y as f32 / 128.0;
            let tau = std::f32::consts::TAU;
            let l = 128.0 + 60.0 * (tau * 1.3 * u).sin() + 50.0 * (tau * (0.8 * v + 0.6 * u)).cos();
            let l = l.clamp(0.0, 255.0) as u8;
            let l = if invert { 255 - l } else { l };
            Rgb([l, l, l])
        });
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn face() -> Vec<u8> {
        waves(false)
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        images_dir: PathBuf,
        log: Arc<CsvAttendanceLog>,
        store: Arc<GalleryStore>,
        engine: EngineHandle,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let images_dir = dir.path().join("images");
        let log = Arc::new(CsvAttendanceLog::new(dir.path().join("attendance.csv")));
        let store = Arc::new(GalleryStore::new(Mode::Hash));
        let recorder: Arc<dyn AttendanceRecorder> = log.clone();
        let engine = spawn_engine(
            Strategy::hash(Thresholds::default()),
            Arc::clone(&store),
            images_dir.clone(),
            recorder,
        )
        .unwrap();
        Fixture {
            _dir: dir,
            images_dir,
            log,
            store,
            engine,
        }
    }

    #[tokio::test]
    async fn test_startup_with_missing_images_dir_publishes_empty_gallery() {
        let fx = fixture();
        let gallery = fx.store.snapshot();
        assert!(gallery.is_empty());
        assert_eq!(gallery.version(), 1);

        let err = fx.engine.verify(face()).await;
        assert!(matches!(err, Err(EngineError::Verify(VerifyError::EmptyGallery))));
    }

    #[tokio::test]
    async fn test_register_verify_remove() {
        let fx = fixture();

        let update = fx.engine.register("Dana Smith".into(), face()).await.unwrap();
        assert_eq!(update.students, vec!["Dana_Smith"]);
        assert!(update.skipped.is_empty());
        assert!(update.removed.is_none());
        assert!(fx.images_dir.join("Dana_Smith.png").exists());

        let v = fx.engine.verify(face()).await.unwrap();
        assert_eq!(v.decision.identity, "Dana_Smith");
        assert!(v.decision.accepted);
        assert_eq!(v.decision.distance, 0.0);
        assert_eq!(v.attendance, AttendanceStatus::Recorded);

        let records = fx.log.read_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity, "Dana_Smith");

        let update = fx.engine.remove("Dana Smith".into()).await.unwrap();
        assert_eq!(update.removed, Some(true));
        assert!(update.students.is_empty());

        let err = fx.engine.verify(face()).await;
        assert!(matches!(err, Err(EngineError::Verify(VerifyError::EmptyGallery))));
        assert_eq!(fx.log.read_records().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_each_roster_change_publishes_new_version() {
        let fx = fixture();
        let before = fx.store.snapshot().version();

        fx.engine.register("ada".into(), face()).await.unwrap();
        let after_add = fx.store.snapshot().version();
        fx.engine.rebuild().await.unwrap();
        let after_rebuild = fx.store.snapshot();

        assert!(after_add > before);
        assert!(after_rebuild.version() > after_add);
        assert_eq!(after_rebuild.identities(), vec!["ada"]);
    }

    #[tokio::test]
    async fn test_undecodable_reference_is_reported_as_skipped() {
        let fx = fixture();
        std::fs::create_dir_all(&fx.images_dir).unwrap();
        std::fs::write(fx.images_dir.join("broken.jpg"), b"not an image").unwrap();

        let update = fx.engine.register("grace".into(), face()).await.unwrap();
        assert_eq!(update.students, vec!["grace"]);
        assert_eq!(update.skipped.len(), 1);
        assert_eq!(update.skipped[0].identity.as_deref(), Some("broken"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_register_with_non_utf8_neighbour_still_replies() {
        use std::os::unix::ffi::OsStrExt;

        let fx = fixture();
        std::fs::create_dir_all(&fx.images_dir).unwrap();
        let odd = std::ffi::OsStr::from_bytes(b"\xff\xfe.png");
        std::fs::write(fx.images_dir.join(odd), face()).unwrap();

        let update = fx.engine.register("grace".into(), face()).await.unwrap();
        assert_eq!(update.students, vec!["grace"]);
        assert_eq!(update.skipped.len(), 1);
        assert_eq!(update.skipped[0].reason, SkipReason::InvalidName);

        let json: serde_json::Value = serde_json::to_value(&update).unwrap();
        assert_eq!(json["skipped"][0]["reason"]["kind"], "invalid_name");
    }

    #[tokio::test]
    async fn test_errors_cross_the_channel() {
        let fx = fixture();

        let err = fx.engine.register("???".into(), face()).await;
        assert!(matches!(err, Err(EngineError::Roster(RosterError::InvalidName(_)))));

        fx.engine.register("ada".into(), face()).await.unwrap();
        let err = fx.engine.verify(b"garbage".to_vec()).await;
        assert!(matches!(err, Err(EngineError::Verify(VerifyError::Decode(_)))));

        let update = fx.engine.remove("nobody".into()).await.unwrap();
        assert_eq!(update.removed, Some(false));
        assert_eq!(update.students, vec!["ada"]);
    }

    #[tokio::test]
    async fn test_unrelated_face_is_unknown() {
        let fx = fixture();
        fx.engine.register("ada".into(), face()).await.unwrap();

        let v = fx.engine.verify(waves(true)).await.unwrap();
        assert_eq!(v.decision.identity, UNKNOWN_IDENTITY);
        assert!(!v.decision.accepted);
        assert_eq!(v.attendance, AttendanceStatus::NotRequired);
        assert!(fx.log.read_records().unwrap().is_empty());
    }
}
