//! rollcall-core: identity matching for attendance.
//!
//! Converts photos into comparable representations (ArcFace embeddings via
//! ONNX Runtime, or a DCT perceptual hash when the models are unavailable),
//! builds a gallery from a directory of reference images, and matches probes
//! against it.

pub mod alignment;
pub mod attendance;
pub mod detector;
pub mod extractor;
pub mod gallery;
pub mod matcher;
pub mod phash;
pub mod recognizer;
pub mod strategy;
pub mod types;
pub mod verify;

#[cfg(test)]
mod testing;

pub use attendance::{AttendanceError, AttendanceRecord, AttendanceRecorder, CsvAttendanceLog};
pub use detector::FaceDetector;
pub use extractor::{EmbeddingExtractor, ExtractError, Extractor, HashExtractor};
pub use gallery::{
    build_gallery, Gallery, GalleryBuild, GalleryError, GalleryStore, SkipReason, SkippedImage,
};
pub use matcher::{EuclideanMatcher, HammingMatcher, MatchError, Matcher};
pub use recognizer::FaceRecognizer;
pub use strategy::{ModelPaths, ModePreference, Strategy, StrategyError, Thresholds};
pub use types::{
    BoundingBox, Decision, Embedding, Mode, PerceptualHash, Representation, UNKNOWN_IDENTITY,
};
pub use verify::{verify, AttendanceStatus, Verification, VerifyError};

use std::path::PathBuf;

/// Default directory for the SCRFD and ArcFace ONNX models.
///
/// `$XDG_DATA_HOME/rollcall/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    data_home().join("rollcall").join("models")
}

/// `$XDG_DATA_HOME`, or `$HOME/.local/share`, or `/tmp/.local/share`.
pub fn data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
}
