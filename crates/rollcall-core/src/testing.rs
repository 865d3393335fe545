//! Test doubles shared by the unit tests.

use crate::attendance::{AttendanceError, AttendanceRecorder};
use crate::extractor::{ExtractError, Extractor};
use crate::types::{Embedding, Mode, PerceptualHash, Representation};
use chrono::NaiveDateTime;
use std::sync::Mutex;

/// Interprets image bytes as a script instead of pixels:
/// `face:<f32>,<f32>,...`, `hash:<u64>`, or `noface`. Anything else goes
/// through the real decoder and fails.
pub struct ScriptedExtractor {
    pub mode: Mode,
    pub calls: usize,
}

impl ScriptedExtractor {
    pub fn new(mode: Mode) -> Self {
        Self { mode, calls: 0 }
    }
}

impl Extractor for ScriptedExtractor {
    fn mode(&self) -> Mode {
        self.mode
    }

    fn extract(&mut self, image: &[u8]) -> Result<Representation, ExtractError> {
        self.calls += 1;
        let text = std::str::from_utf8(image).unwrap_or("");
        if let Some(values) = text.strip_prefix("face:") {
            let values = values.trim().split(',').map(|v| v.parse().unwrap()).collect();
            Ok(Representation::Embedding(Embedding::new(values)))
        } else if let Some(bits) = text.strip_prefix("hash:") {
            Ok(Representation::Hash(PerceptualHash(bits.trim().parse().unwrap())))
        } else if text.starts_with("noface") {
            Err(ExtractError::NoFaceDetected)
        } else {
            Err(ExtractError::Decode(image::load_from_memory(image).unwrap_err()))
        }
    }
}

/// Remembers every identity it is asked to record; optionally fails.
#[derive(Default)]
pub struct RecordingRecorder {
    pub calls: Mutex<Vec<String>>,
    pub fail: bool,
}

impl RecordingRecorder {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn recorded(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl AttendanceRecorder for RecordingRecorder {
    fn record(&self, identity: &str, _at: NaiveDateTime) -> Result<(), AttendanceError> {
        self.calls.lock().unwrap().push(identity.to_string());
        if self.fail {
            return Err(AttendanceError::Io {
                path: "attendance.csv".into(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            });
        }
        Ok(())
    }
}
