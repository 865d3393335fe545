//! Image bytes → comparable representation.
//!
//! Two extractors share one trait: [`EmbeddingExtractor`] runs SCRFD + ArcFace
//! on the first detected face, [`HashExtractor`] hashes the whole image.

use crate::detector::{DetectorError, FaceDetector};
use crate::phash::perceptual_hash;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Mode, Representation};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("image could not be decoded: {0}")]
    Decode(#[from] image::ImageError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Converts raw image bytes into a [`Representation`] of a fixed [`Mode`].
///
/// Takes `&mut self` because ONNX sessions need exclusive access to run.
pub trait Extractor: Send {
    fn mode(&self) -> Mode;
    fn extract(&mut self, image: &[u8]) -> Result<Representation, ExtractError>;
}

/// Decode arbitrary image bytes (JPEG, PNG, ...) into 8-bit RGB.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, ExtractError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Facial-embedding extractor.
pub struct EmbeddingExtractor {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl EmbeddingExtractor {
    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self {
            detector,
            recognizer,
        }
    }

    /// Load both ONNX models. Fails if either is missing or unloadable.
    pub fn load(scrfd_path: &Path, arcface_path: &Path) -> Result<Self, ExtractError> {
        let detector = FaceDetector::load(scrfd_path)?;
        let recognizer = FaceRecognizer::load(arcface_path)?;
        Ok(Self::new(detector, recognizer))
    }
}

impl Extractor for EmbeddingExtractor {
    fn mode(&self) -> Mode {
        Mode::Embedding
    }

    fn extract(&mut self, image: &[u8]) -> Result<Representation, ExtractError> {
        let rgb = decode_rgb(image)?;
        let faces = self.detector.detect(&rgb)?;

        // Detector order, not a best-face pick.
        let face = faces.first().ok_or(ExtractError::NoFaceDetected)?;
        tracing::debug!(
            faces = faces.len(),
            confidence = face.confidence,
            "embedding: using first detected face"
        );

        let embedding = self.recognizer.extract(&rgb, face)?;
        Ok(Representation::Embedding(embedding))
    }
}

/// Perceptual-hash extractor. Never fails on image content, only on decoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashExtractor;

impl Extractor for HashExtractor {
    fn mode(&self) -> Mode {
        Mode::Hash
    }

    fn extract(&mut self, image: &[u8]) -> Result<Representation, ExtractError> {
        let rgb = decode_rgb(image)?;
        Ok(Representation::Hash(perceptual_hash(&rgb)))
    }
}
