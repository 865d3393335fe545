//! Startup selection of the extractor/matcher pair.
//!
//! The rest of the system talks to a [`Strategy`] and never to a concrete
//! extractor or matcher, so the embedding and hash modes are interchangeable.

use crate::extractor::{EmbeddingExtractor, ExtractError, Extractor, HashExtractor};
use crate::gallery::{build_gallery, Gallery, GalleryBuild, GalleryError};
use crate::matcher::{
    EuclideanMatcher, HammingMatcher, Matcher, DEFAULT_EMBEDDING_THRESHOLD, DEFAULT_HASH_THRESHOLD,
};
use crate::types::{Decision, Mode, Representation};
use crate::verify::VerifyError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("extractor produces {extractor} representations but the matcher compares {matcher}")]
    ModeMismatch { extractor: Mode, matcher: Mode },
    #[error("embedding models unavailable: {0}")]
    ModelLoad(#[from] ExtractError),
}

/// Requested representation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModePreference {
    /// Embedding if both models load, hash otherwise.
    #[default]
    Auto,
    Embedding,
    Hash,
}

impl FromStr for ModePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "embedding" => Ok(Self::Embedding),
            "hash" => Ok(Self::Hash),
            other => Err(format!("unknown mode {other:?} (expected auto, embedding or hash)")),
        }
    }
}

/// Acceptance thresholds for both modes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Euclidean distance; accept iff strictly below.
    pub embedding: f32,
    /// Bit difference; accept iff at most this.
    pub hash: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            embedding: DEFAULT_EMBEDDING_THRESHOLD,
            hash: DEFAULT_HASH_THRESHOLD,
        }
    }
}

/// Locations of the SCRFD and ArcFace ONNX models.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub scrfd: PathBuf,
    pub arcface: PathBuf,
}

impl ModelPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            scrfd: dir.join(SCRFD_MODEL_FILE),
            arcface: dir.join(ARCFACE_MODEL_FILE),
        }
    }
}

/// One extractor and one matcher of the same mode.
pub struct Strategy {
    extractor: Box<dyn Extractor>,
    matcher: Box<dyn Matcher>,
}

impl Strategy {
    pub fn new(
        extractor: Box<dyn Extractor>,
        matcher: Box<dyn Matcher>,
    ) -> Result<Self, StrategyError> {
        if extractor.mode() != matcher.mode() {
            return Err(StrategyError::ModeMismatch {
                extractor: extractor.mode(),
                matcher: matcher.mode(),
            });
        }
        Ok(Self { extractor, matcher })
    }

    pub fn hash(thresholds: Thresholds) -> Self {
        Self {
            extractor: Box::new(HashExtractor),
            matcher: Box::new(HammingMatcher {
                max_bits: thresholds.hash,
            }),
        }
    }

    pub fn embedding(models: &ModelPaths, thresholds: Thresholds) -> Result<Self, StrategyError> {
        let extractor = EmbeddingExtractor::load(&models.scrfd, &models.arcface)?;
        Ok(Self {
            extractor: Box::new(extractor),
            matcher: Box::new(EuclideanMatcher {
                threshold: thresholds.embedding,
            }),
        })
    }

    /// Pick the strategy once at startup.
    ///
    /// `Auto` falls back to hashing when the embedding models cannot be
    /// loaded; an explicit `Embedding` request fails instead.
    pub fn select(
        preference: ModePreference,
        models: &ModelPaths,
        thresholds: Thresholds,
    ) -> Result<Self, StrategyError> {
        let strategy = match preference {
            ModePreference::Hash => Self::hash(thresholds),
            ModePreference::Embedding => Self::embedding(models, thresholds)?,
            ModePreference::Auto => match Self::embedding(models, thresholds) {
                Ok(strategy) => strategy,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "face embedding unavailable; falling back to perceptual-hash matching"
                    );
                    Self::hash(thresholds)
                }
            },
        };
        tracing::info!(mode = %strategy.mode(), "matching strategy selected");
        Ok(strategy)
    }

    pub fn mode(&self) -> Mode {
        self.extractor.mode()
    }

    pub fn extract(&mut self, image: &[u8]) -> Result<Representation, ExtractError> {
        self.extractor.extract(image)
    }

    pub fn build_gallery(&mut self, dir: &Path) -> Result<GalleryBuild, GalleryError> {
        build_gallery(dir, self.extractor.as_mut())
    }

    /// Extract the probe and match it. A probe without a face never reaches
    /// the matcher.
    pub fn identify(&mut self, image: &[u8], gallery: &Gallery) -> Result<Decision, VerifyError> {
        let probe = self.extractor.extract(image)?;
        Ok(self.matcher.compare(&probe, gallery)?)
    }
}
