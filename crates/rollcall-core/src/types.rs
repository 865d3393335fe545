use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity reported for a probe that did not pass the acceptance threshold.
pub const UNKNOWN_IDENTITY: &str = "Unknown";

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// 64-bit DCT perceptual hash of a whole image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PerceptualHash(pub u64);

impl PerceptualHash {
    /// Number of differing bits.
    pub fn hamming_distance(&self, other: &PerceptualHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Which representation a running instance extracts and compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Embedding,
    Hash,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Embedding => f.write_str("embedding"),
            Mode::Hash => f.write_str("hash"),
        }
    }
}

/// A comparable summary of one image: a face embedding or a perceptual hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Representation {
    Embedding(Embedding),
    Hash(PerceptualHash),
}

impl Representation {
    pub fn mode(&self) -> Mode {
        match self {
            Representation::Embedding(_) => Mode::Embedding,
            Representation::Hash(_) => Mode::Hash,
        }
    }
}

/// Outcome of matching one probe against a gallery snapshot.
///
/// `distance` is the winning entry's distance even when the probe is rejected,
/// so callers can see how close a rejected probe came.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub identity: String,
    pub accepted: bool,
    pub distance: f32,
}

impl Decision {
    pub fn accept(identity: impl Into<String>, distance: f32) -> Self {
        Self {
            identity: identity.into(),
            accepted: true,
            distance,
        }
    }

    pub fn reject(distance: f32) -> Self {
        Self {
            identity: UNKNOWN_IDENTITY.to_string(),
            accepted: false,
            distance,
        }
    }
}
