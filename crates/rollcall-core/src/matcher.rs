//! Nearest-neighbour matching of a probe against a gallery snapshot.

use crate::gallery::Gallery;
use crate::types::{Decision, Mode, Representation};
use thiserror::Error;

/// Embedding mode accepts when the Euclidean distance is strictly below this.
pub const DEFAULT_EMBEDDING_THRESHOLD: f32 = 0.5;
/// Hash mode accepts when the bit difference is at most this.
pub const DEFAULT_HASH_THRESHOLD: u32 = 10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("no registered identities in the gallery")]
    EmptyGallery,
    #[error("probe is a {probe} representation but the gallery holds {gallery}")]
    ModeMismatch { probe: Mode, gallery: Mode },
    #[error("probe embedding has {found} dimensions, gallery expects {expected}")]
    DimensionMismatch { expected: usize, found: usize },
}

/// Strategy for comparing a probe against a gallery of registered identities.
pub trait Matcher: Send + Sync {
    fn mode(&self) -> Mode;
    fn compare(&self, probe: &Representation, gallery: &Gallery) -> Result<Decision, MatchError>;
}

/// Euclidean-distance matcher for face embeddings.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub threshold: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_EMBEDDING_THRESHOLD,
        }
    }
}

impl EuclideanMatcher {
    pub fn accepts(&self, distance: f32) -> bool {
        distance < self.threshold
    }
}

impl Matcher for EuclideanMatcher {
    fn mode(&self) -> Mode {
        Mode::Embedding
    }

    fn compare(&self, probe: &Representation, gallery: &Gallery) -> Result<Decision, MatchError> {
        let Representation::Embedding(probe) = probe else {
            return Err(MatchError::ModeMismatch {
                probe: probe.mode(),
                gallery: Mode::Embedding,
            });
        };
        check_gallery(gallery, Mode::Embedding)?;

        let mut best: Option<(&str, f32)> = None;
        for (identity, rep) in gallery.iter() {
            let Representation::Embedding(reference) = rep else {
                return Err(MatchError::ModeMismatch {
                    probe: Mode::Embedding,
                    gallery: rep.mode(),
                });
            };
            if reference.len() != probe.len() {
                return Err(MatchError::DimensionMismatch {
                    expected: reference.len(),
                    found: probe.len(),
                });
            }
            let distance = probe.euclidean_distance(reference);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((identity, distance));
            }
        }

        let (identity, distance) = best.ok_or(MatchError::EmptyGallery)?;
        Ok(decide(identity, distance, self.accepts(distance)))
    }
}

/// Hamming-distance matcher for perceptual hashes.
#[derive(Debug, Clone, Copy)]
pub struct HammingMatcher {
    pub max_bits: u32,
}

impl Default for HammingMatcher {
    fn default() -> Self {
        Self {
            max_bits: DEFAULT_HASH_THRESHOLD,
        }
    }
}

impl HammingMatcher {
    pub fn accepts(&self, bits: u32) -> bool {
        bits <= self.max_bits
    }
}

impl Matcher for HammingMatcher {
    fn mode(&self) -> Mode {
        Mode::Hash
    }

    fn compare(&self, probe: &Representation, gallery: &Gallery) -> Result<Decision, MatchError> {
        let Representation::Hash(probe) = probe else {
            return Err(MatchError::ModeMismatch {
                probe: probe.mode(),
                gallery: Mode::Hash,
            });
        };
        check_gallery(gallery, Mode::Hash)?;

        let mut best: Option<(&str, u32)> = None;
        for (identity, rep) in gallery.iter() {
            let Representation::Hash(reference) = rep else {
                return Err(MatchError::ModeMismatch {
                    probe: Mode::Hash,
                    gallery: rep.mode(),
                });
            };
            let bits = probe.hamming_distance(reference);
            if best.map_or(true, |(_, b)| bits < b) {
                best = Some((identity, bits));
            }
        }

        let (identity, bits) = best.ok_or(MatchError::EmptyGallery)?;
        Ok(decide(identity, bits as f32, self.accepts(bits)))
    }
}

fn check_gallery(gallery: &Gallery, expected: Mode) -> Result<(), MatchError> {
    if gallery.mode() != expected {
        return Err(MatchError::ModeMismatch {
            probe: expected,
            gallery: gallery.mode(),
        });
    }
    if gallery.is_empty() {
        return Err(MatchError::EmptyGallery);
    }
    Ok(())
}

fn decide(identity: &str, distance: f32, accepted: bool) -> Decision {
    tracing::debug!(nearest = identity, distance, accepted, "match decision");
    if accepted {
        Decision::accept(identity, distance)
    } else {
        Decision::reject(distance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Embedding, PerceptualHash, UNKNOWN_IDENTITY};

    fn emb(values: &[f32]) -> Representation {
        Representation::Embedding(Embedding::new(values.to_vec()))
    }

    fn embedding_gallery(entries: &[(&str, &[f32])]) -> Gallery {
        Gallery::from_entries(
            Mode::Embedding,
            entries.iter().map(|(name, v)| (name.to_string(), emb(v))),
        )
        .unwrap()
    }

    fn hash_gallery(entries: &[(&str, u64)]) -> Gallery {
        Gallery::from_entries(
            Mode::Hash,
            entries
                .iter()
                .map(|(name, h)| (name.to_string(), Representation::Hash(PerceptualHash(*h)))),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_gallery_fails_in_both_modes() {
        let err =
            EuclideanMatcher::default().compare(&emb(&[1.0]), &Gallery::empty(Mode::Embedding));
        assert_eq!(err, Err(MatchError::EmptyGallery));

        let err = HammingMatcher::default()
            .compare(&Representation::Hash(PerceptualHash(0)), &Gallery::empty(Mode::Hash));
        assert_eq!(err, Err(MatchError::EmptyGallery));
    }

    #[test]
    fn test_embedding_accepts_close_face() {
        let gallery = embedding_gallery(&[("alice", &[0.0, 0.0])]);
        let decision = EuclideanMatcher::default().compare(&emb(&[0.3, 0.0]), &gallery).unwrap();
        assert_eq!(decision.identity, "alice");
        assert!(decision.accepted);
        assert!((decision.distance - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_embedding_rejects_far_face_and_reports_distance() {
        let gallery = embedding_gallery(&[("alice", &[0.0, 0.0])]);
        let decision = EuclideanMatcher::default().compare(&emb(&[0.7, 0.0]), &gallery).unwrap();
        assert_eq!(decision.identity, UNKNOWN_IDENTITY);
        assert!(!decision.accepted);
        assert!((decision.distance - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_embedding_boundary_rejects() {
        let gallery = embedding_gallery(&[("alice", &[0.0, 0.0])]);
        let decision = EuclideanMatcher::default().compare(&emb(&[0.5, 0.0]), &gallery).unwrap();
        assert_eq!(decision.distance, 0.5);
        assert!(!decision.accepted);

        let matcher = EuclideanMatcher::default();
        assert!(matcher.accepts(0.499_999));
        assert!(!matcher.accepts(0.5));
    }

    #[test]
    fn test_embedding_picks_minimum_after_full_scan() {
        let gallery = embedding_gallery(&[
            ("anna", &[0.0, 1.0]),
            ("bert", &[1.0, 1.0]),
            ("zoe", &[1.0, 0.0]),
        ]);
        let decision = EuclideanMatcher::default().compare(&emb(&[0.9, 0.0]), &gallery).unwrap();
        assert_eq!(decision.identity, "zoe");
        assert!(decision.accepted);
    }

    #[test]
    fn test_embedding_tie_goes_to_first_in_order() {
        let gallery = embedding_gallery(&[("bob", &[1.0, 0.0]), ("amy", &[-1.0, 0.0])]);
        let probe = emb(&[0.0, 0.0]);
        let first = EuclideanMatcher { threshold: 2.0 }.compare(&probe, &gallery).unwrap();
        assert_eq!(first.identity, "amy");
        for _ in 0..5 {
            let again = EuclideanMatcher { threshold: 2.0 }.compare(&probe, &gallery).unwrap();
            assert_eq!(again, first);
        }
    }

    #[test]
    fn test_embedding_dimension_mismatch() {
        let gallery = embedding_gallery(&[("alice", &[0.0, 0.0])]);
        let err = EuclideanMatcher::default().compare(&emb(&[0.0, 0.0, 0.0]), &gallery);
        assert_eq!(err, Err(MatchError::DimensionMismatch { expected: 2, found: 3 }));
    }

    #[test]
    fn test_hash_boundary_ten_accepts_eleven_rejects() {
        let gallery = hash_gallery(&[("bob", 0)]);
        let ten = Representation::Hash(PerceptualHash(0b11_1111_1111));
        let eleven = Representation::Hash(PerceptualHash(0b111_1111_1111));

        let decision = HammingMatcher::default().compare(&ten, &gallery).unwrap();
        assert_eq!(decision.identity, "bob");
        assert!(decision.accepted);
        assert_eq!(decision.distance, 10.0);

        let decision = HammingMatcher::default().compare(&eleven, &gallery).unwrap();
        assert_eq!(decision.identity, UNKNOWN_IDENTITY);
        assert!(!decision.accepted);
        assert_eq!(decision.distance, 11.0);
    }

    #[test]
    fn test_hash_picks_nearest() {
        let gallery = hash_gallery(&[("far", u64::MAX), ("near", 0b1)]);
        let decision = HammingMatcher::default()
            .compare(&Representation::Hash(PerceptualHash(0)), &gallery)
            .unwrap();
        assert_eq!(decision.identity, "near");
        assert_eq!(decision.distance, 1.0);
    }

    #[test]
    fn test_mode_mismatch() {
        let gallery = hash_gallery(&[("bob", 0)]);
        let err = EuclideanMatcher::default().compare(&emb(&[0.0]), &gallery);
        assert_eq!(
            err,
            Err(MatchError::ModeMismatch { probe: Mode::Embedding, gallery: Mode::Hash })
        );

        let err = HammingMatcher::default().compare(&emb(&[0.0]), &gallery);
        assert_eq!(
            err,
            Err(MatchError::ModeMismatch { probe: Mode::Embedding, gallery: Mode::Hash })
        );
    }
}
