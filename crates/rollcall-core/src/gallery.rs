//! Gallery of registered identities and the snapshot store that publishes it.
//!
//! A gallery is built from scratch by scanning the images directory and is
//! never mutated after publication. [`GalleryStore::publish`] swaps the
//! active snapshot; readers holding an older `Arc<Gallery>` keep a consistent
//! view until they drop it.

use crate::extractor::{ExtractError, Extractor};
use crate::matcher::MatchError;
use crate::types::{Mode, Representation};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("cannot read gallery directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Immutable identity → representation mapping for one mode.
///
/// Iteration is ordered by identity name.
#[derive(Debug, Clone)]
pub struct Gallery {
    mode: Mode,
    version: u64,
    entries: BTreeMap<String, Representation>,
}

impl Gallery {
    pub fn empty(mode: Mode) -> Self {
        Self {
            mode,
            version: 0,
            entries: BTreeMap::new(),
        }
    }

    /// Build a gallery from in-memory entries, all of which must be of `mode`.
    pub fn from_entries<I>(mode: Mode, entries: I) -> Result<Self, MatchError>
    where
        I: IntoIterator<Item = (String, Representation)>,
    {
        let mut map = BTreeMap::new();
        for (identity, rep) in entries {
            if rep.mode() != mode {
                return Err(MatchError::ModeMismatch {
                    probe: rep.mode(),
                    gallery: mode,
                });
            }
            map.insert(identity, rep);
        }
        Ok(Self {
            mode,
            version: 0,
            entries: map,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Snapshot version stamped by [`GalleryStore::publish`]; 0 if unpublished.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, identity: &str) -> Option<&Representation> {
        self.entries.get(identity)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.entries.contains_key(identity)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Representation)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn identities(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn entries(&self) -> &BTreeMap<String, Representation> {
        &self.entries
    }
}

/// Why a file in the images directory did not make it into the gallery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum SkipReason {
    Unreadable(String),
    Undecodable(String),
    NoFaceDetected,
    Inference(String),
    InvalidName,
    DuplicateIdentity,
    DimensionMismatch { expected: usize, found: usize },
}

impl From<ExtractError> for SkipReason {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Decode(e) => SkipReason::Undecodable(e.to_string()),
            ExtractError::NoFaceDetected => SkipReason::NoFaceDetected,
            ExtractError::Detector(e) => SkipReason::Inference(e.to_string()),
            ExtractError::Recognizer(e) => SkipReason::Inference(e.to_string()),
        }
    }
}

/// A gallery-source image that was left out of the build.
///
/// `path` is display text: file names need not be valid UTF-8.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedImage {
    pub path: String,
    pub identity: Option<String>,
    pub reason: SkipReason,
}

/// Result of one directory scan: the gallery plus everything that was skipped.
#[derive(Debug, Clone)]
pub struct GalleryBuild {
    pub gallery: Gallery,
    pub skipped: Vec<SkippedImage>,
}

/// Scan `dir` and extract one representation per file.
///
/// Files are visited in sorted path order and keyed by file stem. Any
/// per-file failure skips that file; only a directory that exists but cannot
/// be listed is an error. A missing directory yields an empty gallery.
pub fn build_gallery(
    dir: &Path,
    extractor: &mut dyn Extractor,
) -> Result<GalleryBuild, GalleryError> {
    let mode = extractor.mode();

    let listing = match list_files(dir) {
        Ok(listing) => listing,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(
                dir = %dir.display(),
                "gallery directory does not exist; gallery is empty"
            );
            return Ok(GalleryBuild {
                gallery: Gallery::empty(mode),
                skipped: Vec::new(),
            });
        }
        Err(source) => {
            return Err(GalleryError::ReadDir {
                path: dir.to_path_buf(),
                source,
            })
        }
    };
    let mut paths = listing.files;
    paths.sort();

    let mut entries: BTreeMap<String, Representation> = BTreeMap::new();
    let mut skipped = listing.unreadable;
    let mut dimension: Option<usize> = None;

    for path in paths {
        let identity = match path.file_stem().and_then(|s| s.to_str()).filter(|s| !s.is_empty()) {
            Some(stem) => stem.to_string(),
            None => {
                tracing::warn!(
                    path = %path.display(),
                    "skipping gallery image without a usable name"
                );
                skipped.push(SkippedImage {
                    path: path.display().to_string(),
                    identity: None,
                    reason: SkipReason::InvalidName,
                });
                continue;
            }
        };

        match extract_entry(&path, &identity, &entries, &mut dimension, extractor) {
            Ok(rep) => {
                entries.insert(identity, rep);
            }
            Err(reason) => {
                tracing::warn!(
                    path = %path.display(),
                    identity = %identity,
                    ?reason,
                    "skipping gallery image"
                );
                skipped.push(SkippedImage {
                    path: path.display().to_string(),
                    identity: Some(identity),
                    reason,
                });
            }
        }
    }

    tracing::info!(
        mode = %mode,
        identities = entries.len(),
        skipped = skipped.len(),
        "gallery built"
    );

    Ok(GalleryBuild {
        gallery: Gallery {
            mode,
            version: 0,
            entries,
        },
        skipped,
    })
}

fn extract_entry(
    path: &Path,
    identity: &str,
    entries: &BTreeMap<String, Representation>,
    dimension: &mut Option<usize>,
    extractor: &mut dyn Extractor,
) -> Result<Representation, SkipReason> {
    if entries.contains_key(identity) {
        return Err(SkipReason::DuplicateIdentity);
    }

    let bytes = std::fs::read(path).map_err(|e| SkipReason::Unreadable(e.to_string()))?;
    let rep = extractor.extract(&bytes)?;

    // All embeddings in one gallery share a length; the first entry fixes it.
    if let Representation::Embedding(embedding) = &rep {
        match *dimension {
            Some(expected) if expected != embedding.len() => {
                return Err(SkipReason::DimensionMismatch {
                    expected,
                    found: embedding.len(),
                });
            }
            Some(_) => {}
            None => *dimension = Some(embedding.len()),
        }
    }

    Ok(rep)
}

struct Listing {
    files: Vec<PathBuf>,
    unreadable: Vec<SkippedImage>,
}

/// Regular files in `dir`, following symlinks. Only failing to open the
/// directory itself is an error; a bad entry is reported as unreadable.
fn list_files(dir: &Path) -> std::io::Result<Listing> {
    let mut listing = Listing {
        files: Vec::new(),
        unreadable: Vec::new(),
    };

    for entry in std::fs::read_dir(dir)? {
        let (path, meta) = match entry {
            Ok(entry) => {
                let path = entry.path();
                let meta = std::fs::metadata(&path);
                (path, meta)
            }
            Err(e) => (dir.to_path_buf(), Err(e)),
        };

        match meta {
            Ok(meta) if meta.is_file() => listing.files.push(path),
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "skipping unreadable gallery entry"
                );
                let identity = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .filter(|_| path != dir)
                    .map(str::to_string);
                listing.unreadable.push(SkippedImage {
                    path: path.display().to_string(),
                    identity,
                    reason: SkipReason::Unreadable(e.to_string()),
                });
            }
        }
    }
    Ok(listing)
}

/// Holder of the active gallery snapshot.
pub struct GalleryStore {
    current: RwLock<Arc<Gallery>>,
    next_version: AtomicU64,
}

impl GalleryStore {
    pub fn new(mode: Mode) -> Self {
        Self {
            current: RwLock::new(Arc::new(Gallery::empty(mode))),
            next_version: AtomicU64::new(1),
        }
    }

    /// The currently published gallery.
    pub fn snapshot(&self) -> Arc<Gallery> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Stamp `gallery` with the next version and make it the active snapshot.
    pub fn publish(&self, mut gallery: Gallery) -> Arc<Gallery> {
        gallery.version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let published = Arc::new(gallery);

        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Arc::clone(&published);
        drop(guard);

        tracing::info!(
            version = published.version,
            identities = published.len(),
            "gallery published"
        );
        published
    }
}
