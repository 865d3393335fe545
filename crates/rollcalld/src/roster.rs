//! Reference-photo directory maintenance: one image file per student.

use image::{ImageFormat, Rgb, RgbImage};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const PLACEHOLDER_SIZE: u32 = 200;
const PLACEHOLDER_GREY: u8 = 200;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("student name {0:?} has no usable characters")]
    InvalidName(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("placeholder image: {0}")]
    Image(#[from] image::ImageError),
}

/// Keep alphanumerics, spaces, `-` and `_`; trim; turn spaces into `_`.
pub fn sanitize_name(name: &str) -> Result<String, RosterError> {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let safe = kept.trim().replace(' ', "_");
    if safe.is_empty() {
        return Err(RosterError::InvalidName(name.to_string()));
    }
    Ok(safe)
}

/// Write `image` as the reference photo for `name`, replacing any earlier one.
///
/// The extension follows the detected image format. Empty `image` bytes
/// store a plain grey placeholder so the student still has a thumbnail.
/// The new file is renamed into place before older photos are removed, so a
/// failed write leaves the previous photo intact.
pub fn store_image(dir: &Path, name: &str, image: &[u8]) -> Result<PathBuf, RosterError> {
    let safe = sanitize_name(name)?;
    std::fs::create_dir_all(dir)?;

    let (bytes, ext) = if image.is_empty() {
        (placeholder_png()?, "png")
    } else {
        let ext = image::guess_format(image)
            .ok()
            .and_then(|f| f.extensions_str().first().copied())
            .unwrap_or("png");
        (image.to_vec(), ext)
    };
    let path = dir.join(format!("{safe}.{ext}"));

    let mut staged = tempfile::Builder::new()
        .prefix(".upload-")
        .tempfile_in(dir)?;
    staged.write_all(&bytes)?;
    staged.persist(&path).map_err(|e| e.error)?;

    remove_matching(dir, &safe, Some(&path))?;
    tracing::info!(
        student = %safe,
        path = %path.display(),
        bytes = bytes.len(),
        placeholder = image.is_empty(),
        "stored reference photo"
    );
    Ok(path)
}

/// Delete every file whose stem is the sanitized `name`. Returns whether
/// anything was removed.
pub fn remove_images(dir: &Path, name: &str) -> Result<bool, RosterError> {
    let safe = sanitize_name(name)?;
    remove_matching(dir, &safe, None)
}

fn remove_matching(dir: &Path, stem: &str, keep: Option<&Path>) -> Result<bool, RosterError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };

    let mut removed = false;
    for entry in entries {
        let path = entry?.path();
        if Some(path.as_path()) == keep {
            continue;
        }
        if path.is_file() && path.file_stem().and_then(|s| s.to_str()) == Some(stem) {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    tracing::info!(student = %stem, path = %path.display(), "removed photo");
                    removed = true;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove photo")
                }
            }
        }
    }
    Ok(removed)
}

fn placeholder_png() -> Result<Vec<u8>, RosterError> {
    let img = RgbImage::from_pixel(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, Rgb([PLACEHOLDER_GREY; 3]));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jpeg_bytes() -> Vec<u8> {
        let img = RgbImage::from_pixel(8, 8, Rgb([10, 20, 30]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Jpeg).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("  Ada Lovelace ").unwrap(), "Ada_Lovelace");
        assert_eq!(sanitize_name("o'brien-smith_2").unwrap(), "obrien-smith_2");
        assert_eq!(sanitize_name("../../etc/passwd").unwrap(), "etcpasswd");
        assert_eq!(sanitize_name("José").unwrap(), "José");
        assert!(matches!(sanitize_name("!!!"), Err(RosterError::InvalidName(_))));
    }

    #[test]
    fn test_store_uses_detected_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_image(dir.path(), "Ada Lovelace", &jpeg_bytes()).unwrap();
        assert_eq!(path, dir.path().join("Ada_Lovelace.jpg"));
        assert!(path.exists());
    }

    #[test]
    fn test_store_replaces_previous_photo() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ada.png"), b"old").unwrap();

        store_image(dir.path(), "ada", &jpeg_bytes()).unwrap();
        assert!(!dir.path().join("ada.png").exists());
        assert!(dir.path().join("ada.jpg").exists());
    }

    #[test]
    fn test_store_same_format_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ada.jpg"), b"old").unwrap();

        let path = store_image(dir.path(), "ada", &jpeg_bytes()).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), jpeg_bytes());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_failed_store_keeps_previous_photo() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ada.png"), b"old").unwrap();
        // A directory squatting on the target name makes the final rename fail.
        std::fs::create_dir(dir.path().join("ada.jpg")).unwrap();

        assert!(matches!(store_image(dir.path(), "ada", &jpeg_bytes()), Err(RosterError::Io(_))));
        assert_eq!(std::fs::read(dir.path().join("ada.png")).unwrap(), b"old");
        // The staged upload is cleaned up.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .filter(|n| n.to_string_lossy().starts_with(".upload-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_store_empty_bytes_writes_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let path = store_image(dir.path(), "grace", &[]).unwrap();
        let img = image::open(&path).unwrap().to_rgb8();
        assert_eq!(img.dimensions(), (PLACEHOLDER_SIZE, PLACEHOLDER_SIZE));
        assert_eq!(img.get_pixel(0, 0).0, [PLACEHOLDER_GREY; 3]);
    }

    #[test]
    fn test_remove_matches_stem_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ada.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("adam.jpg"), b"x").unwrap();

        assert!(remove_images(dir.path(), "ada").unwrap());
        assert!(!dir.path().join("ada.jpg").exists());
        assert!(dir.path().join("adam.jpg").exists());
        assert!(!remove_images(dir.path(), "ada").unwrap());
    }

    #[test]
    fn test_remove_from_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!remove_images(&dir.path().join("nope"), "ada").unwrap());
    }
}
