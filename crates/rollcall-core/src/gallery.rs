//! Enrollment directory → [`Gallery`].

use crate::extractor::EmbeddingExtractor;
use crate::types::{Gallery, Identity, SkippedEnrollment};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("failed to create enrollment directory {path}: {source}")]
    CreateDir { path: PathBuf, source: std::io::Error },
    #[error("failed to read enrollment directory: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Loads identities from a directory holding one image per person. The
/// file stem is the person's name, taken as-is.
#[derive(Debug, Clone)]
pub struct GalleryStore {
    dir: PathBuf,
}

impl GalleryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scan the directory and embed the first face of every image.
    ///
    /// Images that can't be decoded or contain no face are skipped with a
    /// warning and listed in [`Gallery::skipped`].
    pub fn load<E: EmbeddingExtractor + ?Sized>(&self, extractor: &mut E) -> Result<Gallery, GalleryError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|source| GalleryError::CreateDir { path: self.dir.clone(), source })?;

        let mut identities = Vec::new();
        let mut skipped = Vec::new();

        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type().is_file() || !is_image(path) {
                continue;
            }
            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };

            match embed_first_face(extractor, path) {
                Ok(embedding) => {
                    tracing::debug!(name = %name, path = %path.display(), "enrolled identity loaded");
                    identities.push(Identity { name, embedding, source: path.to_path_buf() });
                }
                Err(reason) => {
                    tracing::warn!(path = %path.display(), reason = %reason, "skipping enrollment image");
                    skipped.push(SkippedEnrollment { path: path.to_path_buf(), reason });
                }
            }
        }

        tracing::info!(
            dir = %self.dir.display(),
            identities = identities.len(),
            skipped = skipped.len(),
            "gallery loaded"
        );
        Ok(Gallery::with_skipped(identities, skipped))
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|known| e.eq_ignore_ascii_case(known)))
}

fn embed_first_face<E: EmbeddingExtractor + ?Sized>(
    extractor: &mut E,
    path: &Path,
) -> Result<crate::types::Embedding, String> {
    let image = image::open(path).map_err(|e| format!("unreadable image: {e}"))?.to_rgb8();
    let faces = extractor.locate_faces(&image).map_err(|e| format!("detection failed: {e}"))?;
    let Some(first) = faces.into_iter().next() else {
        return Err("no face detected".to_string());
    };
    extractor
        .encode(&image, std::slice::from_ref(&first))
        .map_err(|e| format!("encoding failed: {e}"))?
        .into_iter()
        .next()
        .ok_or_else(|| "encoder returned no embedding".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::PixelExtractor;
    use crate::types::{Embedding, FirstMatchMatcher, Matcher};
    use image::{Rgb, RgbImage};

    fn write_face(dir: &Path, file: &str, color: [u8; 3]) {
        RgbImage::from_pixel(8, 8, Rgb(color)).save(dir.join(file)).unwrap();
    }

    #[test]
    fn test_load_in_file_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write_face(dir.path(), "carol.png", [0, 0, 255]);
        write_face(dir.path(), "alice.png", [255, 0, 0]);
        write_face(dir.path(), "bob.jpg", [0, 255, 0]);
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let gallery = GalleryStore::new(dir.path()).load(&mut PixelExtractor).unwrap();
        let names: Vec<_> = gallery.identities().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["alice", "bob", "carol"]);
        assert!(gallery.skipped().is_empty());
    }

    #[test]
    fn test_faceless_image_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_face(dir.path(), "alice.png", [0, 0, 0]);
        write_face(dir.path(), "bob.png", [0, 255, 0]);

        let gallery = GalleryStore::new(dir.path()).load(&mut PixelExtractor).unwrap();
        assert!(!gallery.contains("alice"));
        assert!(gallery.contains("bob"));
        assert_eq!(gallery.skipped().len(), 1);
        assert!(gallery.skipped()[0].path.ends_with("alice.png"));

        // alice's face can never match
        let probe = Embedding::new(vec![0.0, 0.0, 0.0]);
        assert_eq!(FirstMatchMatcher.compare(&probe, &gallery, 0.6).name(), None);
    }

    #[test]
    fn test_unreadable_image_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.jpg"), b"not really a jpeg").unwrap();
        write_face(dir.path(), "bob.png", [0, 255, 0]);

        let gallery = GalleryStore::new(dir.path()).load(&mut PixelExtractor).unwrap();
        assert_eq!(gallery.len(), 1);
        assert!(gallery.skipped()[0].reason.starts_with("unreadable image"));
    }

    #[test]
    fn test_names_are_not_renormalized() {
        let dir = tempfile::tempdir().unwrap();
        write_face(dir.path(), "Mary Jane.PNG", [10, 20, 30]);

        let gallery = GalleryStore::new(dir.path()).load(&mut PixelExtractor).unwrap();
        assert_eq!(gallery.identities()[0].name, "Mary Jane");
    }

    #[test]
    fn test_missing_directory_is_created() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("known_faces");
        let gallery = GalleryStore::new(&dir).load(&mut PixelExtractor).unwrap();
        assert!(gallery.is_empty());
        assert!(dir.is_dir());
    }
}
