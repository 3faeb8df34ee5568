//! Writes new enrollment images into the gallery directory.

use image::ImageFormat;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("a name is required to enroll a face")]
    MissingName,
    #[error("an image is required to enroll a face")]
    MissingImage,
    #[error("image could not be decoded: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: image::ImageError },
    #[error("failed to create enrollment directory {path}: {source}")]
    CreateDir { path: PathBuf, source: std::io::Error },
}

/// Lower-case with spaces replaced by underscores.
pub fn normalize_name(raw: &str) -> String {
    raw.trim().to_lowercase().replace(' ', "_")
}

/// Save an uploaded image as `<normalized name>.jpg` in `dir`, replacing any
/// earlier enrollment under the same name.
///
/// Faces are not counted here; an image without a usable face shows up
/// only when the gallery is next loaded.
pub fn enroll_image(dir: &Path, name: &str, image_bytes: &[u8]) -> Result<PathBuf, EnrollError> {
    let name = normalize_name(name);
    if name.is_empty() {
        return Err(EnrollError::MissingName);
    }
    if image_bytes.is_empty() {
        return Err(EnrollError::MissingImage);
    }

    let image = image::load_from_memory(image_bytes).map_err(EnrollError::Decode)?;
    std::fs::create_dir_all(dir).map_err(|source| EnrollError::CreateDir { path: dir.to_path_buf(), source })?;

    let path = dir.join(format!("{name}.jpg"));
    image
        .to_rgb8()
        .save_with_format(&path, ImageFormat::Jpeg)
        .map_err(|source| EnrollError::Write { path: path.clone(), source })?;

    tracing::info!(name = %name, path = %path.display(), "face enrolled");
    Ok(path)
}
