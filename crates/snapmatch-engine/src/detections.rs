//! Reading detector output files.

use std::path::Path;

use serde::Deserialize;
use snapmatch_core::PhotoDetections;

use crate::engine::EngineError;

#[derive(Deserialize)]
#[serde(untagged)]
enum DetectionsFile {
    Many(Vec<PhotoDetections>),
    One(PhotoDetections),
}

/// Load one photo's detections, or a list of them, from a JSON file.
///
/// Relative image paths are resolved against the file's directory.
pub fn load_detections(path: &Path) -> Result<Vec<PhotoDetections>, EngineError> {
    let detections_err = |message: String| EngineError::Detections {
        path: path.to_path_buf(),
        message,
    };

    let text = std::fs::read_to_string(path).map_err(|e| detections_err(e.to_string()))?;
    let parsed: DetectionsFile =
        serde_json::from_str(&text).map_err(|e| detections_err(e.to_string()))?;
    let mut photos = match parsed {
        DetectionsFile::Many(photos) => photos,
        DetectionsFile::One(photo) => vec![photo],
    };

    if let Some(base) = path.parent() {
        for photo in &mut photos {
            if photo.image.is_relative() {
                photo.image = base.join(&photo.image);
            }
        }
    }
    tracing::debug!(path = %path.display(), photos = photos.len(), "detections loaded");
    Ok(photos)
}
