//! Filing uploaded photos under the identities found in them.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::quality::QualityMetrics;

/// How one face in a photo was resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FaceAssignment {
    /// Joined an existing identity. `distance` is the deciding strategy's
    /// distance, which for a landmark decision includes the geometry term.
    Matched { identity_id: String, distance: f32 },
    /// Started a new identity.
    Created { identity_id: String },
    /// Too poor to learn from; the face is not filed.
    Rejected { quality: QualityMetrics },
}

impl FaceAssignment {
    pub fn identity_id(&self) -> Option<&str> {
        match self {
            FaceAssignment::Matched { identity_id, .. } | FaceAssignment::Created { identity_id } => {
                Some(identity_id.as_str())
            }
            FaceAssignment::Rejected { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhotoKind {
    /// No face could be filed.
    NoFaces,
    /// Exactly one distinct identity.
    Individual,
    /// Two or more distinct identities.
    Group,
}

/// Result of learning every face in one photo, in detection order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoAssignment {
    pub photo: PathBuf,
    pub faces: Vec<FaceAssignment>,
    pub kind: PhotoKind,
}

impl PhotoAssignment {
    pub fn new(photo: impl Into<PathBuf>, faces: Vec<FaceAssignment>) -> Self {
        let distinct: BTreeSet<&str> = faces.iter().filter_map(FaceAssignment::identity_id).collect();
        let kind = match distinct.len() {
            0 => PhotoKind::NoFaces,
            1 => PhotoKind::Individual,
            _ => PhotoKind::Group,
        };
        Self {
            photo: photo.into(),
            faces,
            kind,
        }
    }

    /// Distinct identities present in the photo, sorted.
    pub fn identities(&self) -> BTreeSet<&str> {
        self.faces.iter().filter_map(FaceAssignment::identity_id).collect()
    }
}

/// Identity id to the photos it appears in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhotoIndex {
    photos: BTreeMap<String, BTreeSet<PathBuf>>,
}

impl PhotoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// File `assignment.photo` under every identity found in it.
    pub fn file(&mut self, assignment: &PhotoAssignment) {
        for id in assignment.identities() {
            self.photos
                .entry(id.to_string())
                .or_default()
                .insert(assignment.photo.clone());
        }
    }

    pub fn photos_for(&self, identity_id: &str) -> impl Iterator<Item = &Path> {
        self.photos
            .get(identity_id)
            .into_iter()
            .flat_map(|set| set.iter().map(PathBuf::as_path))
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.photos.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.photos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.photos.is_empty()
    }
}
