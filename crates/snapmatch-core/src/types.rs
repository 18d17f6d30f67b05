use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::quality::QualityMetrics;
use crate::strategy::StrategyKind;

/// Structurally invalid input handed to the engine by a calling workflow.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("no face detected in scan")]
    NoFace,
    #[error("expected a single face in scan, found {0}")]
    MultipleFaces(usize),
    #[error("embedding has no values")]
    EmptyEmbedding,
    #[error("embedding contains non-finite values")]
    NonFiniteEmbedding,
}

/// Bounding box for a detected face, with optional facial landmarks.
///
/// Coordinates are pixels in the image the detector was run on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default = "full_confidence")]
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    #[serde(default)]
    pub landmarks: Option<[(f32, f32); 5]>,
}

fn full_confidence() -> f32 {
    1.0
}

impl BoundingBox {
    /// Round to whole pixels and clip against an image of the given size.
    ///
    /// Returns `(left, top, width, height)`, or `None` when nothing of the box
    /// survives clipping or its coordinates are not finite.
    pub fn pixel_rect(&self, image_width: u32, image_height: u32) -> Option<(u32, u32, u32, u32)> {
        let coords = [self.x, self.y, self.width, self.height];
        if coords.iter().any(|v| !v.is_finite()) || self.width <= 0.0 || self.height <= 0.0 {
            return None;
        }

        let left = self.x.round().clamp(0.0, image_width as f32) as u32;
        let top = self.y.round().clamp(0.0, image_height as f32) as u32;
        let right = (self.x + self.width).round().clamp(0.0, image_width as f32) as u32;
        let bottom = (self.y + self.height).round().clamp(0.0, image_height as f32) as u32;

        if right <= left || bottom <= top {
            return None;
        }
        Some((left, top, right - left, bottom - top))
    }
}

/// Face embedding vector produced by the external encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding, when the encoder reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Reject embeddings no strategy can compare meaningfully.
    pub fn validate(&self) -> Result<(), InputError> {
        if self.values.is_empty() {
            return Err(InputError::EmptyEmbedding);
        }
        if self.values.iter().any(|v| !v.is_finite()) {
            return Err(InputError::NonFiniteEmbedding);
        }
        Ok(())
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

/// Geometric face descriptor built from the five detector landmarks.
///
/// Each value is a pairwise landmark distance divided by the inter-ocular
/// distance, so the signature is invariant to translation and scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSignature(pub Vec<f32>);

impl LandmarkSignature {
    pub fn from_landmarks(points: &[(f32, f32); 5]) -> Option<Self> {
        let dist = |a: (f32, f32), b: (f32, f32)| ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt();

        let interocular = dist(points[0], points[1]);
        if !interocular.is_finite() || interocular < f32::EPSILON {
            return None;
        }

        let mut ratios = Vec::with_capacity(9);
        for i in 0..5 {
            for j in (i + 1)..5 {
                if (i, j) == (0, 1) {
                    continue;
                }
                ratios.push(dist(points[i], points[j]) / interocular);
            }
        }
        if ratios.iter().any(|r| !r.is_finite()) {
            return None;
        }
        Some(Self(ratios))
    }

    /// Mean absolute difference between two signatures.
    pub fn distance(&self, other: &LandmarkSignature) -> f32 {
        let n = self.0.len().min(other.0.len());
        if n == 0 {
            return 0.0;
        }
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).abs())
            .sum::<f32>()
            / n as f32
    }
}

/// One face as reported by the external detector/encoder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceDetection {
    pub bbox: BoundingBox,
    pub embedding: Embedding,
}

impl FaceDetection {
    pub fn landmark_signature(&self) -> Option<LandmarkSignature> {
        self.bbox
            .landmarks
            .as_ref()
            .and_then(LandmarkSignature::from_landmarks)
    }
}

/// Detector output for one photo. Zero faces is a valid result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoDetections {
    pub image: PathBuf,
    #[serde(default)]
    pub faces: Vec<FaceDetection>,
}

/// What a matching strategy compares against the gallery.
#[derive(Debug, Clone)]
pub struct Probe {
    pub embedding: Embedding,
    pub landmarks: Option<LandmarkSignature>,
    pub quality: Option<QualityMetrics>,
}

impl Probe {
    pub fn new(embedding: Embedding) -> Self {
        Self {
            embedding,
            landmarks: None,
            quality: None,
        }
    }

    pub fn quality_confidence(&self) -> Option<f32> {
        self.quality.as_ref().map(|q| q.confidence)
    }
}

/// Outcome class of a match decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Matched,
    NoMatch,
    /// The face was not usable; the caller should ask for a rescan.
    LowQuality,
}

/// A runner-up identity kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub identity_id: String,
    pub distance: f32,
}

/// Result of matching a probe against the identity store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub identity_id: Option<String>,
    pub status: MatchStatus,
    /// Best distance seen, or `None` when nothing was compared.
    pub distance: Option<f32>,
    pub confidence: f32,
    pub strategy: StrategyKind,
    /// Tolerance the decision was made against.
    pub threshold: f32,
    pub quality: Option<QualityMetrics>,
    pub candidates: Vec<Candidate>,
}

impl MatchResult {
    pub fn no_match(strategy: StrategyKind, threshold: f32) -> Self {
        Self {
            identity_id: None,
            status: MatchStatus::NoMatch,
            distance: None,
            confidence: 0.0,
            strategy,
            threshold,
            quality: None,
            candidates: Vec::new(),
        }
    }

    pub fn is_match(&self) -> bool {
        self.status == MatchStatus::Matched
    }
}
