//! Face quality assessment.
//!
//! Scores a detected face region for size, exposure and sharpness. Pure and
//! deterministic: the same image and region always produce the same metrics.

use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};

use crate::config::MatchingConfig;
use crate::types::BoundingBox;

// Composite weights: sharpness matters most, then exposure, then size.
const BLUR_WEIGHT: f32 = 0.40;
const BRIGHTNESS_WEIGHT: f32 = 0.35;
const SIZE_WEIGHT: f32 = 0.25;

/// Face area (pixels) at which the size score saturates (200x200).
const FULL_SIZE_AREA: f32 = 40_000.0;
/// Laplacian variance at which the blur score saturates.
const SHARP_LAPLACIAN_VARIANCE: f64 = 500.0;

/// Confidence at or above which a face counts as high quality.
pub const HIGH_QUALITY_CONFIDENCE: f32 = 0.8;
/// Confidence at or above which a face counts as medium quality.
pub const MEDIUM_QUALITY_CONFIDENCE: f32 = 0.6;

/// Quality indicators for one detected face. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub width: u32,
    pub height: u32,
    pub face_area: u64,
    /// 1.0 for a well-exposed face (mean luminance at mid-range).
    pub brightness_score: f32,
    /// Higher is sharper.
    pub blur_score: f32,
    /// Weighted composite of size, brightness and blur, in [0, 1].
    pub confidence: f32,
    pub acceptable: bool,
}

impl QualityMetrics {
    /// The result for a region that cannot be assessed at all.
    pub fn unusable() -> Self {
        Self {
            width: 0,
            height: 0,
            face_area: 0,
            brightness_score: 0.0,
            blur_score: 0.0,
            confidence: 0.0,
            acceptable: false,
        }
    }

    pub fn band(&self) -> QualityBand {
        QualityBand::from_confidence(self.confidence)
    }
}

/// Coarse quality tiers keyed off composite confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityBand {
    High,
    Medium,
    Low,
}

impl QualityBand {
    pub fn from_confidence(confidence: f32) -> Self {
        if confidence >= HIGH_QUALITY_CONFIDENCE {
            QualityBand::High
        } else if confidence >= MEDIUM_QUALITY_CONFIDENCE {
            QualityBand::Medium
        } else {
            QualityBand::Low
        }
    }
}

/// Scores face regions against the configured minimums.
#[derive(Debug, Clone)]
pub struct QualityAssessor {
    min_face_size: u32,
    min_confidence: f32,
}

impl QualityAssessor {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            min_face_size: config.min_face_size,
            min_confidence: config.min_confidence,
        }
    }

    /// Assess the face at `region` within `image`.
    ///
    /// A region that lies outside the image or has no area yields
    /// [`QualityMetrics::unusable`].
    pub fn assess(&self, image: &DynamicImage, region: &BoundingBox) -> QualityMetrics {
        let Some((left, top, width, height)) = region.pixel_rect(image.width(), image.height())
        else {
            return QualityMetrics::unusable();
        };

        let luma = region_luminance(image, left, top, width, height);
        let brightness_score = brightness_score(&luma);
        let blur_score = blur_score(&luma, width as usize, height as usize);

        let face_area = width as u64 * height as u64;
        let size_score = (face_area as f32 / FULL_SIZE_AREA).min(1.0);
        let confidence = (BLUR_WEIGHT * blur_score
            + BRIGHTNESS_WEIGHT * brightness_score
            + SIZE_WEIGHT * size_score)
            .clamp(0.0, 1.0);

        let acceptable = width >= self.min_face_size
            && height >= self.min_face_size
            && confidence >= self.min_confidence;

        QualityMetrics {
            width,
            height,
            face_area,
            brightness_score,
            blur_score,
            confidence,
            acceptable,
        }
    }
}

/// Row-major luminance of the region, in 0..=255.
fn region_luminance(image: &DynamicImage, left: u32, top: u32, width: u32, height: u32) -> Vec<f32> {
    let mut luma = Vec::with_capacity(width as usize * height as usize);
    for y in top..top + height {
        for x in left..left + width {
            let [r, g, b, _] = image.get_pixel(x, y).0;
            luma.push(0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32);
        }
    }
    luma
}

/// 1.0 at mid-grey, falling quadratically to 0.0 at black or white.
fn brightness_score(luma: &[f32]) -> f32 {
    if luma.is_empty() {
        return 0.0;
    }
    let mean = luma.iter().map(|&v| v as f64).sum::<f64>() / luma.len() as f64;
    let normalized = (mean / 255.0) as f32;
    (1.0 - 4.0 * (normalized - 0.5).powi(2)).clamp(0.0, 1.0)
}

/// Variance of the 4-neighbour Laplacian (edge-replicated), scaled to [0, 1].
fn blur_score(luma: &[f32], width: usize, height: usize) -> f32 {
    if luma.is_empty() || width == 0 || height == 0 {
        return 0.0;
    }
    let at = |x: usize, y: usize| luma[y * width + x] as f64;

    let n = (width * height) as f64;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    for y in 0..height {
        let up = y.saturating_sub(1);
        let down = (y + 1).min(height - 1);
        for x in 0..width {
            let left = x.saturating_sub(1);
            let right = (x + 1).min(width - 1);
            let lap = at(right, y) + at(left, y) + at(x, down) + at(x, up) - 4.0 * at(x, y);
            sum += lap;
            sum_sq += lap * lap;
        }
    }
    let mean = sum / n;
    let variance = (sum_sq / n - mean * mean).max(0.0);
    (variance / SHARP_LAPLACIAN_VARIANCE).min(1.0) as f32
}
