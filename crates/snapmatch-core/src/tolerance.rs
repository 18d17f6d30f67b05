//! Effective similarity threshold per operation mode and face quality.

use serde::{Deserialize, Serialize};

use crate::config::MatchingConfig;
use crate::quality::QualityMetrics;

/// Which workflow a match decision serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Grouping faces from uploaded photos into identities (strict).
    Learning,
    /// Matching a user's live scan against known identities (lenient).
    Recognition,
}

/// Tighten `base` as quality confidence drops.
///
/// The factor runs linearly from 1.0 at full confidence to 0.5 at zero. The
/// result never exceeds `base` and never drops below `floor` (or below `base`
/// itself when `base` is already under the floor).
pub fn adaptive_tolerance(base: f32, confidence: f32, floor: f32) -> f32 {
    let confidence = if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let lower = floor.min(base);
    (base * (0.5 + 0.5 * confidence)).clamp(lower, base)
}

/// Computes the tolerance each match is made against.
#[derive(Debug, Clone)]
pub struct TolerancePolicy {
    learning: f32,
    recognition: f32,
    floor: f32,
    adaptive: bool,
}

impl TolerancePolicy {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            learning: config.learning_tolerance,
            recognition: config.recognition_tolerance,
            floor: config.tolerance_floor,
            adaptive: config.adaptive_tolerance_enabled,
        }
    }

    pub fn base(&self, mode: Mode) -> f32 {
        match mode {
            Mode::Learning => self.learning,
            Mode::Recognition => self.recognition,
        }
    }

    /// Tolerance for `mode`, tightened by `quality` when adaptive tolerance is on.
    pub fn effective_tolerance(&self, mode: Mode, quality: Option<&QualityMetrics>) -> f32 {
        let base = self.base(mode);
        match quality {
            Some(q) if self.adaptive => adaptive_tolerance(base, q.confidence, self.floor),
            _ => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quality(confidence: f32) -> QualityMetrics {
        QualityMetrics {
            width: 200,
            height: 200,
            face_area: 40_000,
            brightness_score: 1.0,
            blur_score: 1.0,
            confidence,
            acceptable: true,
        }
    }

    #[test]
    fn test_full_confidence_keeps_base() {
        assert_eq!(adaptive_tolerance(0.5, 1.0, 0.2), 0.5);
    }

    #[test]
    fn test_monotone_non_increasing_as_confidence_drops() {
        for base in [0.3f32, 0.45, 0.54, 0.9] {
            for floor in [0.0f32, 0.1, 0.25] {
                let mut previous = adaptive_tolerance(base, 1.0, floor);
                for step in (0..=100).rev() {
                    let t = adaptive_tolerance(base, step as f32 / 100.0, floor);
                    assert!(t <= previous + f32::EPSILON, "base {base} floor {floor} step {step}");
                    assert!(t <= base);
                    assert!(t >= floor.min(base));
                    previous = t;
                }
            }
        }
    }

    #[test]
    fn test_floor_bounds_result() {
        assert_eq!(adaptive_tolerance(0.45, 0.0, 0.3), 0.3);
        assert!((adaptive_tolerance(0.45, 0.0, 0.1) - 0.225).abs() < 1e-6);
    }

    #[test]
    fn test_base_below_floor_returns_base() {
        assert_eq!(adaptive_tolerance(0.2, 0.0, 0.3), 0.2);
    }

    #[test]
    fn test_non_finite_confidence_is_strictest() {
        assert_eq!(adaptive_tolerance(0.5, f32::NAN, 0.0), 0.25);
    }

    #[test]
    fn test_policy_disabled_returns_base() {
        let config = MatchingConfig {
            adaptive_tolerance_enabled: false,
            ..MatchingConfig::default()
        };
        let policy = TolerancePolicy::new(&config);
        assert_eq!(policy.effective_tolerance(Mode::Learning, Some(&quality(0.1))), 0.45);
        assert_eq!(policy.effective_tolerance(Mode::Recognition, Some(&quality(0.1))), 0.54);
    }

    #[test]
    fn test_policy_without_quality_returns_base() {
        let policy = TolerancePolicy::new(&MatchingConfig::default());
        assert_eq!(policy.effective_tolerance(Mode::Recognition, None), 0.54);
    }

    #[test]
    fn test_policy_learning_stricter_than_recognition() {
        let policy = TolerancePolicy::new(&MatchingConfig::default());
        for c in [0.0f32, 0.3, 0.7, 1.0] {
            let q = quality(c);
            assert!(
                policy.effective_tolerance(Mode::Learning, Some(&q))
                    <= policy.effective_tolerance(Mode::Recognition, Some(&q))
            );
        }
    }
}
