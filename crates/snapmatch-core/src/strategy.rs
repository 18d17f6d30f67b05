//! Matching strategies and the quality-driven strategy decision table.
//!
//! Every strategy scans the whole gallery (no early exit) and ranks
//! identities by their closest reference.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{HybridTuning, MatchingConfig};
use crate::quality::{QualityBand, QualityMetrics};
use crate::store::{PersonIdentity, Reference};
use crate::types::{Candidate, MatchResult, MatchStatus, Probe};

/// Distance weight used by the hybrid strategy when probe quality is unknown.
const UNKNOWN_QUALITY_DISTANCE_WEIGHT: f32 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Nearest identity by embedding distance.
    Distance,
    /// Embedding distance refined by facial geometry.
    #[serde(rename = "landmarks", alias = "landmark")]
    Landmark,
    /// Distance, with a landmark second opinion for ambiguous matches.
    Hybrid,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Distance => "distance",
            StrategyKind::Landmark => "landmarks",
            StrategyKind::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("unknown matching strategy: {0}")]
pub struct ParseStrategyError(String);

impl FromStr for StrategyKind {
    type Err = ParseStrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "distance" => Ok(StrategyKind::Distance),
            "landmark" | "landmarks" => Ok(StrategyKind::Landmark),
            "hybrid" => Ok(StrategyKind::Hybrid),
            _ => Err(ParseStrategyError(s.to_string())),
        }
    }
}

/// Strategy for comparing a probe against a gallery of identities.
pub trait Matcher {
    fn kind(&self) -> StrategyKind;

    fn compare(&self, probe: &Probe, gallery: &[PersonIdentity], tolerance: f32) -> MatchResult;
}

/// Map a distance to a [0, 1] confidence relative to the threshold.
pub fn distance_confidence(distance: f32, threshold: f32) -> f32 {
    if threshold <= 0.0 {
        return if distance <= 0.0 { 1.0 } else { 0.0 };
    }
    (1.0 - distance / threshold).clamp(0.0, 1.0)
}

/// Shared ranking used by every strategy.
///
/// An identity's distance is the minimum over its references. Among the
/// identities within `tie_epsilon` of the overall minimum, the one with more
/// references wins, then the earlier one in store order.
struct Ranker {
    tie_epsilon: f32,
    near_miss_factor: f32,
}

impl Ranker {
    fn rank<F>(
        &self,
        kind: StrategyKind,
        probe: &Probe,
        gallery: &[PersonIdentity],
        threshold: f32,
        distance: F,
    ) -> MatchResult
    where
        F: Fn(&Reference) -> f32,
    {
        let scores: Vec<Option<f32>> = gallery
            .iter()
            .map(|identity| {
                identity
                    .references
                    .iter()
                    .map(&distance)
                    .filter(|d| d.is_finite())
                    .min_by(f32::total_cmp)
            })
            .collect();

        let minimum = scores.iter().flatten().copied().min_by(f32::total_cmp);
        let best = minimum.and_then(|min_d| {
            let mut best: Option<(usize, f32)> = None;
            for (i, score) in scores.iter().enumerate() {
                let Some(d) = *score else { continue };
                if d > min_d + self.tie_epsilon {
                    continue;
                }
                let richer = match best {
                    None => true,
                    Some((j, _)) => gallery[i].reference_count() > gallery[j].reference_count(),
                };
                if richer {
                    best = Some((i, d));
                }
            }
            best
        });

        let Some((best_idx, best_d)) = best else {
            return MatchResult {
                quality: probe.quality.clone(),
                ..MatchResult::no_match(kind, threshold)
            };
        };

        let matched = best_d <= threshold;
        let reach = threshold * self.near_miss_factor;
        let mut candidates: Vec<Candidate> = scores
            .iter()
            .enumerate()
            .filter(|&(i, _)| !(matched && i == best_idx))
            .filter_map(|(i, score)| match *score {
                Some(d) if d <= reach => Some(Candidate {
                    identity_id: gallery[i].id.clone(),
                    distance: d,
                }),
                _ => None,
            })
            .collect();
        candidates.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        MatchResult {
            identity_id: matched.then(|| gallery[best_idx].id.clone()),
            status: if matched {
                MatchStatus::Matched
            } else {
                MatchStatus::NoMatch
            },
            distance: Some(best_d),
            confidence: distance_confidence(best_d, threshold),
            strategy: kind,
            threshold,
            quality: probe.quality.clone(),
            candidates,
        }
    }
}

/// Nearest identity by Euclidean embedding distance.
pub struct DistanceMatcher {
    ranker: Ranker,
}

impl DistanceMatcher {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            ranker: Ranker {
                tie_epsilon: config.tie_epsilon,
                near_miss_factor: config.near_miss_factor,
            },
        }
    }
}

impl Matcher for DistanceMatcher {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Distance
    }

    fn compare(&self, probe: &Probe, gallery: &[PersonIdentity], tolerance: f32) -> MatchResult {
        self.ranker.rank(self.kind(), probe, gallery, tolerance, |reference| {
            probe.embedding.euclidean_distance(&reference.embedding)
        })
    }
}

/// Embedding distance plus a weighted landmark-geometry term.
///
/// References or probes without a landmark signature fall back to the plain
/// embedding distance. The threshold is widened by `tolerance_factor` to
/// absorb the extra term.
pub struct LandmarkMatcher {
    ranker: Ranker,
    tolerance_factor: f32,
    geometry_weight: f32,
}

impl LandmarkMatcher {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            ranker: Ranker {
                tie_epsilon: config.tie_epsilon,
                near_miss_factor: config.near_miss_factor,
            },
            tolerance_factor: config.landmark.tolerance_factor,
            geometry_weight: config.landmark.geometry_weight,
        }
    }
}

impl Matcher for LandmarkMatcher {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Landmark
    }

    fn compare(&self, probe: &Probe, gallery: &[PersonIdentity], tolerance: f32) -> MatchResult {
        let threshold = tolerance * self.tolerance_factor;
        self.ranker.rank(self.kind(), probe, gallery, threshold, |reference| {
            let embedding = probe.embedding.euclidean_distance(&reference.embedding);
            match (&probe.landmarks, &reference.landmarks) {
                (Some(p), Some(r)) => embedding + self.geometry_weight * p.distance(r),
                _ => embedding,
            }
        })
    }
}

/// Distance matching with a landmark second opinion.
///
/// The landmark strategy only runs when the distance match is ambiguous
/// (a runner-up is close behind) or sits near the threshold.
///
/// When the two disagree and the landmark result wins, the returned
/// `distance` and `threshold` are the landmark strategy's: the distance
/// includes the weighted geometry term and the threshold is the widened
/// landmark tolerance. Neither is an embedding-space number in that case.
pub struct HybridMatcher {
    distance: DistanceMatcher,
    landmark: LandmarkMatcher,
    tuning: HybridTuning,
}

impl HybridMatcher {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            distance: DistanceMatcher::new(config),
            landmark: LandmarkMatcher::new(config),
            tuning: config.hybrid.clone(),
        }
    }

    fn distance_weight(&self, probe: &Probe) -> f32 {
        match probe.quality_confidence() {
            Some(c) if c.is_finite() => {
                self.tuning.distance_weight_base + self.tuning.distance_weight_slope * c.clamp(0.0, 1.0)
            }
            _ => UNKNOWN_QUALITY_DISTANCE_WEIGHT,
        }
    }

    fn needs_second_opinion(&self, result: &MatchResult, tolerance: f32) -> bool {
        let Some(best) = result.distance else {
            return false;
        };
        if !result.is_match() {
            return false;
        }
        let ambiguous = result
            .candidates
            .first()
            .is_some_and(|runner_up| runner_up.distance - best < self.tuning.ambiguity_band * tolerance);
        let near_threshold = best > (1.0 - self.tuning.near_threshold_margin) * tolerance;
        ambiguous || near_threshold
    }
}

impl Matcher for HybridMatcher {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Hybrid
    }

    fn compare(&self, probe: &Probe, gallery: &[PersonIdentity], tolerance: f32) -> MatchResult {
        let mut primary = self.distance.compare(probe, gallery, tolerance);
        primary.strategy = StrategyKind::Hybrid;
        if !self.needs_second_opinion(&primary, tolerance) {
            return primary;
        }

        let secondary = self.landmark.compare(probe, gallery, tolerance);
        let w = self.distance_weight(probe);

        if secondary.is_match() && secondary.identity_id == primary.identity_id {
            let blended = w * primary.confidence + (1.0 - w) * secondary.confidence;
            primary.confidence = (blended * self.tuning.agreement_boost).min(1.0);
            tracing::debug!(
                identity = ?primary.identity_id,
                confidence = primary.confidence,
                "hybrid strategies agree"
            );
            return primary;
        }

        let distance_score = w * primary.confidence;
        let landmark_score = if secondary.is_match() {
            (1.0 - w) * secondary.confidence
        } else {
            0.0
        };
        tracing::debug!(
            distance_identity = ?primary.identity_id,
            landmark_identity = ?secondary.identity_id,
            distance_score,
            landmark_score,
            "hybrid strategies disagree"
        );

        let mut winner = if landmark_score > distance_score {
            secondary
        } else {
            primary
        };
        winner.strategy = StrategyKind::Hybrid;
        winner.confidence *= self.tuning.disagreement_penalty;
        winner
    }
}

/// A configured strategy of any kind.
pub enum Strategy {
    Distance(DistanceMatcher),
    Landmark(LandmarkMatcher),
    Hybrid(HybridMatcher),
}

impl Strategy {
    pub fn build(kind: StrategyKind, config: &MatchingConfig) -> Self {
        match kind {
            StrategyKind::Distance => Strategy::Distance(DistanceMatcher::new(config)),
            StrategyKind::Landmark => Strategy::Landmark(LandmarkMatcher::new(config)),
            StrategyKind::Hybrid => Strategy::Hybrid(HybridMatcher::new(config)),
        }
    }
}

impl Matcher for Strategy {
    fn kind(&self) -> StrategyKind {
        match self {
            Strategy::Distance(m) => m.kind(),
            Strategy::Landmark(m) => m.kind(),
            Strategy::Hybrid(m) => m.kind(),
        }
    }

    fn compare(&self, probe: &Probe, gallery: &[PersonIdentity], tolerance: f32) -> MatchResult {
        match self {
            Strategy::Distance(m) => m.compare(probe, gallery, tolerance),
            Strategy::Landmark(m) => m.compare(probe, gallery, tolerance),
            Strategy::Hybrid(m) => m.compare(probe, gallery, tolerance),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum BandChoice {
    Primary,
    Fixed(StrategyKind),
}

/// Strategy per quality band when fallback is enabled.
const DECISION_TABLE: [(QualityBand, BandChoice); 3] = [
    (QualityBand::High, BandChoice::Primary),
    (QualityBand::Medium, BandChoice::Fixed(StrategyKind::Hybrid)),
    (QualityBand::Low, BandChoice::Fixed(StrategyKind::Hybrid)),
];

/// Pick the strategy for a face of the given quality.
pub fn select_strategy(config: &MatchingConfig, quality: Option<&QualityMetrics>) -> StrategyKind {
    let primary = config.primary_strategy;
    if !config.enable_fallback {
        return primary;
    }
    let Some(quality) = quality else {
        return primary;
    };

    let band = quality.band();
    DECISION_TABLE
        .iter()
        .find(|(b, _)| *b == band)
        .map(|(_, choice)| match choice {
            BandChoice::Primary => primary,
            BandChoice::Fixed(kind) => *kind,
        })
        .unwrap_or(primary)
}
