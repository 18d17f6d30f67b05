//! Matching configuration.
//!
//! Built in layers: compiled defaults, then an optional TOML file, then
//! `SNAPMATCH_*` environment variables. Every key is parsed on its own; a
//! bad value is logged and that key falls back to its documented default,
//! so loading never fails.

use std::ops::RangeInclusive;
use std::path::Path;

use serde::Serialize;

use crate::strategy::StrategyKind;
use crate::tolerance::Mode;

/// Prefix for environment overrides, e.g. `SNAPMATCH_LEARNING_TOLERANCE`.
pub const ENV_PREFIX: &str = "SNAPMATCH_";

pub const DEFAULT_LEARNING_TOLERANCE: f32 = 0.45;
pub const DEFAULT_RECOGNITION_TOLERANCE: f32 = 0.54;
pub const DEFAULT_TOLERANCE_FLOOR: f32 = 0.25;
pub const DEFAULT_MIN_FACE_SIZE: u32 = 80;
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.7;
pub const DEFAULT_TARGET_IMAGE_SIZE: (u32, u32) = (800, 800);
pub const DEFAULT_TIE_EPSILON: f32 = 1e-4;
pub const DEFAULT_NEAR_MISS_FACTOR: f32 = 1.2;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Every option name accepted from a file or the environment.
pub const OPTION_KEYS: &[&str] = &[
    "learning_tolerance",
    "recognition_tolerance",
    "adaptive_tolerance_enabled",
    "tolerance_floor",
    "min_face_size",
    "min_confidence",
    "normalize_brightness",
    "target_image_size",
    "primary_strategy",
    "enable_fallback",
    "tie_epsilon",
    "near_miss_factor",
    "ambiguity_band",
    "near_threshold_margin",
    "hybrid_distance_weight_base",
    "hybrid_distance_weight_slope",
    "agreement_boost",
    "disagreement_penalty",
    "landmark_tolerance_factor",
    "landmark_geometry_weight",
    "log_level",
    "log_match_details",
];

/// Knobs for the hybrid strategy's disambiguation step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HybridTuning {
    /// Runner-up within this fraction of the tolerance of the best match counts as ambiguous.
    pub ambiguity_band: f32,
    /// Best match within this fraction of the tolerance from the threshold counts as ambiguous.
    pub near_threshold_margin: f32,
    pub distance_weight_base: f32,
    /// Extra distance weight per unit of quality confidence.
    pub distance_weight_slope: f32,
    pub agreement_boost: f32,
    pub disagreement_penalty: f32,
}

impl Default for HybridTuning {
    fn default() -> Self {
        Self {
            ambiguity_band: 0.1,
            near_threshold_margin: 0.2,
            distance_weight_base: 0.5,
            distance_weight_slope: 0.4,
            agreement_boost: 1.2,
            disagreement_penalty: 0.8,
        }
    }
}

/// Knobs for the landmark strategy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LandmarkTuning {
    /// Multiplier applied to the tolerance when matching by landmarks.
    pub tolerance_factor: f32,
    /// Weight of the landmark-geometry term added to the embedding distance.
    pub geometry_weight: f32,
}

impl Default for LandmarkTuning {
    fn default() -> Self {
        Self {
            tolerance_factor: 1.1,
            geometry_weight: 0.5,
        }
    }
}

/// Process-wide matching configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchingConfig {
    /// Distance threshold when grouping faces into identities.
    pub learning_tolerance: f32,
    /// Distance threshold when matching a user's scan. Never below `learning_tolerance`.
    pub recognition_tolerance: f32,
    pub adaptive_tolerance_enabled: bool,
    /// Lowest tolerance adaptive tightening may produce.
    pub tolerance_floor: f32,
    /// Minimum face width and height in pixels.
    pub min_face_size: u32,
    pub min_confidence: f32,
    pub normalize_brightness: bool,
    pub target_image_size: (u32, u32),
    pub primary_strategy: StrategyKind,
    pub enable_fallback: bool,
    pub tie_epsilon: f32,
    /// Runner-ups are reported up to `tolerance * near_miss_factor`.
    pub near_miss_factor: f32,
    pub hybrid: HybridTuning,
    pub landmark: LandmarkTuning,
    pub log_level: String,
    pub log_match_details: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            learning_tolerance: DEFAULT_LEARNING_TOLERANCE,
            recognition_tolerance: DEFAULT_RECOGNITION_TOLERANCE,
            adaptive_tolerance_enabled: true,
            tolerance_floor: DEFAULT_TOLERANCE_FLOOR,
            min_face_size: DEFAULT_MIN_FACE_SIZE,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            normalize_brightness: true,
            target_image_size: DEFAULT_TARGET_IMAGE_SIZE,
            primary_strategy: StrategyKind::Distance,
            enable_fallback: true,
            tie_epsilon: DEFAULT_TIE_EPSILON,
            near_miss_factor: DEFAULT_NEAR_MISS_FACTOR,
            hybrid: HybridTuning::default(),
            landmark: LandmarkTuning::default(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            log_match_details: true,
        }
    }
}

/// A single raw option value from one of the layers.
enum Raw<'a> {
    Toml(&'a toml::Value),
    Env(&'a str),
}

enum SetError {
    Unknown,
    Invalid(String),
}

impl Raw<'_> {
    fn describe(&self) -> String {
        match self {
            Raw::Toml(v) => v.to_string(),
            Raw::Env(s) => format!("'{s}'"),
        }
    }

    fn float(&self) -> Option<f32> {
        let value: Option<f32> = match self {
            Raw::Toml(v) => v
                .as_float()
                .or_else(|| v.as_integer().map(|i| i as f64))
                .map(|f| f as f32),
            Raw::Env(s) => s.trim().parse().ok(),
        };
        value.filter(|f| f.is_finite())
    }

    fn int(&self) -> Option<i64> {
        match self {
            Raw::Toml(v) => v.as_integer(),
            Raw::Env(s) => s.trim().parse().ok(),
        }
    }

    fn bool(&self) -> Option<bool> {
        match self {
            Raw::Toml(v) => v.as_bool(),
            Raw::Env(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(true),
                "false" | "0" | "no" | "off" => Some(false),
                _ => None,
            },
        }
    }

    fn string(&self) -> Option<String> {
        match self {
            Raw::Toml(v) => v.as_str().map(str::to_string),
            Raw::Env(s) => Some(s.trim().to_string()),
        }
    }

    fn size(&self) -> Option<(i64, i64)> {
        if let Raw::Toml(toml::Value::Array(items)) = self {
            return match items.as_slice() {
                [w, h] => Some((w.as_integer()?, h.as_integer()?)),
                _ => None,
            };
        }
        parse_size(&self.string()?)
    }
}

/// Parse "800x800" or "800,800".
fn parse_size(s: &str) -> Option<(i64, i64)> {
    let normalized = s.to_ascii_lowercase().replace('x', ",");
    let mut parts = normalized.split(',').map(|p| p.trim().parse::<i64>());
    match (parts.next(), parts.next(), parts.next()) {
        (Some(Ok(w)), Some(Ok(h)), None) => Some((w, h)),
        _ => None,
    }
}

fn float_in(raw: &Raw, range: RangeInclusive<f32>) -> Result<f32, SetError> {
    match raw.float() {
        Some(v) if range.contains(&v) => Ok(v),
        Some(v) => Err(SetError::Invalid(format!(
            "{v} outside {}..={}",
            range.start(),
            range.end()
        ))),
        None => Err(SetError::Invalid(format!("expected a number, got {}", raw.describe()))),
    }
}

fn bool_of(raw: &Raw) -> Result<bool, SetError> {
    raw.bool()
        .ok_or_else(|| SetError::Invalid(format!("expected a boolean, got {}", raw.describe())))
}

fn normalize_log_level(level: &str) -> Option<&'static str> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" | "critical" => Some("error"),
        _ => None,
    }
}

impl MatchingConfig {
    /// Defaults, then `file` (if any), then the process environment.
    pub fn load(file: Option<&Path>) -> Self {
        let mut config = Self::default();
        if let Some(path) = file {
            config.apply_file(path);
        }
        config.apply_env(|key| std::env::var(key).ok());
        config.validate();
        tracing::debug!(?config, "matching configuration loaded");
        config
    }

    /// Build from TOML text alone (no environment), validating the result.
    pub fn from_toml_str(text: &str) -> Self {
        let mut config = Self::default();
        match text.parse::<toml::Table>() {
            Ok(table) => config.apply_table(&table),
            Err(e) => tracing::warn!(error = %e, "invalid configuration TOML; using defaults"),
        }
        config.validate();
        config
    }

    /// Base tolerance for an operation mode.
    pub fn base_tolerance(&self, mode: Mode) -> f32 {
        match mode {
            Mode::Learning => self.learning_tolerance,
            Mode::Recognition => self.recognition_tolerance,
        }
    }

    /// Overlay options from a TOML file. Unreadable files are skipped with a warning.
    pub fn apply_file(&mut self, path: &Path) {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read configuration file; skipping");
                return;
            }
        };
        match text.parse::<toml::Table>() {
            Ok(table) => {
                tracing::info!(path = %path.display(), "applying configuration file");
                self.apply_table(&table);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "invalid configuration file; skipping");
            }
        }
    }

    pub fn apply_table(&mut self, table: &toml::Table) {
        for (key, value) in table {
            self.apply(key, Raw::Toml(value), "file");
        }
    }

    /// Overlay `SNAPMATCH_*` values obtained through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for key in OPTION_KEYS {
            let var = format!("{ENV_PREFIX}{}", key.to_ascii_uppercase());
            if let Some(value) = lookup(&var) {
                self.apply(key, Raw::Env(&value), "env");
            }
        }
    }

    fn apply(&mut self, key: &str, raw: Raw, source: &str) {
        match self.set_option(key, &raw) {
            Ok(()) => {}
            Err(SetError::Unknown) => {
                tracing::warn!(key, source, "unrecognized configuration option ignored");
            }
            Err(SetError::Invalid(reason)) => {
                tracing::warn!(key, source, %reason, "invalid configuration value; using default");
                self.reset_option(key);
            }
        }
    }

    /// Put one known key back to its compiled default.
    fn reset_option(&mut self, key: &str) {
        let defaults = Self::default();
        match key {
            "learning_tolerance" => self.learning_tolerance = defaults.learning_tolerance,
            "recognition_tolerance" => self.recognition_tolerance = defaults.recognition_tolerance,
            "adaptive_tolerance_enabled" => {
                self.adaptive_tolerance_enabled = defaults.adaptive_tolerance_enabled
            }
            "tolerance_floor" => self.tolerance_floor = defaults.tolerance_floor,
            "min_face_size" => self.min_face_size = defaults.min_face_size,
            "min_confidence" => self.min_confidence = defaults.min_confidence,
            "normalize_brightness" => self.normalize_brightness = defaults.normalize_brightness,
            "target_image_size" => self.target_image_size = defaults.target_image_size,
            "primary_strategy" => self.primary_strategy = defaults.primary_strategy,
            "enable_fallback" => self.enable_fallback = defaults.enable_fallback,
            "tie_epsilon" => self.tie_epsilon = defaults.tie_epsilon,
            "near_miss_factor" => self.near_miss_factor = defaults.near_miss_factor,
            "ambiguity_band" => self.hybrid.ambiguity_band = defaults.hybrid.ambiguity_band,
            "near_threshold_margin" => {
                self.hybrid.near_threshold_margin = defaults.hybrid.near_threshold_margin
            }
            "hybrid_distance_weight_base" => {
                self.hybrid.distance_weight_base = defaults.hybrid.distance_weight_base
            }
            "hybrid_distance_weight_slope" => {
                self.hybrid.distance_weight_slope = defaults.hybrid.distance_weight_slope
            }
            "agreement_boost" => self.hybrid.agreement_boost = defaults.hybrid.agreement_boost,
            "disagreement_penalty" => {
                self.hybrid.disagreement_penalty = defaults.hybrid.disagreement_penalty
            }
            "landmark_tolerance_factor" => {
                self.landmark.tolerance_factor = defaults.landmark.tolerance_factor
            }
            "landmark_geometry_weight" => {
                self.landmark.geometry_weight = defaults.landmark.geometry_weight
            }
            "log_level" => self.log_level = defaults.log_level,
            "log_match_details" => self.log_match_details = defaults.log_match_details,
            _ => {}
        }
    }

    fn set_option(&mut self, key: &str, raw: &Raw) -> Result<(), SetError> {
        match key {
            "learning_tolerance" => self.learning_tolerance = float_in(raw, 0.0..=1.0)?,
            "recognition_tolerance" => self.recognition_tolerance = float_in(raw, 0.0..=1.0)?,
            "adaptive_tolerance_enabled" => self.adaptive_tolerance_enabled = bool_of(raw)?,
            "tolerance_floor" => self.tolerance_floor = float_in(raw, 0.0..=1.0)?,
            "min_face_size" => {
                self.min_face_size = match raw.int() {
                    Some(v) if (1..=u32::MAX as i64).contains(&v) => v as u32,
                    _ => {
                        return Err(SetError::Invalid(format!(
                            "expected a positive integer, got {}",
                            raw.describe()
                        )))
                    }
                }
            }
            "min_confidence" => self.min_confidence = float_in(raw, 0.0..=1.0)?,
            "normalize_brightness" => self.normalize_brightness = bool_of(raw)?,
            "target_image_size" => {
                self.target_image_size = match raw.size() {
                    Some((w, h)) if w >= 1 && h >= 1 && w <= u32::MAX as i64 && h <= u32::MAX as i64 => {
                        (w as u32, h as u32)
                    }
                    _ => {
                        return Err(SetError::Invalid(format!(
                            "expected WIDTHxHEIGHT with positive dimensions, got {}",
                            raw.describe()
                        )))
                    }
                }
            }
            "primary_strategy" => {
                self.primary_strategy = raw
                    .string()
                    .and_then(|s| s.parse().ok())
                    .ok_or_else(|| {
                        SetError::Invalid(format!(
                            "expected one of distance, landmarks, hybrid; got {}",
                            raw.describe()
                        ))
                    })?
            }
            "enable_fallback" => self.enable_fallback = bool_of(raw)?,
            "tie_epsilon" => self.tie_epsilon = float_in(raw, 0.0..=0.1)?,
            "near_miss_factor" => self.near_miss_factor = float_in(raw, 1.0..=3.0)?,
            "ambiguity_band" => self.hybrid.ambiguity_band = float_in(raw, 0.0..=1.0)?,
            "near_threshold_margin" => self.hybrid.near_threshold_margin = float_in(raw, 0.0..=1.0)?,
            "hybrid_distance_weight_base" => {
                self.hybrid.distance_weight_base = float_in(raw, 0.0..=1.0)?
            }
            "hybrid_distance_weight_slope" => {
                self.hybrid.distance_weight_slope = float_in(raw, 0.0..=1.0)?
            }
            "agreement_boost" => self.hybrid.agreement_boost = float_in(raw, 1.0..=2.0)?,
            "disagreement_penalty" => self.hybrid.disagreement_penalty = float_in(raw, 0.0..=1.0)?,
            "landmark_tolerance_factor" => self.landmark.tolerance_factor = float_in(raw, 1.0..=2.0)?,
            "landmark_geometry_weight" => self.landmark.geometry_weight = float_in(raw, 0.0..=2.0)?,
            "log_level" => {
                self.log_level = raw
                    .string()
                    .as_deref()
                    .and_then(normalize_log_level)
                    .ok_or_else(|| {
                        SetError::Invalid(format!("unknown log level {}", raw.describe()))
                    })?
                    .to_string()
            }
            "log_match_details" => self.log_match_details = bool_of(raw)?,
            _ => return Err(SetError::Unknown),
        }
        Ok(())
    }

    /// Cross-field checks that no single key can enforce on its own.
    fn validate(&mut self) {
        if self.learning_tolerance > self.recognition_tolerance {
            tracing::warn!(
                learning = self.learning_tolerance,
                recognition = self.recognition_tolerance,
                "learning tolerance exceeds recognition tolerance; resetting both to defaults"
            );
            self.learning_tolerance = DEFAULT_LEARNING_TOLERANCE;
            self.recognition_tolerance = DEFAULT_RECOGNITION_TOLERANCE;
        }

        if self.tolerance_floor > self.learning_tolerance {
            tracing::warn!(
                floor = self.tolerance_floor,
                learning = self.learning_tolerance,
                "tolerance floor exceeds learning tolerance; resetting floor to default"
            );
            self.tolerance_floor = DEFAULT_TOLERANCE_FLOOR.min(self.learning_tolerance);
        }

        let defaults = HybridTuning::default();
        if self.hybrid.distance_weight_base + self.hybrid.distance_weight_slope > 1.0 {
            tracing::warn!(
                base = self.hybrid.distance_weight_base,
                slope = self.hybrid.distance_weight_slope,
                "hybrid distance weight can exceed 1.0; resetting to defaults"
            );
            self.hybrid.distance_weight_base = defaults.distance_weight_base;
            self.hybrid.distance_weight_slope = defaults.distance_weight_slope;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = MatchingConfig::default();
        assert_eq!(c.learning_tolerance, 0.45);
        assert_eq!(c.recognition_tolerance, 0.54);
        assert_eq!(c.min_face_size, 80);
        assert_eq!(c.target_image_size, (800, 800));
        assert_eq!(c.primary_strategy, StrategyKind::Distance);
        assert!(c.learning_tolerance <= c.recognition_tolerance);
    }

    #[test]
    fn test_toml_overrides() {
        let c = MatchingConfig::from_toml_str(
            r#"
            learning_tolerance = 0.4
            recognition_tolerance = 0.6
            min_face_size = 64
            target_image_size = [640, 480]
            primary_strategy = "hybrid"
            enable_fallback = false
            ambiguity_band = 0.05
            "#,
        );
        assert_eq!(c.learning_tolerance, 0.4);
        assert_eq!(c.recognition_tolerance, 0.6);
        assert_eq!(c.min_face_size, 64);
        assert_eq!(c.target_image_size, (640, 480));
        assert_eq!(c.primary_strategy, StrategyKind::Hybrid);
        assert!(!c.enable_fallback);
        assert_eq!(c.hybrid.ambiguity_band, 0.05);
    }

    #[test]
    fn test_bad_toml_values_fall_back_per_key() {
        let c = MatchingConfig::from_toml_str(
            r#"
            learning_tolerance = "loose"
            recognition_tolerance = 7.5
            min_confidence = 0.5
            primary_strategy = "telepathy"
            mystery_option = true
            "#,
        );
        assert_eq!(c.learning_tolerance, DEFAULT_LEARNING_TOLERANCE);
        assert_eq!(c.recognition_tolerance, DEFAULT_RECOGNITION_TOLERANCE);
        assert_eq!(c.min_confidence, 0.5);
        assert_eq!(c.primary_strategy, StrategyKind::Distance);
    }

    #[test]
    fn test_unparsable_toml_yields_defaults() {
        let c = MatchingConfig::from_toml_str("learning_tolerance = = 3");
        assert_eq!(c, MatchingConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let mut c = MatchingConfig::default();
        c.apply_env(env(&[
            ("SNAPMATCH_RECOGNITION_TOLERANCE", "0.6"),
            ("SNAPMATCH_ADAPTIVE_TOLERANCE_ENABLED", "off"),
            ("SNAPMATCH_TARGET_IMAGE_SIZE", "1024x768"),
            ("SNAPMATCH_PRIMARY_STRATEGY", "Landmarks"),
            ("SNAPMATCH_LOG_LEVEL", "WARNING"),
        ]));
        c.validate();
        assert_eq!(c.recognition_tolerance, 0.6);
        assert!(!c.adaptive_tolerance_enabled);
        assert_eq!(c.target_image_size, (1024, 768));
        assert_eq!(c.primary_strategy, StrategyKind::Landmark);
        assert_eq!(c.log_level, "warn");
    }

    #[test]
    fn test_invalid_env_value_resets_file_value_to_default() {
        let mut c = MatchingConfig::from_toml_str(
            "min_face_size = 64\nmin_confidence = 0.5\nprimary_strategy = \"hybrid\"\n",
        );
        c.apply_env(env(&[
            ("SNAPMATCH_MIN_FACE_SIZE", "tiny"),
            ("SNAPMATCH_PRIMARY_STRATEGY", "telepathy"),
        ]));
        c.validate();
        assert_eq!(c.min_face_size, DEFAULT_MIN_FACE_SIZE);
        assert_eq!(c.primary_strategy, StrategyKind::Distance);
        assert_eq!(c.min_confidence, 0.5);
    }

    #[test]
    fn test_env_invalid_values_use_defaults() {
        let mut c = MatchingConfig::default();
        c.apply_env(env(&[
            ("SNAPMATCH_MIN_FACE_SIZE", "-3"),
            ("SNAPMATCH_NORMALIZE_BRIGHTNESS", "maybe"),
            ("SNAPMATCH_TARGET_IMAGE_SIZE", "0x100"),
            ("SNAPMATCH_LEARNING_TOLERANCE", "NaN"),
        ]));
        assert_eq!(c, MatchingConfig::default());
    }

    #[test]
    fn test_tolerance_ordering_enforced() {
        let c = MatchingConfig::from_toml_str(
            "learning_tolerance = 0.7\nrecognition_tolerance = 0.5\n",
        );
        assert_eq!(c.learning_tolerance, DEFAULT_LEARNING_TOLERANCE);
        assert_eq!(c.recognition_tolerance, DEFAULT_RECOGNITION_TOLERANCE);
        assert!(c.learning_tolerance <= c.recognition_tolerance);
    }

    #[test]
    fn test_floor_never_above_learning_tolerance() {
        let c = MatchingConfig::from_toml_str("learning_tolerance = 0.2\ntolerance_floor = 0.3\n");
        assert_eq!(c.learning_tolerance, 0.2);
        assert!(c.tolerance_floor <= c.learning_tolerance);
    }

    #[test]
    fn test_parse_size_forms() {
        assert_eq!(parse_size("800x600"), Some((800, 600)));
        assert_eq!(parse_size(" 800 , 600 "), Some((800, 600)));
        assert_eq!(parse_size("800X600"), Some((800, 600)));
        assert_eq!(parse_size("800"), None);
        assert_eq!(parse_size("1x2x3"), None);
    }

    #[test]
    fn test_load_missing_file_is_not_fatal() {
        let mut c = MatchingConfig::default();
        c.apply_file(Path::new("/nonexistent/snapmatch.toml"));
        assert_eq!(c, MatchingConfig::default());
    }
}
