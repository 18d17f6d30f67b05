//! Identity resolution: the learning and recognition workflows.
//!
//! Learning groups uploaded faces into identities and may create new ones.
//! Recognition matches a live scan and never touches the store.

use std::sync::Arc;

use image::DynamicImage;
use thiserror::Error;

use crate::config::MatchingConfig;
use crate::filing::{FaceAssignment, PhotoAssignment};
use crate::quality::{QualityAssessor, QualityMetrics};
use crate::store::{IdentityStore, PersonIdentity, Reference, StoreError};
use crate::strategy::{select_strategy, Matcher, Strategy};
use crate::tolerance::{Mode, TolerancePolicy};
use crate::types::{
    BoundingBox, Embedding, FaceDetection, InputError, LandmarkSignature, MatchResult,
    MatchStatus, PhotoDetections, Probe,
};

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What learning did with one face.
#[derive(Debug, Clone)]
pub enum LearnOutcome {
    /// The face joined an existing identity as a new reference.
    Appended { identity_id: String, result: MatchResult },
    /// No identity was close enough; a new one was created.
    Created { identity_id: String, result: MatchResult },
    /// The face was too poor to learn from. The store is unchanged.
    Rejected { quality: QualityMetrics },
}

impl LearnOutcome {
    pub fn identity_id(&self) -> Option<&str> {
        match self {
            LearnOutcome::Appended { identity_id, .. } | LearnOutcome::Created { identity_id, .. } => {
                Some(identity_id.as_str())
            }
            LearnOutcome::Rejected { .. } => None,
        }
    }
}

impl From<LearnOutcome> for FaceAssignment {
    fn from(outcome: LearnOutcome) -> Self {
        match outcome {
            LearnOutcome::Appended { identity_id, result } => FaceAssignment::Matched {
                identity_id,
                distance: result.distance.unwrap_or_default(),
            },
            LearnOutcome::Created { identity_id, .. } => FaceAssignment::Created { identity_id },
            LearnOutcome::Rejected { quality } => FaceAssignment::Rejected { quality },
        }
    }
}

/// The one face of a single-subject scan.
///
/// Needs no pixels, so callers can reject a malformed scan before decoding
/// its image.
pub fn single_face(faces: &[FaceDetection]) -> Result<&FaceDetection, InputError> {
    match faces {
        [] => Err(InputError::NoFace),
        [face] => {
            face.embedding.validate()?;
            Ok(face)
        }
        many => Err(InputError::MultipleFaces(many.len())),
    }
}

pub struct Resolver {
    config: MatchingConfig,
    store: Arc<IdentityStore>,
    assessor: QualityAssessor,
    tolerance: TolerancePolicy,
}

impl Resolver {
    pub fn new(config: MatchingConfig, store: Arc<IdentityStore>) -> Self {
        Self {
            assessor: QualityAssessor::new(&config),
            tolerance: TolerancePolicy::new(&config),
            config,
            store,
        }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<IdentityStore> {
        &self.store
    }

    /// Resolve one uploaded face, appending to or creating an identity.
    ///
    /// Matching and the resulting store mutation happen under the store's
    /// write lock, so concurrent learners never both create an identity
    /// for the same person.
    pub fn learn(
        &self,
        embedding: &Embedding,
        image: &DynamicImage,
        bbox: &BoundingBox,
    ) -> Result<LearnOutcome, ResolveError> {
        embedding.validate()?;
        let quality = self.assessor.assess(image, bbox);
        if !quality.acceptable {
            tracing::warn!(
                confidence = quality.confidence,
                width = quality.width,
                height = quality.height,
                "face rejected for learning: quality below minimum"
            );
            return Ok(LearnOutcome::Rejected { quality });
        }

        let probe = self.probe(embedding, bbox, quality);
        let outcome = self.store.update(|table| {
            table.check_dim(probe.embedding.dim())?;
            let result = self.decide(Mode::Learning, &probe, table.identities());
            let reference = Reference::new(probe.embedding.clone())
                .with_quality(probe.quality_confidence())
                .with_landmarks(probe.landmarks.clone());

            match result.identity_id.clone() {
                Some(identity_id) => {
                    table.append_reference(&identity_id, reference)?;
                    Ok(LearnOutcome::Appended { identity_id, result })
                }
                None => {
                    let identity_id = table.create_identity(reference)?;
                    Ok(LearnOutcome::Created { identity_id, result })
                }
            }
        })?;

        match &outcome {
            LearnOutcome::Appended { identity_id, result } => {
                self.log_decision("learn", result);
                tracing::debug!(identity = %identity_id, "reference appended");
            }
            LearnOutcome::Created { identity_id, result } => {
                self.log_decision("learn", result);
                tracing::info!(identity = %identity_id, "new identity created");
            }
            LearnOutcome::Rejected { .. } => {}
        }
        Ok(outcome)
    }

    /// Match a live scan against known identities. Never mutates the store.
    pub fn recognize(
        &self,
        embedding: &Embedding,
        image: &DynamicImage,
        bbox: &BoundingBox,
    ) -> Result<MatchResult, ResolveError> {
        embedding.validate()?;
        let quality = self.assessor.assess(image, bbox);
        if !quality.acceptable {
            let result = MatchResult {
                status: MatchStatus::LowQuality,
                strategy: select_strategy(&self.config, Some(&quality)),
                threshold: self.tolerance.effective_tolerance(Mode::Recognition, Some(&quality)),
                quality: Some(quality),
                ..MatchResult::no_match(self.config.primary_strategy, 0.0)
            };
            tracing::info!(
                confidence = result.quality.as_ref().map(|q| q.confidence),
                "scan quality too low; rescan needed"
            );
            return Ok(result);
        }

        let probe = self.probe(embedding, bbox, quality);
        let snapshot = self.store.lookup_all();
        snapshot.check_dim(probe.embedding.dim())?;
        let result = self.decide(Mode::Recognition, &probe, snapshot.identities());
        self.log_decision("recognize", &result);
        Ok(result)
    }

    /// Recognise a scan that must contain exactly one face.
    pub fn recognize_scan(
        &self,
        image: &DynamicImage,
        faces: &[FaceDetection],
    ) -> Result<MatchResult, ResolveError> {
        let face = single_face(faces)?;
        self.recognize(&face.embedding, image, &face.bbox)
    }

    /// Learn every face in an uploaded photo, in detection order.
    ///
    /// All embeddings are validated up front so a malformed face fails the
    /// photo before any of its faces are learned.
    pub fn learn_photo(
        &self,
        image: &DynamicImage,
        detections: &PhotoDetections,
    ) -> Result<PhotoAssignment, ResolveError> {
        for face in &detections.faces {
            face.embedding.validate()?;
        }
        let snapshot = self.store.lookup_all();
        let expected = snapshot
            .dim()
            .or_else(|| detections.faces.first().map(|face| face.embedding.dim()));
        if let Some(expected) = expected {
            for face in &detections.faces {
                let actual = face.embedding.dim();
                if actual != expected {
                    return Err(StoreError::DimensionMismatch { expected, actual }.into());
                }
            }
        }

        let mut faces = Vec::with_capacity(detections.faces.len());
        for face in &detections.faces {
            let outcome = self.learn(&face.embedding, image, &face.bbox)?;
            faces.push(FaceAssignment::from(outcome));
        }

        let assignment = PhotoAssignment::new(detections.image.clone(), faces);
        tracing::debug!(
            photo = %assignment.photo.display(),
            faces = assignment.faces.len(),
            kind = ?assignment.kind,
            "photo learned"
        );
        Ok(assignment)
    }

    fn probe(&self, embedding: &Embedding, bbox: &BoundingBox, quality: QualityMetrics) -> Probe {
        Probe {
            embedding: embedding.clone(),
            landmarks: bbox.landmarks.as_ref().and_then(LandmarkSignature::from_landmarks),
            quality: Some(quality),
        }
    }

    fn decide(&self, mode: Mode, probe: &Probe, gallery: &[PersonIdentity]) -> MatchResult {
        let tolerance = self.tolerance.effective_tolerance(mode, probe.quality.as_ref());
        let kind = select_strategy(&self.config, probe.quality.as_ref());
        Strategy::build(kind, &self.config).compare(probe, gallery, tolerance)
    }

    fn log_decision(&self, operation: &str, result: &MatchResult) {
        if self.config.log_match_details {
            tracing::info!(
                operation,
                identity = ?result.identity_id,
                status = ?result.status,
                distance = ?result.distance,
                threshold = result.threshold,
                confidence = result.confidence,
                strategy = %result.strategy,
                runner_ups = result.candidates.len(),
                "match decision"
            );
        } else {
            tracing::debug!(
                operation,
                identity = ?result.identity_id,
                status = ?result.status,
                distance = ?result.distance,
                threshold = result.threshold,
                strategy = %result.strategy,
                "match decision"
            );
        }
    }
}
