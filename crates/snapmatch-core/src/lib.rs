//! snapmatch-core: face matching engine for grouping photos by person.
//!
//! Takes detections and embeddings from an external detector/encoder and
//! decides which person identity each face belongs to. Quality scoring,
//! adaptive tolerance and the choice of matching strategy all happen here,
//! as does the durable identity store.

pub mod config;
pub mod filing;
pub mod preprocess;
pub mod quality;
pub mod resolver;
pub mod store;
pub mod strategy;
pub mod tolerance;
pub mod types;

pub use config::MatchingConfig;
pub use filing::{FaceAssignment, PhotoAssignment, PhotoIndex, PhotoKind};
pub use preprocess::{Letterbox, Prepared, Preprocessor};
pub use quality::{QualityAssessor, QualityBand, QualityMetrics};
pub use resolver::{single_face, LearnOutcome, ResolveError, Resolver};
pub use store::{IdentityStore, IdentityTable, PersonIdentity, Reference, StoreError};
pub use strategy::{select_strategy, Matcher, Strategy, StrategyKind};
pub use tolerance::{Mode, TolerancePolicy};
pub use types::{
    BoundingBox, Candidate, Embedding, FaceDetection, InputError, LandmarkSignature, MatchResult,
    MatchStatus, PhotoDetections, Probe,
};
