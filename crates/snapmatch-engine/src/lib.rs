//! snapmatch-engine: background learning for uploaded photos.
//!
//! Runs identity resolution on a dedicated thread behind a bounded request
//! queue and checkpoints the identity store as it goes.

pub mod config;
pub mod detections;
pub mod engine;

use std::sync::Arc;

use snapmatch_core::{IdentityStore, MatchingConfig, Resolver};

pub use config::EngineConfig;
pub use detections::load_detections;
pub use engine::{learn_batch, spawn_learner, BatchReport, EngineError, LearnerHandle, PhotoFailure};

/// Load matching options and open the identity store named by `config`.
pub fn open_resolver(config: &EngineConfig) -> Result<Arc<Resolver>, EngineError> {
    let matching = MatchingConfig::load(config.config_path.as_deref());
    let store = Arc::new(IdentityStore::open(&config.store_path)?);
    Ok(Arc::new(Resolver::new(matching, store)))
}
