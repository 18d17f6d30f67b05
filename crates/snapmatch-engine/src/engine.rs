use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use snapmatch_core::{
    IdentityStore, PhotoAssignment, PhotoDetections, PhotoIndex, ResolveError, Resolver,
    StoreError,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to decode image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid detections file {path}: {message}")]
    Detections { path: PathBuf, message: String },
    #[error("learner thread exited")]
    ChannelClosed,
    #[error("failed to spawn learner thread: {0}")]
    Spawn(#[source] io::Error),
}

/// A photo that could not be learned, with the reason.
#[derive(Debug, Clone, Serialize)]
pub struct PhotoFailure {
    pub photo: PathBuf,
    pub error: String,
}

/// Outcome of a batch learning run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub assignments: Vec<PhotoAssignment>,
    pub failures: Vec<PhotoFailure>,
    pub index: PhotoIndex,
}

/// Messages sent from callers to the learner thread.
enum LearnRequest {
    Learn {
        photo: PhotoDetections,
        reply: oneshot::Sender<Result<PhotoAssignment, EngineError>>,
    },
    Checkpoint {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
}

type LearnReply = oneshot::Receiver<Result<PhotoAssignment, EngineError>>;

/// Clone-safe handle to the learner thread.
#[derive(Clone)]
pub struct LearnerHandle {
    tx: mpsc::Sender<LearnRequest>,
}

impl LearnerHandle {
    /// Queue one photo and wait for its faces to be resolved.
    pub async fn learn(&self, photo: PhotoDetections) -> Result<PhotoAssignment, EngineError> {
        let reply_rx = self.submit(photo).await.ok_or(EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Queue one photo without waiting for it. `None` if the learner is gone.
    async fn submit(&self, photo: PhotoDetections) -> Option<LearnReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(LearnRequest::Learn {
                photo,
                reply: reply_tx,
            })
            .await
            .ok()?;
        Some(reply_rx)
    }

    /// Persist the store now, regardless of the checkpoint interval.
    pub async fn checkpoint(&self) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(LearnRequest::Checkpoint { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Write a final checkpoint and release this handle.
    pub async fn finish(self) -> Result<(), EngineError> {
        self.checkpoint().await
    }
}

/// Spawn the learner on a dedicated OS thread.
///
/// Resolution is CPU-bound and takes the store's write lock, so it runs off
/// the async runtime. Requests are served in arrival order; each photo is
/// handled in isolation and a failing photo never stops the loop.
pub fn spawn_learner(
    resolver: Arc<Resolver>,
    checkpoint_every: usize,
    queue_depth: usize,
) -> Result<LearnerHandle, EngineError> {
    let checkpoint_every = checkpoint_every.max(1);
    let (tx, mut rx) = mpsc::channel::<LearnRequest>(queue_depth.max(1));

    std::thread::Builder::new()
        .name("snapmatch-learner".into())
        .spawn(move || {
            tracing::info!(checkpoint_every, "learner thread started");
            let store = Arc::clone(resolver.store());
            let mut since_checkpoint = 0usize;

            while let Some(req) = rx.blocking_recv() {
                match req {
                    LearnRequest::Learn { photo, reply } => {
                        let path = photo.image.clone();
                        let result = learn_photo(&resolver, photo);
                        match &result {
                            Ok(assignment) => {
                                since_checkpoint += 1;
                                tracing::debug!(
                                    photo = %path.display(),
                                    faces = assignment.faces.len(),
                                    kind = ?assignment.kind,
                                    "photo learned"
                                );
                            }
                            Err(e) => {
                                tracing::warn!(photo = %path.display(), error = %e, "photo failed");
                            }
                        }
                        let _ = reply.send(result);

                        if since_checkpoint >= checkpoint_every {
                            match checkpoint(&store) {
                                Ok(()) => since_checkpoint = 0,
                                Err(e) => {
                                    tracing::error!(error = %e, "checkpoint failed; will retry")
                                }
                            }
                        }
                    }
                    LearnRequest::Checkpoint { reply } => {
                        let result = checkpoint(&store);
                        if result.is_ok() {
                            since_checkpoint = 0;
                        }
                        let _ = reply.send(result);
                    }
                }
            }

            if let Err(e) = checkpoint(&store) {
                tracing::error!(error = %e, "final checkpoint failed");
            }
            tracing::info!("learner thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(LearnerHandle { tx })
}

/// Persist the store if anything changed since the last write.
fn checkpoint(store: &IdentityStore) -> Result<(), EngineError> {
    if !store.is_dirty() {
        return Ok(());
    }
    store.persist()?;
    tracing::info!(
        identities = store.len(),
        references = store.reference_count(),
        "checkpoint written"
    );
    Ok(())
}

fn learn_photo(resolver: &Resolver, photo: PhotoDetections) -> Result<PhotoAssignment, EngineError> {
    if photo.faces.is_empty() {
        return Ok(PhotoAssignment::new(photo.image, Vec::new()));
    }
    let image = image::open(&photo.image).map_err(|source| EngineError::Image {
        path: photo.image.clone(),
        source,
    })?;
    Ok(resolver.learn_photo(&image, &photo)?)
}

/// Learn every photo through `handle`, in order, and file the results.
///
/// All requests are queued up front (the bounded queue applies
/// backpressure) and replies are collected in submission order.
pub async fn learn_batch(handle: &LearnerHandle, photos: Vec<PhotoDetections>) -> BatchReport {
    let mut pending = Vec::with_capacity(photos.len());
    for photo in photos {
        let path = photo.image.clone();
        pending.push((path, handle.submit(photo).await));
    }

    let mut report = BatchReport::default();
    for (photo, reply) in pending {
        let result = match reply {
            Some(rx) => rx.await.unwrap_or(Err(EngineError::ChannelClosed)),
            None => Err(EngineError::ChannelClosed),
        };
        match result {
            Ok(assignment) => {
                report.index.file(&assignment);
                report.assignments.push(assignment);
            }
            Err(e) => report.failures.push(PhotoFailure {
                photo,
                error: e.to_string(),
            }),
        }
    }

    tracing::info!(
        learned = report.assignments.len(),
        failed = report.failures.len(),
        identities = report.index.len(),
        "batch finished"
    );
    report
}
