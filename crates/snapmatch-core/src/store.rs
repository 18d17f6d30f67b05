//! Durable person-identity store.
//!
//! Holds every identity and its reference embeddings. Readers get an
//! immutable snapshot of the last committed table; writers are serialised
//! through a single lock so that a match-then-create sequence is atomic.
//!
//! On disk the store is one JSON document:
//!
//! ```text
//! { "version": 2, "saved_at": "...", "checksum": "<sha256>",
//!   "identities": [ { "id": "...", "references": [ { "embedding": [..], "quality": 0.93 } ] } ] }
//! ```
//!
//! Version 1 documents (no checksum, references as bare float arrays, field
//! named `embeddings`) are still accepted.

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{Embedding, LandmarkSignature};

pub const STORE_VERSION: u32 = 2;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read identity store {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write identity store {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("identity store {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },
    #[error("unknown identity: {0}")]
    UnknownIdentity(String),
    #[error("embedding dimension mismatch: store holds {expected}-dim embeddings, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("failed to serialize identity store: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One confirmed sample of a person's face.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub embedding: Embedding,
    /// Composite quality confidence of the face this sample came from.
    pub quality: Option<f32>,
    pub landmarks: Option<LandmarkSignature>,
    pub added_at: Option<String>,
}

impl Reference {
    pub fn new(embedding: Embedding) -> Self {
        Self {
            embedding,
            quality: None,
            landmarks: None,
            added_at: None,
        }
    }

    pub fn with_quality(mut self, quality: Option<f32>) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_landmarks(mut self, landmarks: Option<LandmarkSignature>) -> Self {
        self.landmarks = landmarks;
        self
    }
}

/// The engine's notion of one person.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonIdentity {
    pub id: String,
    pub references: Vec<Reference>,
    pub created_at: Option<String>,
}

impl PersonIdentity {
    pub fn new(id: impl Into<String>, references: Vec<Reference>) -> Self {
        Self {
            id: id.into(),
            references,
            created_at: None,
        }
    }

    pub fn reference_count(&self) -> usize {
        self.references.len()
    }
}

/// The in-memory identity table behind a store snapshot.
#[derive(Debug, Clone, Default)]
pub struct IdentityTable {
    identities: Vec<PersonIdentity>,
    index: HashMap<String, usize>,
    dim: Option<usize>,
}

impl IdentityTable {
    /// All identities, in creation order.
    pub fn identities(&self) -> &[PersonIdentity] {
        &self.identities
    }

    pub fn get(&self, id: &str) -> Option<&PersonIdentity> {
        self.index.get(id).map(|&i| &self.identities[i])
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn reference_count(&self) -> usize {
        self.identities.iter().map(PersonIdentity::reference_count).sum()
    }

    /// Embedding dimension fixed by the first stored reference.
    pub fn dim(&self) -> Option<usize> {
        self.dim
    }

    pub fn check_dim(&self, actual: usize) -> Result<(), StoreError> {
        match self.dim {
            Some(expected) if expected != actual => {
                Err(StoreError::DimensionMismatch { expected, actual })
            }
            _ => Ok(()),
        }
    }

    /// Start a new identity from its first reference. Returns the fresh id.
    pub fn create_identity(&mut self, mut reference: Reference) -> Result<String, StoreError> {
        self.check_dim(reference.embedding.dim())?;

        let mut id = new_identity_id();
        while self.index.contains_key(&id) {
            id = new_identity_id();
        }

        let now = timestamp();
        reference.added_at.get_or_insert_with(|| now.clone());
        self.dim.get_or_insert(reference.embedding.dim());
        self.index.insert(id.clone(), self.identities.len());
        self.identities.push(PersonIdentity {
            id: id.clone(),
            references: vec![reference],
            created_at: Some(now),
        });
        Ok(id)
    }

    /// Add a confirmed sample to an existing identity. Prior references are kept.
    pub fn append_reference(&mut self, id: &str, mut reference: Reference) -> Result<(), StoreError> {
        self.check_dim(reference.embedding.dim())?;
        let &slot = self
            .index
            .get(id)
            .ok_or_else(|| StoreError::UnknownIdentity(id.to_string()))?;

        reference.added_at.get_or_insert_with(timestamp);
        self.dim.get_or_insert(reference.embedding.dim());
        self.identities[slot].references.push(reference);
        Ok(())
    }

    fn from_identities(path: &Path, identities: Vec<PersonIdentity>) -> Result<Self, StoreError> {
        let corrupt = |message: String| StoreError::Corrupt {
            path: path.to_path_buf(),
            message,
        };

        let mut table = IdentityTable::default();
        for identity in identities {
            if identity.id.is_empty() {
                return Err(corrupt("identity with empty id".into()));
            }
            if table.index.contains_key(&identity.id) {
                return Err(corrupt(format!("duplicate identity id {}", identity.id)));
            }
            for reference in &identity.references {
                let dim = reference.embedding.dim();
                if reference.embedding.validate().is_err() {
                    return Err(corrupt(format!(
                        "identity {} holds an empty or non-finite embedding",
                        identity.id
                    )));
                }
                if table.dim.is_some_and(|expected| expected != dim) {
                    return Err(corrupt(format!(
                        "identity {} holds a {dim}-dim embedding, expected {}",
                        identity.id,
                        table.dim.unwrap_or_default()
                    )));
                }
                table.dim.get_or_insert(dim);
            }
            table.index.insert(identity.id.clone(), table.identities.len());
            table.identities.push(identity);
        }
        Ok(table)
    }
}

fn new_identity_id() -> String {
    Uuid::new_v4().simple().to_string()
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Thread-safe identity store with an optional file backing.
pub struct IdentityStore {
    path: Option<PathBuf>,
    table: RwLock<Arc<IdentityTable>>,
    dirty: AtomicBool,
    persist_lock: Mutex<()>,
}

impl IdentityStore {
    /// A store with no durable backing; `persist` is a no-op.
    pub fn in_memory() -> Self {
        Self::with_table(None, IdentityTable::default())
    }

    /// Open the store at `path`, loading it if the file exists.
    ///
    /// A missing file starts an empty store. An unreadable or malformed file
    /// is an error: the store is never silently replaced with an empty one.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let table = read_store(&path)?;
        tracing::info!(
            path = %path.display(),
            identities = table.len(),
            references = table.reference_count(),
            "identity store opened"
        );
        Ok(Self::with_table(Some(path), table))
    }

    fn with_table(path: Option<PathBuf>, table: IdentityTable) -> Self {
        Self {
            path,
            table: RwLock::new(Arc::new(table)),
            dirty: AtomicBool::new(false),
            persist_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Snapshot of every identity as of the last committed mutation.
    pub fn lookup_all(&self) -> Arc<IdentityTable> {
        Arc::clone(&self.table.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.lookup_all().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup_all().is_empty()
    }

    pub fn reference_count(&self) -> usize {
        self.lookup_all().reference_count()
    }

    /// True when there are mutations not yet persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Run `f` against the table with exclusive write access.
    ///
    /// Snapshots already handed out are unaffected. Table mutators validate
    /// before changing anything, so an `Err` leaves the table as it was.
    pub fn update<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut IdentityTable) -> Result<R, StoreError>,
    {
        let mut guard = self.table.write().unwrap_or_else(PoisonError::into_inner);
        let table = Arc::make_mut(&mut *guard);
        let result = f(table)?;
        self.dirty.store(true, Ordering::Release);
        Ok(result)
    }

    pub fn create_identity(&self, embedding: Embedding) -> Result<String, StoreError> {
        self.update(|table| table.create_identity(Reference::new(embedding)))
    }

    pub fn append_reference(&self, id: &str, embedding: Embedding) -> Result<(), StoreError> {
        self.update(|table| table.append_reference(id, Reference::new(embedding)))
    }

    /// Write the current table to the backing file atomically.
    pub fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = self.path.as_deref() else {
            tracing::debug!("in-memory identity store; nothing to persist");
            return Ok(());
        };

        let _serial = self.persist_lock.lock().unwrap_or_else(PoisonError::into_inner);
        // Clear before snapshotting so a concurrent update re-marks the store.
        self.dirty.store(false, Ordering::Release);
        let snapshot = self.lookup_all();
        if let Err(e) = write_store(path, &snapshot) {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }

        tracing::info!(
            path = %path.display(),
            identities = snapshot.len(),
            references = snapshot.reference_count(),
            "identity store persisted"
        );
        Ok(())
    }

    /// Replace the in-memory table with the backing file's contents.
    pub fn reload(&self) -> Result<(), StoreError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(());
        };
        let _serial = self.persist_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let table = read_store(path)?;
        tracing::info!(path = %path.display(), identities = table.len(), "identity store reloaded");

        *self.table.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(table);
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }
}

// --- On-disk representation ---

#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    saved_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<String>,
    identities: Vec<StoredIdentity>,
}

#[derive(Serialize, Deserialize)]
struct StoredIdentity {
    id: String,
    #[serde(alias = "embeddings")]
    references: Vec<StoredReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<String>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum StoredReference {
    /// Schema 1: the embedding alone.
    Bare(Vec<f32>),
    Full(FullReference),
}

#[derive(Serialize, Deserialize)]
struct FullReference {
    embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    quality: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    landmarks: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    added_at: Option<String>,
}

impl From<StoredReference> for Reference {
    fn from(stored: StoredReference) -> Self {
        match stored {
            StoredReference::Bare(values) => Reference::new(Embedding::new(values)),
            StoredReference::Full(full) => Reference {
                embedding: Embedding {
                    values: full.embedding,
                    model_version: full.model_version,
                },
                quality: full.quality,
                landmarks: full.landmarks.map(LandmarkSignature),
                added_at: full.added_at,
            },
        }
    }
}

impl From<&Reference> for StoredReference {
    fn from(reference: &Reference) -> Self {
        StoredReference::Full(FullReference {
            embedding: reference.embedding.values.clone(),
            model_version: reference.embedding.model_version.clone(),
            quality: reference.quality,
            landmarks: reference.landmarks.as_ref().map(|s| s.0.clone()),
            added_at: reference.added_at.clone(),
        })
    }
}

/// SHA-256 over identity ids and embedding values only, so metadata added by
/// newer writers never invalidates the checksum.
fn checksum(identities: &[PersonIdentity]) -> String {
    let mut hasher = Sha256::new();
    for identity in identities {
        hasher.update(identity.id.as_bytes());
        hasher.update([0u8]);
        hasher.update((identity.references.len() as u64).to_le_bytes());
        for reference in &identity.references {
            hasher.update((reference.embedding.values.len() as u64).to_le_bytes());
            for v in &reference.embedding.values {
                hasher.update(v.to_le_bytes());
            }
        }
    }
    format!("{:x}", hasher.finalize())
}

fn read_store(path: &Path) -> Result<IdentityTable, StoreError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no identity store yet; starting empty");
            return Ok(IdentityTable::default());
        }
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    parse_store(path, &data)
}

fn parse_store(path: &Path, data: &[u8]) -> Result<IdentityTable, StoreError> {
    let corrupt = |message: String| StoreError::Corrupt {
        path: path.to_path_buf(),
        message,
    };

    if data.iter().all(u8::is_ascii_whitespace) {
        return Err(corrupt("file is empty".into()));
    }

    let file: StoreFile = serde_json::from_slice(data)
        .map_err(|e| corrupt(format!("invalid store contents: {e}")))?;

    if file.version == 0 {
        return Err(corrupt("unsupported store version 0".into()));
    }
    if file.version > STORE_VERSION {
        tracing::warn!(
            path = %path.display(),
            version = file.version,
            supported = STORE_VERSION,
            "identity store written by a newer version; unknown fields are ignored"
        );
    }

    let identities: Vec<PersonIdentity> = file
        .identities
        .into_iter()
        .map(|stored| PersonIdentity {
            id: stored.id,
            references: stored.references.into_iter().map(Reference::from).collect(),
            created_at: stored.created_at,
        })
        .collect();

    if let Some(expected) = file.checksum {
        let actual = checksum(&identities);
        if !expected.eq_ignore_ascii_case(&actual) {
            return Err(corrupt(format!(
                "checksum mismatch: recorded {expected}, computed {actual}"
            )));
        }
    }

    IdentityTable::from_identities(path, identities)
}

fn write_store(path: &Path, table: &IdentityTable) -> Result<(), StoreError> {
    let write_err = |source: io::Error| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    let file = StoreFile {
        version: STORE_VERSION,
        saved_at: Some(timestamp()),
        checksum: Some(checksum(table.identities())),
        identities: table
            .identities()
            .iter()
            .map(|identity| StoredIdentity {
                id: identity.id.clone(),
                references: identity.references.iter().map(StoredReference::from).collect(),
                created_at: identity.created_at.clone(),
            })
            .collect(),
    };
    let serialized = serde_json::to_vec_pretty(&file)?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(write_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(write_err)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        writer.write_all(&serialized).map_err(write_err)?;
        writer.write_all(b"\n").map_err(write_err)?;
        writer.flush().map_err(write_err)?;
    }
    tmp.as_file().sync_all().map_err(write_err)?;

    let persisted = tmp.persist(path).map_err(|e| write_err(e.error))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        persisted
            .set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(write_err)?;
    }
    #[cfg(not(unix))]
    let _ = persisted;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn emb(values: &[f32]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    #[test]
    fn test_create_and_append() {
        let store = IdentityStore::in_memory();
        let a = store.create_identity(emb(&[0.1, 0.2])).unwrap();
        let b = store.create_identity(emb(&[0.9, 0.8])).unwrap();
        assert_ne!(a, b);

        store.append_reference(&a, emb(&[0.11, 0.19])).unwrap();
        let table = store.lookup_all();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get(&a).unwrap().reference_count(), 2);
        assert_eq!(table.get(&b).unwrap().reference_count(), 1);
        assert_eq!(table.identities()[0].id, a);
        assert!(store.is_dirty());
    }

    #[test]
    fn test_identity_ids_are_opaque_and_unique() {
        let store = IdentityStore::in_memory();
        let ids: Vec<String> = (0..50)
            .map(|i| store.create_identity(emb(&[i as f32, 0.0])).unwrap())
            .collect();
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
        assert!(ids.iter().all(|id| id.len() == 32 && id.chars().all(|c| c.is_ascii_hexdigit())));
    }

    #[test]
    fn test_append_unknown_identity() {
        let store = IdentityStore::in_memory();
        let err = store.append_reference("nobody", emb(&[0.1])).unwrap_err();
        assert!(matches!(err, StoreError::UnknownIdentity(id) if id == "nobody"));
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let store = IdentityStore::in_memory();
        let a = store.create_identity(emb(&[0.1, 0.2, 0.3])).unwrap();
        let err = store.append_reference(&a, emb(&[0.1, 0.2])).unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 3, actual: 2 }));
        assert!(store.create_identity(emb(&[0.5])).is_err());
        assert_eq!(store.reference_count(), 1);
    }

    #[test]
    fn test_snapshot_unaffected_by_later_writes() {
        let store = IdentityStore::in_memory();
        store.create_identity(emb(&[0.1])).unwrap();
        let before = store.lookup_all();
        store.create_identity(emb(&[0.9])).unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_persist_reload_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/identities.json");
        let store = IdentityStore::open(&path).unwrap();
        assert!(store.is_empty());

        let a = store
            .update(|t| {
                t.create_identity(
                    Reference::new(emb(&[0.125, -0.5, 1.0e-7]))
                        .with_quality(Some(0.91))
                        .with_landmarks(Some(LandmarkSignature(vec![1.0, 0.5]))),
                )
            })
            .unwrap();
        store.append_reference(&a, emb(&[0.13, -0.49, 0.0])).unwrap();
        let b = store.create_identity(emb(&[0.7, 0.7, 0.7])).unwrap();
        store.persist().unwrap();
        assert!(!store.is_dirty());

        let reopened = IdentityStore::open(&path).unwrap();
        let original = store.lookup_all();
        let loaded = reopened.lookup_all();
        assert_eq!(loaded.identities(), original.identities());
        assert_eq!(loaded.identities()[0].id, a);
        assert_eq!(loaded.identities()[1].id, b);
        assert_eq!(loaded.reference_count(), 3);
        assert_eq!(loaded.get(&a).unwrap().references[0].quality, Some(0.91));
    }

    #[test]
    fn test_reload_discards_unpersisted_changes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("identities.json");
        let store = IdentityStore::open(&path).unwrap();
        store.create_identity(emb(&[0.1, 0.2])).unwrap();
        store.persist().unwrap();
        store.create_identity(emb(&[0.3, 0.4])).unwrap();
        assert_eq!(store.len(), 2);

        store.reload().unwrap();
        assert_eq!(store.len(), 1);
        assert!(!store.is_dirty());
    }

    #[test]
    fn test_loads_schema_one_without_metadata() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("legacy.json");
        fs::write(
            &path,
            r#"{"version": 1, "identities": [
                {"id": "p1", "embeddings": [[0.1, 0.2], [0.15, 0.25]]},
                {"id": "p2", "references": [{"embedding": [0.9, 0.9], "future_field": {"x": 1}}]}
            ]}"#,
        )
        .unwrap();

        let store = IdentityStore::open(&path).unwrap();
        let table = store.lookup_all();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("p1").unwrap().reference_count(), 2);
        let r = &table.get("p2").unwrap().references[0];
        assert_eq!(r.quality, None);
        assert_eq!(r.landmarks, None);
        assert_eq!(table.dim(), Some(2));
    }

    #[test]
    fn test_corrupt_files_are_errors() {
        let tmp = TempDir::new().unwrap();
        let cases: [(&str, &str); 5] = [
            ("empty.json", ""),
            ("garbage.json", "{not json"),
            ("dupes.json", r#"{"version":1,"identities":[{"id":"a","embeddings":[[1.0]]},{"id":"a","embeddings":[[2.0]]}]}"#),
            ("dims.json", r#"{"version":1,"identities":[{"id":"a","embeddings":[[1.0]]},{"id":"b","embeddings":[[2.0,3.0]]}]}"#),
            ("version.json", r#"{"version":0,"identities":[]}"#),
        ];
        for (name, contents) in cases {
            let path = tmp.path().join(name);
            fs::write(&path, contents).unwrap();
            let result = IdentityStore::open(&path);
            assert!(
                matches!(result, Err(StoreError::Corrupt { .. })),
                "{name} should be corrupt"
            );
        }
    }

    #[test]
    fn test_checksum_mismatch_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("identities.json");
        let store = IdentityStore::open(&path).unwrap();
        store.create_identity(emb(&[0.25, 0.5])).unwrap();
        store.persist().unwrap();

        let text = fs::read_to_string(&path).unwrap().replace("0.25", "0.35");
        fs::write(&path, text).unwrap();
        assert!(matches!(IdentityStore::open(&path), Err(StoreError::Corrupt { .. })));
        assert!(matches!(store.reload(), Err(StoreError::Corrupt { .. })));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_in_memory_persist_is_noop() {
        let store = IdentityStore::in_memory();
        store.create_identity(emb(&[0.1])).unwrap();
        store.persist().unwrap();
        store.reload().unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_concurrent_writers_serialise() {
        let store = Arc::new(IdentityStore::in_memory());
        let seed = store.create_identity(emb(&[0.0, 0.0])).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                let seed = seed.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        if i % 2 == 0 {
                            store.append_reference(&seed, emb(&[t as f32, i as f32])).unwrap();
                        } else {
                            store.create_identity(emb(&[t as f32, i as f32])).unwrap();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let table = store.lookup_all();
        assert_eq!(table.get(&seed).unwrap().reference_count(), 1 + 8 * 13);
        assert_eq!(table.len(), 1 + 8 * 12);
    }
}
