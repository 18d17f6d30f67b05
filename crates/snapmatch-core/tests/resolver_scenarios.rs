use std::sync::Arc;

use image::{DynamicImage, Rgb, RgbImage};
use snapmatch_core::{
    BoundingBox, Embedding, FaceDetection, IdentityStore, LearnOutcome, MatchStatus,
    MatchingConfig, PhotoDetections, PhotoIndex, PhotoKind, Resolver,
};
use tempfile::TempDir;

/// A 480x240 photo with two sharp, well-exposed face regions side by side.
fn sharp_photo() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(480, 240, |x, y| {
        if (x + y) % 2 == 0 {
            Rgb([64, 64, 64])
        } else {
            Rgb([192, 192, 192])
        }
    }))
}

/// Flat and dark: composite quality confidence around 0.35.
fn dark_photo() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(480, 240, Rgb([20, 20, 20])))
}

fn left_face() -> BoundingBox {
    BoundingBox { x: 20.0, y: 20.0, width: 200.0, height: 200.0, confidence: 0.99, landmarks: None }
}

fn right_face() -> BoundingBox {
    BoundingBox { x: 260.0, ..left_face() }
}

fn emb(values: &[f32]) -> Embedding {
    Embedding::new(values.to_vec())
}

fn resolver_with(store: Arc<IdentityStore>) -> Resolver {
    Resolver::new(MatchingConfig::default(), store)
}

#[test]
fn test_empty_store_learn_creates_identity() {
    let store = Arc::new(IdentityStore::in_memory());
    let resolver = resolver_with(Arc::clone(&store));

    let outcome = resolver.learn(&emb(&[0.1, 0.2, 0.3]), &sharp_photo(), &left_face()).unwrap();
    let LearnOutcome::Created { identity_id, result } = outcome else {
        panic!("expected a new identity");
    };
    assert_eq!(result.distance, None);
    assert_eq!(store.len(), 1);
    assert_eq!(store.lookup_all().get(&identity_id).unwrap().reference_count(), 1);
}

#[test]
fn test_near_duplicate_joins_existing_identity() {
    let store = Arc::new(IdentityStore::in_memory());
    let resolver = resolver_with(Arc::clone(&store));
    let photo = sharp_photo();

    let a = resolver.learn(&emb(&[0.1, 0.2, 0.3]), &photo, &left_face()).unwrap();
    let b = resolver.learn(&emb(&[0.9, 0.1, 0.5]), &photo, &left_face()).unwrap();
    assert_ne!(a.identity_id(), b.identity_id());

    // 0.05 from A, far beyond the learning tolerance from B.
    let c = resolver.learn(&emb(&[0.1, 0.25, 0.3]), &photo, &left_face()).unwrap();
    assert!(matches!(c, LearnOutcome::Appended { .. }));
    assert_eq!(c.identity_id(), a.identity_id());

    let table = store.lookup_all();
    assert_eq!(table.len(), 2);
    assert_eq!(table.get(a.identity_id().unwrap()).unwrap().reference_count(), 2);
}

#[test]
fn test_low_quality_scan_asks_for_rescan() {
    let store = Arc::new(IdentityStore::in_memory());
    let resolver = resolver_with(Arc::clone(&store));
    resolver.learn(&emb(&[0.1, 0.2]), &sharp_photo(), &left_face()).unwrap();

    let result = resolver.recognize(&emb(&[0.1, 0.2]), &dark_photo(), &left_face()).unwrap();
    assert_eq!(result.status, MatchStatus::LowQuality);
    assert_eq!(result.identity_id, None);
    assert_eq!(result.distance, None);
    let quality = result.quality.unwrap();
    assert!(quality.confidence < 0.7);
    assert!(!quality.acceptable);
}

#[test]
fn test_low_quality_face_is_not_learned() {
    let store = Arc::new(IdentityStore::in_memory());
    let resolver = resolver_with(Arc::clone(&store));

    let outcome = resolver.learn(&emb(&[0.1, 0.2]), &dark_photo(), &left_face()).unwrap();
    assert!(matches!(outcome, LearnOutcome::Rejected { .. }));
    assert!(store.is_empty());
    assert!(!store.is_dirty());
}

#[test]
fn test_recognize_beyond_tolerance_finds_no_one() {
    let store = Arc::new(IdentityStore::in_memory());
    let resolver = resolver_with(Arc::clone(&store));
    resolver.learn(&emb(&[0.0, 0.0]), &sharp_photo(), &left_face()).unwrap();

    let result = resolver.recognize(&emb(&[0.8, 0.0]), &sharp_photo(), &left_face()).unwrap();
    assert_eq!(result.status, MatchStatus::NoMatch);
    assert_eq!(result.identity_id, None);
    assert!(result.distance.unwrap() > result.threshold);
}

#[test]
fn test_recognition_is_more_lenient_than_learning() {
    let store = Arc::new(IdentityStore::in_memory());
    let resolver = resolver_with(Arc::clone(&store));
    let first = resolver.learn(&emb(&[0.0, 0.0]), &sharp_photo(), &left_face()).unwrap();

    // 0.5 sits between the learning (0.45) and recognition (0.54) tolerances.
    let probe = emb(&[0.5, 0.0]);
    let result = resolver.recognize(&probe, &sharp_photo(), &left_face()).unwrap();
    assert_eq!(result.identity_id.as_deref(), first.identity_id());

    let learned = resolver.learn(&probe, &sharp_photo(), &left_face()).unwrap();
    assert!(matches!(learned, LearnOutcome::Created { .. }));
}

#[test]
fn test_recognize_never_mutates_store() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("identities.json");
    let store = Arc::new(IdentityStore::open(&path).unwrap());
    let resolver = resolver_with(Arc::clone(&store));
    resolver.learn(&emb(&[0.3, 0.3]), &sharp_photo(), &left_face()).unwrap();
    store.persist().unwrap();
    let before = std::fs::read(&path).unwrap();

    for probe in [[0.3, 0.3], [0.31, 0.3], [5.0, 5.0]] {
        resolver.recognize(&emb(&probe), &sharp_photo(), &left_face()).unwrap();
        resolver.recognize(&emb(&probe), &dark_photo(), &left_face()).unwrap();
    }
    assert_eq!(store.reference_count(), 1);
    assert!(!store.is_dirty());
    assert_eq!(std::fs::read(&path).unwrap(), before);
}

#[test]
fn test_group_photo_files_under_each_person() {
    let store = Arc::new(IdentityStore::in_memory());
    let resolver = resolver_with(Arc::clone(&store));
    let photo = sharp_photo();

    let a = resolver.learn(&emb(&[0.1, 0.1]), &photo, &left_face()).unwrap();
    let b = resolver.learn(&emb(&[0.9, 0.9]), &photo, &left_face()).unwrap();

    let detections = PhotoDetections {
        image: "party.jpg".into(),
        faces: vec![
            FaceDetection { bbox: left_face(), embedding: emb(&[0.12, 0.1]) },
            FaceDetection { bbox: right_face(), embedding: emb(&[0.9, 0.88]) },
        ],
    };
    let assignment = resolver.learn_photo(&photo, &detections).unwrap();
    assert_eq!(assignment.faces.len(), 2);
    assert_eq!(assignment.kind, PhotoKind::Group);

    let mut index = PhotoIndex::new();
    index.file(&assignment);
    for id in [a.identity_id().unwrap(), b.identity_id().unwrap()] {
        let photos: Vec<_> = index.photos_for(id).collect();
        assert_eq!(photos, [std::path::Path::new("party.jpg")]);
    }
}

#[test]
fn test_photo_with_n_faces_yields_n_assignments() {
    let resolver = resolver_with(Arc::new(IdentityStore::in_memory()));
    let photo = sharp_photo();
    let detections = PhotoDetections {
        image: "three.jpg".into(),
        faces: vec![
            FaceDetection { bbox: left_face(), embedding: emb(&[0.0, 0.0]) },
            FaceDetection { bbox: right_face(), embedding: emb(&[3.0, 0.0]) },
            FaceDetection {
                bbox: BoundingBox { width: 40.0, height: 40.0, ..left_face() },
                embedding: emb(&[0.0, 3.0]),
            },
        ],
    };
    let assignment = resolver.learn_photo(&photo, &detections).unwrap();
    assert_eq!(assignment.faces.len(), 3);
    // The 40px face is below the minimum size and is not filed.
    assert_eq!(assignment.identities().len(), 2);
    assert_eq!(resolver.store().len(), 2);

    let empty = PhotoDetections { image: "landscape.jpg".into(), faces: vec![] };
    let assignment = resolver.learn_photo(&photo, &empty).unwrap();
    assert_eq!(assignment.kind, PhotoKind::NoFaces);
}

#[test]
fn test_concurrent_learners_do_not_duplicate_identities() {
    let store = Arc::new(IdentityStore::in_memory());
    let resolver = Arc::new(resolver_with(Arc::clone(&store)));
    let photo = Arc::new(sharp_photo());

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let resolver = Arc::clone(&resolver);
            let photo = Arc::clone(&photo);
            std::thread::spawn(move || {
                // Every thread sees the same two people, slightly perturbed.
                let jitter = t as f32 * 0.001;
                resolver.learn(&emb(&[jitter, 0.0]), &photo, &left_face()).unwrap();
                resolver.learn(&emb(&[5.0 + jitter, 5.0]), &photo, &left_face()).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(store.len(), 2);
    assert_eq!(store.reference_count(), 16);
}
