//! Enrollment: turn a labelled batch of photos into a stored person model.

use crate::encoder::{EncoderError, FaceEncoder};
use crate::preprocess::{self, ImageSource};
use crate::store::{ModelStore, Scope, StoreError};
use crate::types::{DetectedFace, Embedding};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("encoder error: {0}")]
    Encoder(#[from] EncoderError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Result of an enrollment batch.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrollOutcome {
    /// At least one image yielded a face; the model file was (re)written.
    Saved {
        path: PathBuf,
        embeddings: usize,
        skipped: usize,
    },
    /// No image yielded a usable face; nothing was written.
    NoUsableFaces { skipped: usize },
}

impl EnrollOutcome {
    pub fn model_path(&self) -> Option<&PathBuf> {
        match self {
            EnrollOutcome::Saved { path, .. } => Some(path),
            EnrollOutcome::NoUsableFaces { .. } => None,
        }
    }
}

/// Pick the face with the largest bounding box; the earliest detection wins
/// a tie. Secondary faces in the background are ignored this way.
pub fn select_primary_face(faces: &[DetectedFace]) -> Option<&DetectedFace> {
    faces.iter().fold(None, |best: Option<&DetectedFace>, face| match best {
        Some(b) if b.location.area() >= face.location.area() => Some(b),
        _ => Some(face),
    })
}

/// Enroll `person` from `images`, replacing any previous model under `scope`.
///
/// Images that cannot be decoded, contain no face, or whose primary face
/// cannot be encoded are skipped with a warning. Encoder and storage
/// failures abort the batch.
pub fn enroll<E: FaceEncoder + ?Sized>(
    encoder: &mut E,
    store: &ModelStore,
    scope: &Scope,
    person: &str,
    images: &[ImageSource],
) -> Result<EnrollOutcome, EnrollError> {
    // Reject bad names before spending time on inference.
    store.model_path(scope, person)?;

    let mut embeddings = Vec::with_capacity(images.len());
    let mut skipped = 0;

    for source in images {
        match primary_embedding(encoder, source)? {
            Some(embedding) => embeddings.push(embedding),
            None => skipped += 1,
        }
    }

    if embeddings.is_empty() {
        tracing::warn!(person, images = images.len(), "no valid faces found, model not saved");
        return Ok(EnrollOutcome::NoUsableFaces { skipped });
    }

    let path = store.save(scope, person, &embeddings)?;
    Ok(EnrollOutcome::Saved {
        path,
        embeddings: embeddings.len(),
        skipped,
    })
}

fn primary_embedding<E: FaceEncoder + ?Sized>(
    encoder: &mut E,
    source: &ImageSource,
) -> Result<Option<Embedding>, EncoderError> {
    let image = match source.load_rgb() {
        Ok(image) => preprocess::equalize_illumination(&image),
        Err(e) => {
            tracing::warn!(image = %source, error = %e, "skipping unreadable image");
            return Ok(None);
        }
    };

    let faces = encoder.detect(&image)?;
    let Some(face) = select_primary_face(&faces) else {
        tracing::warn!(image = %source, "no faces found in image");
        return Ok(None);
    };
    tracing::debug!(image = %source, faces = faces.len(), location = ?face.location, "primary face selected");

    match encoder.encode(&image, face) {
        Ok(embedding) => Ok(Some(embedding)),
        Err(e) if e.is_face_specific() => {
            tracing::warn!(image = %source, error = %e, "no encoding generated for image");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{embedding_for, location_for, marker_image, StubEncoder};
    use crate::types::FaceLocation;
    use image::ImageFormat;
    use std::io::Cursor;

    fn png(faces: u8, code: u8) -> ImageSource {
        let mut bytes = Vec::new();
        marker_image(faces, code, 200)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        ImageSource::Bytes(bytes)
    }

    fn face(top: i32, right: i32, bottom: i32, left: i32) -> DetectedFace {
        DetectedFace {
            location: FaceLocation { top, right, bottom, left },
            confidence: 0.9,
            landmarks: None,
        }
    }

    #[test]
    fn test_select_primary_face_largest() {
        let faces = vec![face(0, 10, 10, 0), face(0, 30, 30, 0), face(0, 20, 20, 0)];
        assert_eq!(select_primary_face(&faces), Some(&faces[1]));
    }

    #[test]
    fn test_select_primary_face_tie_keeps_first() {
        let faces = vec![face(0, 10, 10, 0), face(50, 60, 60, 50)];
        assert_eq!(select_primary_face(&faces), Some(&faces[0]));
        assert_eq!(select_primary_face(&[]), None);
    }

    #[test]
    fn test_enroll_counts_usable_images() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let mut encoder = StubEncoder::default();

        // Alice: two photos with a face, one without.
        let images = vec![png(1, 100), png(0, 100), png(1, 100)];
        let outcome = enroll(&mut encoder, &store, &Scope::Global, "Alice", &images).unwrap();

        assert_eq!(
            outcome,
            EnrollOutcome::Saved {
                path: dir.path().join("Alice_model.pkl"),
                embeddings: 2,
                skipped: 1,
            }
        );
        assert_eq!(store.load_all(&Scope::Global).unwrap()["Alice"].len(), 2);
    }

    #[test]
    fn test_enroll_uses_largest_face() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let mut encoder = StubEncoder::default();

        // Three faces; the stub makes the last one the largest.
        enroll(&mut encoder, &store, &Scope::Global, "Alice", &[png(3, 100)]).unwrap();
        let gallery = store.load_all(&Scope::Global).unwrap();
        assert_eq!(gallery["Alice"], vec![embedding_for(100, 2)]);
        assert!(location_for(2).area() > location_for(0).area());
    }

    #[test]
    fn test_enroll_no_usable_faces_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let mut encoder = StubEncoder::default();

        let images = vec![png(0, 1), ImageSource::Bytes(b"junk".to_vec())];
        let outcome = enroll(&mut encoder, &store, &Scope::Global, "Alice", &images).unwrap();

        assert_eq!(outcome, EnrollOutcome::NoUsableFaces { skipped: 2 });
        assert_eq!(outcome.model_path(), None);
        assert!(store.list(&Scope::Global).unwrap().is_empty());
    }

    #[test]
    fn test_enroll_failure_keeps_previous_model() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let mut encoder = StubEncoder::default();

        enroll(&mut encoder, &store, &Scope::Global, "Alice", &[png(1, 100)]).unwrap();
        enroll(&mut encoder, &store, &Scope::Global, "Alice", &[png(0, 100)]).unwrap();

        assert_eq!(store.load_all(&Scope::Global).unwrap()["Alice"], vec![embedding_for(100, 0)]);
    }

    #[test]
    fn test_reenroll_replaces_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let mut encoder = StubEncoder::default();

        enroll(&mut encoder, &store, &Scope::Global, "Alice", &[png(1, 10), png(1, 11), png(1, 12)]).unwrap();
        enroll(&mut encoder, &store, &Scope::Global, "Alice", &[png(1, 50)]).unwrap();

        assert_eq!(store.load_all(&Scope::Global).unwrap()["Alice"], vec![embedding_for(50, 0)]);
    }

    #[test]
    fn test_enroll_skips_unencodable_face() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let mut encoder = StubEncoder {
            unencodable: vec![0],
            ..Default::default()
        };

        let outcome = enroll(&mut encoder, &store, &Scope::Global, "Alice", &[png(1, 100), png(2, 100)]).unwrap();
        assert!(matches!(outcome, EnrollOutcome::Saved { embeddings: 1, skipped: 1, .. }));
    }

    #[test]
    fn test_enroll_into_user_scope() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let scope = Scope::resolve(Some("bob"), Some("9"));
        let mut encoder = StubEncoder::default();

        let outcome = enroll(&mut encoder, &store, &scope, "Alice", &[png(1, 100)]).unwrap();
        assert_eq!(outcome.model_path(), Some(&dir.path().join("bob_9").join("Alice_model.pkl")));
        assert!(store.load_all(&Scope::Global).unwrap().is_empty());
    }

    #[test]
    fn test_enroll_rejects_bad_name_before_inference() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let mut encoder = StubEncoder::default();

        let err = enroll(&mut encoder, &store, &Scope::Global, "../evil", &[png(1, 1)]).unwrap_err();
        assert!(matches!(err, EnrollError::Store(StoreError::InvalidName(_))));
        assert_eq!(encoder.detect_calls, 0);
    }
}
