//! Matching: attribute every face in a query image to an enrolled person.

use crate::encoder::{EncoderError, FaceEncoder};
use crate::preprocess;
use crate::types::{Embedding, Gallery, Identity, MatchResult};
use image::RgbImage;

/// Maximum embedding distance at which a face is attributed to a person.
pub const MATCH_THRESHOLD: f32 = 0.4;

/// Strategy for attributing a probe embedding to a gallery identity.
pub trait Matcher {
    /// Returns the identity and its confidence percentage in [0, 100].
    fn identify(&self, probe: &Embedding, gallery: &Gallery) -> (Identity, f32);
}

/// Nearest-neighbour rule over every stored embedding of every person.
///
/// The single closest embedding across the whole gallery decides; it must
/// be within `threshold`. Among people tied on that distance, the one that
/// sorts first by name wins.
#[derive(Debug, Clone, Copy)]
pub struct NearestNeighborMatcher {
    pub threshold: f32,
}

impl Default for NearestNeighborMatcher {
    fn default() -> Self {
        Self {
            threshold: MATCH_THRESHOLD,
        }
    }
}

impl Matcher for NearestNeighborMatcher {
    fn identify(&self, probe: &Embedding, gallery: &Gallery) -> (Identity, f32) {
        let mut best: Option<(&str, f32)> = None;

        for (name, embeddings) in gallery {
            let nearest = embeddings
                .iter()
                .map(|e| probe.distance(e))
                .fold(f32::INFINITY, f32::min);
            if nearest > self.threshold {
                continue;
            }
            if best.map_or(true, |(_, d)| nearest < d) {
                best = Some((name.as_str(), nearest));
            }
        }

        match best {
            Some((name, distance)) => (
                Identity::Known(name.to_string()),
                ((1.0 - distance) * 100.0).max(0.0),
            ),
            None => (Identity::Unknown, 0.0),
        }
    }
}

/// Faces found in one query image, plus the pixels they were found in.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub faces: Vec<MatchResult>,
    /// The image detection ran on: the brightened copy when the retry
    /// pass was needed, so boxes are drawn on matching pixels.
    pub image: RgbImage,
}

/// Detect, encode and identify every face in `image`.
///
/// When the first pass finds no face, the image is brightened once and
/// detection repeated; the second pass replaces the first.
pub fn recognize<E, M>(
    encoder: &mut E,
    matcher: &M,
    image: RgbImage,
    gallery: &Gallery,
) -> Result<Recognition, EncoderError>
where
    E: FaceEncoder + ?Sized,
    M: Matcher + ?Sized,
{
    let mut image = image;
    let mut faces = encoder.detect(&image)?;
    if faces.is_empty() {
        tracing::debug!("no faces on first pass, retrying with brightness boost");
        image = preprocess::enhance_brightness(&image);
        faces = encoder.detect(&image)?;
    }

    let mut results = Vec::with_capacity(faces.len());
    for face in &faces {
        let embedding = match encoder.encode(&image, face) {
            Ok(embedding) => embedding,
            Err(e) if e.is_face_specific() => {
                tracing::warn!(location = ?face.location, error = %e, "skipping face without encoding");
                continue;
            }
            Err(e) => return Err(e),
        };

        let (identity, confidence) = matcher.identify(&embedding, gallery);
        tracing::debug!(%identity, confidence, location = ?face.location, "face identified");
        results.push(MatchResult {
            identity,
            confidence,
            location: face.location,
        });
    }

    Ok(Recognition {
        faces: results,
        image,
    })
}
