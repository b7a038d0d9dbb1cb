use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Face location in source-image pixels, in (top, right, bottom, left) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceLocation {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl FaceLocation {
    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }

    /// Bounding-box area, used to pick the primary face during enrollment.
    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }
}

/// A face found by the detector, with optional five-point landmarks:
/// [left_eye, right_eye, nose, left_mouth, right_mouth].
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub location: FaceLocation,
    pub confidence: f32,
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Embeddings of different dimension are never comparable and report
    /// an infinite distance.
    pub fn distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Every enrolled person's embeddings, keyed by person name.
///
/// Iteration is in lexicographic name order, which keeps matching
/// deterministic when two people tie on distance.
pub type Gallery = BTreeMap<String, Vec<Embedding>>;

/// Who a detected face was attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identity {
    Known(String),
    Unknown,
}

impl Identity {
    pub const UNKNOWN_LABEL: &'static str = "unknown";

    pub fn name(&self) -> &str {
        match self {
            Identity::Known(name) => name,
            Identity::Unknown => Self::UNKNOWN_LABEL,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Identity::Known(_))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of matching one detected face against a gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub identity: Identity,
    /// Confidence percentage in [0, 100]; always 0 for unknown faces.
    pub confidence: f32,
    pub location: FaceLocation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance_identical() {
        let a = Embedding::new(vec![0.3, 0.4, 0.5]);
        assert_eq!(a.distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_distance_known_value() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_distance_dimension_mismatch_is_infinite() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![1.0, 0.0, 0.0]);
        assert!(a.distance(&b).is_infinite());
    }

    #[test]
    fn test_location_area() {
        let loc = FaceLocation { top: 10, right: 50, bottom: 40, left: 20 };
        assert_eq!(loc.width(), 30);
        assert_eq!(loc.height(), 30);
        assert_eq!(loc.area(), 900);
    }

    #[test]
    fn test_location_inverted_has_zero_area() {
        let loc = FaceLocation { top: 40, right: 10, bottom: 10, left: 20 };
        assert_eq!(loc.area(), 0);
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(Identity::Known("Alice".into()).to_string(), "Alice");
        assert_eq!(Identity::Unknown.to_string(), "unknown");
    }

    #[test]
    fn test_embedding_json_omits_missing_version() {
        let json = serde_json::to_string(&Embedding::new(vec![1.0])).unwrap();
        assert_eq!(json, r#"{"values":[1.0]}"#);
        let back: Embedding = serde_json::from_str(&json).unwrap();
        assert_eq!(back.model_version, None);
    }
}
