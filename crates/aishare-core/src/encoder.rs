//! The face encoder seam: detection plus embedding extraction.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{DetectedFace, Embedding};
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the SCRFD detection model inside the ONNX directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model inside the ONNX directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

/// Default directory for the ONNX files: `$XDG_DATA_HOME/aishare/models`,
/// falling back to `~/.local/share/aishare/models`.
pub fn default_onnx_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("aishare/models")
}

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

impl EncoderError {
    /// Whether only the face being encoded is unusable, as opposed to the
    /// encoder itself failing. Face-specific failures are skipped by callers.
    pub fn is_face_specific(&self) -> bool {
        matches!(self, Self::Recognizer(e) if e.is_face_specific())
    }
}

/// Strategy for locating faces in an image and turning them into embeddings.
pub trait FaceEncoder {
    /// Locate every face in the image, in detection order.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, EncoderError>;

    /// Compute the embedding of one detected face.
    fn encode(&mut self, image: &RgbImage, face: &DetectedFace) -> Result<Embedding, EncoderError>;
}

/// SCRFD detection + ArcFace recognition, both on ONNX Runtime.
pub struct OnnxEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxEncoder {
    /// Load both models from `onnx_dir`. Fails fast if either is missing.
    pub fn load(onnx_dir: &Path, intra_threads: usize) -> Result<Self, EncoderError> {
        let detector = FaceDetector::load(&onnx_dir.join(DETECTOR_MODEL_FILE), intra_threads)?;
        let recognizer = FaceRecognizer::load(&onnx_dir.join(RECOGNIZER_MODEL_FILE), intra_threads)?;
        Ok(Self { detector, recognizer })
    }
}

impl FaceEncoder for OnnxEncoder {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, EncoderError> {
        Ok(self.detector.detect(image)?)
    }

    fn encode(&mut self, image: &RgbImage, face: &DetectedFace) -> Result<Embedding, EncoderError> {
        Ok(self.recognizer.extract(image, face)?)
    }
}
