//! aishare-core — Face enrollment and recognition library.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings, both
//! running via ONNX Runtime on the CPU. Enrolled people are kept as flat
//! per-person embedding files; recognition is a nearest-neighbour search
//! over them, and results can be drawn back onto the query image.

pub mod alignment;
pub mod annotate;
pub mod detector;
pub mod encoder;
pub mod enroll;
pub mod matcher;
pub mod preprocess;
pub mod recognizer;
pub mod store;
pub mod types;

#[cfg(test)]
mod test_support;

pub use annotate::{encode_png, encode_png_base64, AnnotateError, Annotator};
pub use detector::FaceDetector;
pub use encoder::{default_onnx_dir, EncoderError, FaceEncoder, OnnxEncoder};
pub use enroll::{enroll, EnrollError, EnrollOutcome};
pub use matcher::{recognize, Matcher, NearestNeighborMatcher, Recognition, MATCH_THRESHOLD};
pub use preprocess::ImageSource;
pub use recognizer::FaceRecognizer;
pub use store::{ModelStore, Scope, StoreError};
pub use types::{DetectedFace, Embedding, FaceLocation, Gallery, Identity, MatchResult};
