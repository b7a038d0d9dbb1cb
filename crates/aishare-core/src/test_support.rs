//! Deterministic stand-in for the ONNX encoder.
//!
//! Test images are uniform gray; the facts the stub reports are carried by
//! the image dimensions, which survive every photometric transform:
//! `width = BASE_WIDTH + code` and `height = BASE_HEIGHT + faces`. Faces are
//! only visible when the gray level is at least [`VISIBLE_LEVEL`].
//!
//! Face `i` sits at `left = 2 + 20·i`, `top = 2`, with side `8 + 4·i`, so
//! later faces are larger. Its embedding is `[code / 255, i]`.

use crate::encoder::{EncoderError, FaceEncoder};
use crate::recognizer::RecognizerError;
use crate::types::{DetectedFace, Embedding, FaceLocation};
use image::{Rgb, RgbImage};

pub const VISIBLE_LEVEL: u8 = 150;
pub const BASE_WIDTH: u32 = 200;
pub const BASE_HEIGHT: u32 = 40;

/// Build a uniform test image holding `faces` faces of identity `code`.
pub fn marker_image(faces: u8, code: u8, level: u8) -> RgbImage {
    RgbImage::from_pixel(
        BASE_WIDTH + code as u32,
        BASE_HEIGHT + faces as u32,
        Rgb([level, level, level]),
    )
}

/// Embedding the stub produces for face `index` of an image with `code`.
pub fn embedding_for(code: u8, index: usize) -> Embedding {
    Embedding::new(vec![code as f32 / 255.0, index as f32])
}

pub fn location_for(index: usize) -> FaceLocation {
    let left = 2 + 20 * index as i32;
    let side = 8 + 4 * index as i32;
    FaceLocation { top: 2, right: left + side, bottom: 2 + side, left }
}

#[derive(Default)]
pub struct StubEncoder {
    /// Face indices whose encoding fails as if they had no landmarks.
    pub unencodable: Vec<usize>,
    pub detect_calls: usize,
}

impl FaceEncoder for StubEncoder {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, EncoderError> {
        self.detect_calls += 1;
        if image.get_pixel(0, 0)[0] < VISIBLE_LEVEL {
            return Ok(Vec::new());
        }
        let faces = image.height().saturating_sub(BASE_HEIGHT) as usize;
        Ok((0..faces)
            .map(|i| DetectedFace {
                location: location_for(i),
                confidence: 0.9,
                landmarks: None,
            })
            .collect())
    }

    fn encode(&mut self, image: &RgbImage, face: &DetectedFace) -> Result<Embedding, EncoderError> {
        let index = ((face.location.left - 2) / 20) as usize;
        if self.unencodable.contains(&index) {
            return Err(RecognizerError::NoLandmarks.into());
        }
        let code = image.width().saturating_sub(BASE_WIDTH) as u8;
        Ok(embedding_for(code, index))
    }
}
