//! Image loading and the two photometric fixes applied before detection.

use image::{DynamicImage, ImageError, ImageReader, RgbImage};
use std::fmt;
use std::path::PathBuf;

/// Brightness multiplier applied to the HSV value channel on the retry pass.
pub const BRIGHTNESS_BOOST: f32 = 1.5;

/// Where an uploaded or local image lives.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl ImageSource {
    /// Decode the image into 8-bit RGB.
    pub fn load_rgb(&self) -> Result<RgbImage, ImageError> {
        let image = match self {
            // Upload temp files carry a fixed suffix, so sniff the format
            ImageSource::Path(path) => ImageReader::open(path)?.with_guessed_format()?.decode()?,
            ImageSource::Bytes(bytes) => image::load_from_memory(bytes)?,
        };
        Ok(image.to_rgb8())
    }
}

impl fmt::Display for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Path(path) => write!(f, "{}", path.display()),
            ImageSource::Bytes(bytes) => write!(f, "<{} byte buffer>", bytes.len()),
        }
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::Path(path)
    }
}

/// Flatten lighting differences between enrollment photos: equalize the
/// luma histogram, then hand the result back as three identical channels.
pub fn equalize_illumination(image: &RgbImage) -> RgbImage {
    let gray = image::imageops::grayscale(image);
    let equalized = imageproc::contrast::equalize_histogram(&gray);
    DynamicImage::ImageLuma8(equalized).to_rgb8()
}

/// Scale the HSV value channel by [`BRIGHTNESS_BOOST`], clamped to 255.
///
/// Scaling all three channels of a pixel by the same factor leaves hue and
/// saturation untouched, so the HSV round trip reduces to a per-pixel gain
/// of `min(1.5·V, 255) / V` with `V = max(R, G, B)`.
pub fn enhance_brightness(image: &RgbImage) -> RgbImage {
    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        let value = pixel.0.iter().copied().max().unwrap_or(0) as f32;
        if value == 0.0 {
            continue;
        }
        let gain = (value * BRIGHTNESS_BOOST).min(255.0) / value;
        for channel in pixel.0.iter_mut() {
            *channel = (*channel as f32 * gain).round().min(255.0) as u8;
        }
    }
    out
}
