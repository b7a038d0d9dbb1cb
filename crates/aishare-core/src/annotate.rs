//! Draw match results onto images and encode them for transport.

use crate::types::{Identity, MatchResult};
use ab_glyph::{FontArc, InvalidFont, PxScale};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{ImageError, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use thiserror::Error;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BOX_THICKNESS: i32 = 2;
const LABEL_SCALE: f32 = 24.0;
const LABEL_PADDING: u32 = 10;
/// Label height used when no font is available to measure text.
const FALLBACK_LABEL_HEIGHT: u32 = 18;

/// Fonts tried, in order, when none is configured.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Error, Debug)]
pub enum AnnotateError {
    #[error("cannot read font {}: {source}", .path.display())]
    FontIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid font {}: {source}", .path.display())]
    InvalidFont {
        path: PathBuf,
        #[source]
        source: InvalidFont,
    },
    #[error("image encoding failed: {0}")]
    Encode(#[from] ImageError),
}

/// Text drawn above a face box.
pub fn label(result: &MatchResult) -> String {
    match &result.identity {
        Identity::Known(name) => format!("{name} ({:.2}%)", result.confidence),
        Identity::Unknown => Identity::UNKNOWN_LABEL.to_string(),
    }
}

/// Draws face boxes and labels.
#[derive(Clone, Default)]
pub struct Annotator {
    font: Option<FontArc>,
}

impl Annotator {
    /// Without a font only boxes and label backgrounds are drawn.
    pub fn new(font: Option<FontArc>) -> Self {
        Self { font }
    }

    pub fn from_font_file(path: &Path) -> Result<Self, AnnotateError> {
        let data = std::fs::read(path).map_err(|source| AnnotateError::FontIo {
            path: path.to_path_buf(),
            source,
        })?;
        let font = FontArc::try_from_vec(data).map_err(|source| AnnotateError::InvalidFont {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(Some(font)))
    }

    /// Use `configured` if given, else the first usable system font.
    pub fn discover(configured: Option<&Path>) -> Result<Self, AnnotateError> {
        if let Some(path) = configured {
            return Self::from_font_file(path);
        }
        for candidate in SYSTEM_FONTS.iter().map(Path::new).filter(|p| p.is_file()) {
            match Self::from_font_file(candidate) {
                Ok(annotator) => {
                    tracing::info!(font = %candidate.display(), "label font loaded");
                    return Ok(annotator);
                }
                Err(e) => tracing::debug!(error = %e, "skipping font"),
            }
        }
        tracing::warn!("no label font found; annotated images will carry boxes without text");
        Ok(Self::new(None))
    }

    /// Return a copy of `image` with every result drawn on it.
    pub fn annotate(&self, image: &RgbImage, results: &[MatchResult]) -> RgbImage {
        let mut canvas = image.clone();
        for result in results {
            self.draw_one(&mut canvas, result);
        }
        canvas
    }

    fn draw_one(&self, canvas: &mut RgbImage, result: &MatchResult) {
        let loc = result.location;
        for inset in 0..BOX_THICKNESS {
            let w = (loc.width() - 2 * inset).max(1) as u32;
            let h = (loc.height() - 2 * inset).max(1) as u32;
            draw_hollow_rect_mut(canvas, Rect::at(loc.left + inset, loc.top + inset).of_size(w, h), BOX_COLOR);
        }

        let text = label(result);
        let (text_w, text_h) = match &self.font {
            Some(font) => text_size(PxScale::from(LABEL_SCALE), font, &text),
            None => (loc.width().max(1) as u32, FALLBACK_LABEL_HEIGHT),
        };
        let bar_h = text_h + LABEL_PADDING;
        // Above the box when there is room, otherwise just inside its top edge.
        let bar_top = if loc.top >= bar_h as i32 { loc.top - bar_h as i32 } else { loc.top };
        draw_filled_rect_mut(
            canvas,
            Rect::at(loc.left, bar_top).of_size(text_w.max(1), bar_h),
            BOX_COLOR,
        );

        if let Some(font) = &self.font {
            let text_top = bar_top + (LABEL_PADDING / 2) as i32;
            draw_text_mut(canvas, TEXT_COLOR, loc.left, text_top, PxScale::from(LABEL_SCALE), font, &text);
        }
    }
}

/// Encode an RGB image as PNG.
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, AnnotateError> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

/// Encode an RGB image as base64 PNG for embedding in JSON.
pub fn encode_png_base64(image: &RgbImage) -> Result<String, AnnotateError> {
    Ok(STANDARD.encode(encode_png(image)?))
}
