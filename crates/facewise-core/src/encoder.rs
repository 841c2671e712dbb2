//! Single-face encoding for registration.

use crate::frame::{self, FrameError};
use crate::pipeline::{FacePipeline, PipelineError};
use crate::types::{FaceLocation, ENCODING_DIM};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("No faces detected in the image. Please try again.")]
    NoFace,
    #[error("Multiple faces detected. Please ensure only one face is in the image.")]
    MultipleFaces(usize),
    #[error("Image file not found")]
    ImageNotFound,
    #[error("Error processing image: {0}")]
    Frame(FrameError),
    #[error("Error processing image: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("Error processing image: expected {ENCODING_DIM}-dim encoding, got {0}")]
    Dimension(usize),
}

impl From<FrameError> for EncodeError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::NotFound(_) => EncodeError::ImageNotFound,
            other => EncodeError::Frame(other),
        }
    }
}

/// Encoding of the single face in a registration image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedFace {
    pub encoding: Vec<f32>,
    pub name: String,
    pub location: FaceLocation,
}

/// Encode the only face in `image`. Zero or several faces is an error.
pub fn encode_face<P: FacePipeline>(
    pipeline: &mut P,
    image: &RgbImage,
    name: &str,
) -> Result<EncodedFace, EncodeError> {
    let faces = pipeline.detect(image)?;
    let face = match faces.as_slice() {
        [] => {
            tracing::warn!(name, "no faces detected");
            return Err(EncodeError::NoFace);
        }
        [face] => face,
        many => {
            tracing::warn!(name, count = many.len(), "multiple faces detected");
            return Err(EncodeError::MultipleFaces(many.len()));
        }
    };

    tracing::info!(name, confidence = face.confidence, "generating face encoding");
    let encoding = pipeline.encode(image, face)?;
    if encoding.len() != ENCODING_DIM {
        return Err(EncodeError::Dimension(encoding.len()));
    }

    Ok(EncodedFace {
        encoding: encoding.values,
        name: name.to_string(),
        location: face.location(image.width(), image.height()),
    })
}

/// Load `path` and encode its only face.
pub fn encode_file<P: FacePipeline>(
    pipeline: &mut P,
    path: &Path,
    name: &str,
) -> Result<EncodedFace, EncodeError> {
    tracing::info!(path = %path.display(), "loading image");
    let image = frame::load_path(path)?;
    encode_face(pipeline, &image, name)
}

/// Write `<stem>_verified.<ext>` next to `path` with the face outlined in green.
pub fn annotate(path: &Path, location: &FaceLocation) -> Result<PathBuf, EncodeError> {
    let mut image = frame::load_path(path)?;
    let width = location.right.saturating_sub(location.left).max(1);
    let height = location.bottom.saturating_sub(location.top).max(1);
    let rect = Rect::at(location.left as i32, location.top as i32).of_size(width, height);
    draw_hollow_rect_mut(&mut image, rect, Rgb([0, 255, 0]));

    let out = verified_path(path);
    image
        .save(&out)
        .map_err(|e| EncodeError::Frame(FrameError::Image(e)))?;
    tracing::info!(path = %out.display(), "saved verification image");
    Ok(out)
}

fn verified_path(path: &Path) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("face");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("jpg");
    path.with_file_name(format!("{stem}_verified.{ext}"))
}
