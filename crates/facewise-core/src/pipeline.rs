//! Detection + encoding seam.
//!
//! The encoder and recognizer only talk to [`FacePipeline`], so the ONNX
//! models can be swapped for a stub in tests.

use crate::detector::{DetectorError, FaceDetector};
use crate::embedder::{EmbedderError, FaceEmbedder};
use crate::types::{BoundingBox, Encoding};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder: {0}")]
    Embedder(#[from] EmbedderError),
}

pub trait FacePipeline {
    /// Detect every face in the frame, highest confidence first.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, PipelineError>;

    /// Encode one detected face.
    fn encode(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Encoding, PipelineError>;
}

/// SCRFD detector + embedding network.
pub struct OnnxPipeline {
    detector: FaceDetector,
    embedder: FaceEmbedder,
}

impl OnnxPipeline {
    pub fn load(detector_path: &Path, embedder_path: &Path) -> Result<Self, PipelineError> {
        Ok(Self {
            detector: FaceDetector::load(detector_path)?,
            embedder: FaceEmbedder::load(embedder_path)?,
        })
    }
}

impl FacePipeline for OnnxPipeline {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, PipelineError> {
        Ok(self.detector.detect(image)?)
    }

    fn encode(&mut self, image: &RgbImage, face: &BoundingBox) -> Result<Encoding, PipelineError> {
        Ok(self.embedder.extract(image, face)?)
    }
}

/// Scripted pipeline for tests: returns the configured faces for every frame
/// and hands out encodings in order.
#[cfg(test)]
pub(crate) mod stub {
    use super::*;
    use std::collections::VecDeque;

    pub struct StubPipeline {
        pub faces: Vec<BoundingBox>,
        pub encodings: VecDeque<Encoding>,
        pub frames_seen: Vec<(u32, u32)>,
    }

    impl StubPipeline {
        pub fn new(faces: Vec<BoundingBox>, encodings: Vec<Encoding>) -> Self {
            Self { faces, encodings: encodings.into(), frames_seen: Vec::new() }
        }
    }

    pub fn face_at(x: f32, y: f32, size: f32) -> BoundingBox {
        BoundingBox {
            x, y, width: size, height: size, confidence: 0.99,
            landmarks: Some([(x, y); 5]),
        }
    }

    impl FacePipeline for StubPipeline {
        fn detect(&mut self, image: &RgbImage) -> Result<Vec<BoundingBox>, PipelineError> {
            self.frames_seen.push(image.dimensions());
            Ok(self.faces.clone())
        }

        fn encode(&mut self, _image: &RgbImage, _face: &BoundingBox) -> Result<Encoding, PipelineError> {
            self.encodings
                .pop_front()
                .ok_or_else(|| PipelineError::Embedder(EmbedderError::InferenceFailed("no scripted encoding".into())))
        }
    }
}
