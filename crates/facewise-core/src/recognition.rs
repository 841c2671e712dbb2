//! Frame recognition against the registered gallery.

use crate::frame::{self, FrameError};
use crate::pipeline::{FacePipeline, PipelineError};
use crate::store::{FaceStore, StoreError};
use crate::types::{EuclideanMatcher, KnownFace, Matcher};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizeError {
    #[error("Processing too many frames, please slow down")]
    RateLimited,
    #[error("Invalid image data")]
    InvalidImage(#[source] FrameError),
    #[error("Recognition error: {0}")]
    Pipeline(#[from] PipelineError),
}

#[derive(Debug, Clone)]
pub struct RecognizerConfig {
    /// Minimum confidence (exclusive) for a named match.
    pub threshold: f32,
    /// Minimum time between two processed frames.
    pub min_interval: Duration,
    /// Frames are shrunk by this factor before detection.
    pub downscale: u32,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            min_interval: Duration::from_millis(100),
            downscale: 4,
        }
    }
}

/// One face found in a frame, in original-frame coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedFace {
    pub name: String,
    pub confidence: f32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recognition {
    pub faces: Vec<RecognizedFace>,
    /// Seconds spent in detection and matching.
    pub process_time: f64,
}

/// Admits at most one frame per interval. Rejected frames are dropped, not queued.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last {
            if now.saturating_duration_since(last) < self.interval {
                return false;
            }
        }
        self.last = Some(now);
        true
    }
}

pub struct Recognizer<P> {
    pipeline: P,
    config: RecognizerConfig,
    known: Vec<KnownFace>,
    limiter: RateLimiter,
}

impl<P: FacePipeline> Recognizer<P> {
    pub fn new(pipeline: P, config: RecognizerConfig) -> Self {
        let limiter = RateLimiter::new(config.min_interval);
        Self {
            pipeline,
            config,
            known: Vec::new(),
            limiter,
        }
    }

    /// Replace the gallery with the store's current contents.
    pub fn load_known_faces(&mut self, store: &FaceStore) -> Result<usize, StoreError> {
        self.known = store.known_faces()?;
        tracing::info!(count = self.known.len(), "loaded known faces");
        Ok(self.known.len())
    }

    pub fn set_known_faces(&mut self, known: Vec<KnownFace>) {
        self.known = known;
    }

    pub fn known_count(&self) -> usize {
        self.known.len()
    }

    /// Recognize a base64 frame (plain or data URL).
    pub fn recognize_base64(&mut self, payload: &str) -> Result<Recognition, RecognizeError> {
        self.admit()?;
        let image = frame::decode_base64(payload).map_err(|err| {
            tracing::error!(error = %err, "failed to decode frame");
            RecognizeError::InvalidImage(err)
        })?;
        self.process(&image)
    }

    /// Recognize an already-decoded frame.
    pub fn recognize(&mut self, image: &RgbImage) -> Result<Recognition, RecognizeError> {
        self.admit()?;
        self.process(image)
    }

    fn admit(&mut self) -> Result<(), RecognizeError> {
        if self.limiter.try_acquire() {
            Ok(())
        } else {
            tracing::debug!("frame dropped by rate limiter");
            Err(RecognizeError::RateLimited)
        }
    }

    fn process(&mut self, image: &RgbImage) -> Result<Recognition, RecognizeError> {
        let factor = self.config.downscale.max(1);
        let small = frame::downscale(image, factor);

        let started = Instant::now();
        let detections = self.pipeline.detect(&small)?;

        let mut faces = Vec::with_capacity(detections.len());
        for detection in &detections {
            let encoding = self.pipeline.encode(&small, detection)?;
            let result = EuclideanMatcher.compare(&encoding, &self.known, self.config.threshold);
            let location = detection.location(small.width(), small.height()).scaled(factor);

            faces.push(RecognizedFace {
                name: result.display_name().to_string(),
                confidence: result.confidence,
                top: location.top,
                right: location.right,
                bottom: location.bottom,
                left: location.left,
            });
        }

        let process_time = started.elapsed().as_secs_f64();
        tracing::info!(faces = faces.len(), process_time, "frame recognized");
        Ok(Recognition { faces, process_time })
    }
}
