use serde::{Deserialize, Serialize};

/// Length of every face encoding produced by the embedder and kept in the store.
pub const ENCODING_DIM: usize = 128;

/// Label reported for a face that did not match anyone in the gallery.
pub const UNKNOWN_NAME: &str = "Unknown";

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    /// Integer pixel location of this box, clamped to the image bounds.
    pub fn location(&self, image_width: u32, image_height: u32) -> FaceLocation {
        let max_x = image_width.saturating_sub(1) as f32;
        let max_y = image_height.saturating_sub(1) as f32;
        FaceLocation {
            top: self.y.clamp(0.0, max_y).round() as u32,
            left: self.x.clamp(0.0, max_x).round() as u32,
            bottom: (self.y + self.height).clamp(0.0, max_y).round() as u32,
            right: (self.x + self.width).clamp(0.0, max_x).round() as u32,
        }
    }
}

/// Face location in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceLocation {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceLocation {
    /// Map a location found on a downscaled frame back onto the original frame.
    pub fn scaled(self, factor: u32) -> Self {
        Self {
            top: self.top * factor,
            right: self.right * factor,
            bottom: self.bottom * factor,
            left: self.left * factor,
        }
    }
}

/// Face encoding vector (128-dimensional, L2-normalized).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Encoding {
    pub values: Vec<f32>,
}

impl Encoding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Compute Euclidean distance between two encodings.
    pub fn euclidean_distance(&self, other: &Encoding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Serialize as the JSON array string kept in the `faces.encoding` column.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.values)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Vec<f32>>(raw).map(Self::new)
    }
}

/// A registered face as stored in the `faces` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceRecord {
    pub id: i64,
    pub name: String,
    /// `YYYY-MM-DD HH:MM:SS`, UTC.
    pub timestamp: String,
    pub encoding: Encoding,
}

/// Gallery entry used for matching.
#[derive(Debug, Clone)]
pub struct KnownFace {
    pub id: i64,
    pub name: String,
    pub encoding: Encoding,
}

impl From<FaceRecord> for KnownFace {
    fn from(record: FaceRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            encoding: record.encoding,
        }
    }
}

/// Result of matching a probe encoding against a gallery.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub matched: bool,
    /// `1 - distance` to the nearest gallery entry, 0.0 for an empty gallery.
    pub confidence: f32,
    /// ID of the matched face (if any).
    pub face_id: Option<i64>,
    /// Name of the matched face (if any).
    pub name: Option<String>,
}

impl MatchResult {
    pub fn unknown(confidence: f32) -> Self {
        Self {
            matched: false,
            confidence,
            face_id: None,
            name: None,
        }
    }

    /// Matched name, or `"Unknown"`.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_NAME)
    }
}

/// Strategy for comparing a probe encoding against a gallery of known faces.
pub trait Matcher {
    fn compare(&self, probe: &Encoding, gallery: &[KnownFace], threshold: f32) -> MatchResult;
}

/// Nearest-neighbour matcher over Euclidean distance.
///
/// Confidence is `1 - d` for the closest entry; a match needs confidence
/// strictly above the threshold. Entries whose length differs from the probe
/// are ignored.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, probe: &Encoding, gallery: &[KnownFace], threshold: f32) -> MatchResult {
        let nearest = gallery
            .iter()
            .filter(|face| face.encoding.len() == probe.len())
            .map(|face| (face, probe.euclidean_distance(&face.encoding)))
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        let Some((face, distance)) = nearest else {
            return MatchResult::unknown(0.0);
        };

        let confidence = 1.0 - distance;
        if confidence > threshold {
            MatchResult {
                matched: true,
                confidence,
                face_id: Some(face.id),
                name: Some(face.name.clone()),
            }
        } else {
            MatchResult::unknown(confidence)
        }
    }
}
