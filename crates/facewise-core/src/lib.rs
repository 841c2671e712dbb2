//! facewise-core: face registration, recognition and the face store.
//!
//! Detection (SCRFD) and 128-d encoding run through ONNX Runtime; matching is
//! nearest-neighbour over Euclidean distance against faces kept in SQLite.

mod alignment;
pub mod config;
pub mod detector;
pub mod embedder;
pub mod encoder;
pub mod frame;
pub mod pipeline;
pub mod protocol;
pub mod recognition;
pub mod store;
pub mod types;

pub use config::{ChatSettings, Config};
pub use encoder::{encode_face, encode_file, EncodeError, EncodedFace};
pub use pipeline::{FacePipeline, OnnxPipeline, PipelineError};
pub use protocol::Reply;
pub use recognition::{RecognizeError, Recognition, RecognizedFace, Recognizer, RecognizerConfig};
pub use store::{FaceStore, FaceSummary, StoreError};
pub use types::{
    BoundingBox, Encoding, EuclideanMatcher, FaceLocation, FaceRecord, KnownFace, MatchResult,
    Matcher, ENCODING_DIM, UNKNOWN_NAME,
};
