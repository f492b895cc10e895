//! facematch-core — Face enrollment templates and 1:1 verification.
//!
//! Enrollment averages the ArcFace embeddings of several photos into one
//! stored template; verification scores a probe photo by its Euclidean
//! distance to that template. Detection (SCRFD) and recognition (ArcFace)
//! run via ONNX Runtime on the CPU.

pub mod alignment;
pub mod decode;
pub mod detector;
pub mod embedder;
pub mod engine;
pub mod pipeline;
pub mod recognizer;
pub mod store;
pub mod types;
pub mod vector;

pub use decode::{DecodeError, ImageSource};
pub use embedder::{EmbedError, Embedder, MultiFacePolicy, OnnxEmbedder};
pub use engine::{spawn_engine, EngineHandle};
pub use pipeline::{ErrorKind, Pipeline, PipelineError, Timeouts};
pub use recognizer::ARCFACE_EMBEDDING_DIM;
pub use store::{StoreError, TemplateStore};
pub use types::{BoundingBox, Embedding, Template};
pub use vector::VectorError;

/// File name of the SCRFD detection model inside a model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// File name of the ArcFace recognition model inside a model directory.
pub const RECOGNIZER_MODEL_FILE: &str = "w600k_r50.onnx";

/// Default location of the ONNX model files.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/usr/share/facematch/models")
}
