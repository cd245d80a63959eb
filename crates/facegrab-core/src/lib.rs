//! facegrab-core — Face detection and embedding extraction.
//!
//! Uses SCRFD for face detection and ArcFace for face embeddings,
//! both running via ONNX Runtime for CPU inference.

pub mod alignment;
pub mod detector;
pub mod extractor;
pub mod recognizer;
pub mod types;

use std::path::PathBuf;

pub use extractor::{EmbeddingExtractor, ExtractError, FaceExtractor, FaceSelection};
pub use types::{BoundingBox, Embedding};

/// System-wide model directory used when none is configured.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/usr/share/facegrab/models")
}
