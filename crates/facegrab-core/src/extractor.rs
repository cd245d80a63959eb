//! Image file → face embedding.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::Embedding;
use image::{ImageReader, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error("cannot decode image {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// How embeddings are combined when an image contains several faces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceSelection {
    /// Average every detected face, then L2-normalize.
    #[default]
    Mean,
    /// Use only the highest-confidence face.
    Primary,
}

impl FromStr for FaceSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(FaceSelection::Mean),
            "primary" | "first" => Ok(FaceSelection::Primary),
            other => Err(format!("unknown face selection {other:?} (expected mean or primary)")),
        }
    }
}

/// Converts an image on disk into a single embedding.
///
/// Implementations must return [`ExtractError::NoFaceDetected`] rather than an
/// arbitrary vector when the image holds no face.
pub trait EmbeddingExtractor {
    fn extract(&mut self, image: &Path) -> Result<Embedding, ExtractError>;
}

/// SCRFD detection followed by ArcFace embedding.
pub struct FaceExtractor {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    selection: FaceSelection,
}

impl FaceExtractor {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path, selection: FaceSelection) -> Result<Self, ExtractError> {
        let detector = FaceDetector::load(&model_dir.join(SCRFD_MODEL_FILE))?;
        let recognizer = FaceRecognizer::load(&model_dir.join(ARCFACE_MODEL_FILE))?;
        Ok(Self {
            detector,
            recognizer,
            selection,
        })
    }
}

impl EmbeddingExtractor for FaceExtractor {
    fn extract(&mut self, path: &Path) -> Result<Embedding, ExtractError> {
        let image = decode_rgb(path)?;
        let faces = self.detector.detect(&image)?;
        tracing::debug!(path = %path.display(), faces = faces.len(), "faces detected");

        let chosen = match self.selection {
            FaceSelection::Mean => &faces[..],
            FaceSelection::Primary => &faces[..faces.len().min(1)],
        };
        let embeddings = chosen
            .iter()
            .map(|face| self.recognizer.extract(&image, face))
            .collect::<Result<Vec<_>, _>>()?;

        let embedding =
            Embedding::normalized_mean(&embeddings).ok_or(ExtractError::NoFaceDetected)?;
        tracing::info!(
            path = %path.display(),
            faces = embeddings.len(),
            dim = embedding.dimension(),
            "embedding extracted"
        );
        Ok(embedding)
    }
}

/// Decode an image, sniffing the format from its content so a file whose
/// extension disagrees with its bytes still opens.
pub fn decode_rgb(path: &Path) -> Result<RgbImage, ExtractError> {
    let decode_error = |source| ExtractError::Decode {
        path: path.display().to_string(),
        source,
    };
    let reader = ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| decode_error(image::ImageError::IoError(e)))?;
    Ok(reader.decode().map_err(decode_error)?.to_rgb8())
}
