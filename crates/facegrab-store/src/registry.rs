//! Registration and recognition: embedding → index → metadata.

use crate::index::{FlatIndex, IndexError};
use crate::metadata::{FaceRecord, MetadataError, MetadataStore};
use crate::uploads::{accepted_extension, UploadDir};
use crate::Config;
use facegrab_core::{EmbeddingExtractor, ExtractError};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("unsupported file type {0:?}; allowed: .jpg, .jpeg, .png, .webp")]
    UnsupportedFileType(String),
    #[error("name must not be empty")]
    EmptyName,
    #[error("no face detected in the image")]
    NoFaceDetected,
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("embedding has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding extraction failed: {0}")]
    Extract(ExtractError),
    #[error("vector index: {0}")]
    Index(IndexError),
    #[error("metadata store: {0}")]
    Metadata(#[from] MetadataError),
    #[error("storing upload: {0}")]
    Upload(#[from] std::io::Error),
}

impl From<ExtractError> for RegistryError {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::NoFaceDetected => RegistryError::NoFaceDetected,
            decode @ ExtractError::Decode { .. } => RegistryError::InvalidImage(decode.to_string()),
            other => RegistryError::Extract(other),
        }
    }
}

impl From<IndexError> for RegistryError {
    fn from(e: IndexError) -> Self {
        match e {
            IndexError::DimensionMismatch { expected, actual } => {
                RegistryError::DimensionMismatch { expected, actual }
            }
            other => RegistryError::Index(other),
        }
    }
}

impl RegistryError {
    /// Whether the caller sent something unusable, as opposed to a server-side failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RegistryError::UnsupportedFileType(_)
                | RegistryError::EmptyName
                | RegistryError::NoFaceDetected
                | RegistryError::InvalidImage(_)
                | RegistryError::DimensionMismatch { .. }
        )
    }
}

/// A successful registration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Registration {
    pub name: String,
    pub face_id: i64,
    pub slot: usize,
}

/// Outcome of a recognition query.
#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    /// Empty index, or the nearest neighbour is beyond the threshold.
    NoMatch,
    /// Nearest neighbour within threshold, but its slot or face has no metadata.
    Unknown { distance: f32 },
    Match {
        name: String,
        face_id: i64,
        distance: f32,
    },
}

impl Recognition {
    /// Label reported to clients.
    pub fn label(&self) -> &str {
        match self {
            Recognition::NoMatch => "No match",
            Recognition::Unknown { .. } => "Unknown",
            Recognition::Match { name, .. } => name,
        }
    }

    pub fn distance(&self) -> Option<f32> {
        match self {
            Recognition::NoMatch => None,
            Recognition::Unknown { distance } | Recognition::Match { distance, .. } => {
                Some(*distance)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistryStatus {
    pub faces: usize,
    pub vectors: usize,
    pub dimension: Option<usize>,
    pub threshold: Option<f32>,
}

/// Owns the extractor and both stores. All operations take `&mut self`, so
/// one owner serializes every index and database write.
pub struct FaceRegistry<E> {
    extractor: E,
    index: FlatIndex,
    metadata: MetadataStore,
    uploads: UploadDir,
    threshold: Option<f32>,
}

impl<E: EmbeddingExtractor> FaceRegistry<E> {
    pub fn new(
        extractor: E,
        index: FlatIndex,
        metadata: MetadataStore,
        uploads: UploadDir,
        threshold: Option<f32>,
    ) -> Self {
        Self {
            extractor,
            index,
            metadata,
            uploads,
            threshold,
        }
    }

    /// Open the index and database named by `config`, warning about slots
    /// left without metadata by an interrupted registration.
    pub fn open(extractor: E, config: &Config) -> Result<Self, RegistryError> {
        let index = FlatIndex::open(&config.index_path, config.dimension)?;
        let metadata = MetadataStore::open(&config.db_path)?;

        let unmapped = metadata.unmapped_slots(index.len())?;
        if !unmapped.is_empty() {
            tracing::warn!(
                count = unmapped.len(),
                slots = ?unmapped,
                "index slots without metadata; they will be reported as Unknown"
            );
        }

        Ok(Self::new(
            extractor,
            index,
            metadata,
            UploadDir::new(&config.upload_dir),
            config.distance_threshold,
        ))
    }

    /// Validate, store, and register an uploaded image.
    ///
    /// Nothing is written and the extractor is not invoked unless the file
    /// name carries an accepted extension.
    pub fn register_upload(
        &mut self,
        name: &str,
        file_name: Option<&str>,
        bytes: &[u8],
    ) -> Result<Registration, RegistryError> {
        let file_name = file_name.unwrap_or_default();
        let ext = accepted_extension(file_name)
            .ok_or_else(|| RegistryError::UnsupportedFileType(file_name.to_string()))?;
        check_name(name)?;

        let path = self.uploads.save(bytes, Some(ext))?;
        tracing::info!(name, path = %path.display(), "registering uploaded face");
        self.register(name, &path)
    }

    /// Register an image already on disk under `name`.
    pub fn register(&mut self, name: &str, image: &Path) -> Result<Registration, RegistryError> {
        check_name(name)?;
        let embedding = self.extractor.extract(image)?;
        let slot = self.index.insert(&embedding.values)?;
        let face_id = self.metadata.record_registration(slot, name)?;

        tracing::info!(name, slot, face_id, "face registered");
        Ok(Registration {
            name: name.to_string(),
            face_id,
            slot,
        })
    }

    /// Store an uploaded image and recognize it.
    pub fn recognize_upload(
        &mut self,
        file_name: Option<&str>,
        bytes: &[u8],
    ) -> Result<Recognition, RegistryError> {
        let ext = file_name.and_then(accepted_extension);
        let path = self.uploads.save(bytes, ext)?;
        tracing::info!(path = %path.display(), "recognizing uploaded face");
        self.recognize(&path)
    }

    /// Find the registered face nearest to the face in `image`.
    pub fn recognize(&mut self, image: &Path) -> Result<Recognition, RegistryError> {
        let embedding = self.extractor.extract(image)?;
        let Some(hit) = self.index.search(&embedding.values)? else {
            tracing::info!("index empty, no match");
            return Ok(Recognition::NoMatch);
        };

        tracing::info!(slot = hit.slot, distance = hit.distance, threshold = ?self.threshold, "nearest neighbour");
        if self.threshold.is_some_and(|t| hit.distance > t) {
            return Ok(Recognition::NoMatch);
        }

        let Some(face_id) = self.metadata.lookup_by_slot(hit.slot)? else {
            tracing::warn!(slot = hit.slot, "match has no slot mapping");
            return Ok(Recognition::Unknown {
                distance: hit.distance,
            });
        };
        let Some(name) = self.metadata.lookup_name(face_id)? else {
            tracing::warn!(slot = hit.slot, face_id, "mapping points at a missing face");
            return Ok(Recognition::Unknown {
                distance: hit.distance,
            });
        };

        tracing::info!(name = %name, face_id, distance = hit.distance, "match found");
        Ok(Recognition::Match {
            name,
            face_id,
            distance: hit.distance,
        })
    }

    pub fn list_faces(&self) -> Result<Vec<FaceRecord>, RegistryError> {
        Ok(self.metadata.list_faces()?)
    }

    pub fn status(&self) -> Result<RegistryStatus, RegistryError> {
        Ok(RegistryStatus {
            faces: self.metadata.face_count()?,
            vectors: self.index.len(),
            dimension: self.index.dimension(),
            threshold: self.threshold,
        })
    }
}

fn check_name(name: &str) -> Result<(), RegistryError> {
    if name.trim().is_empty() {
        return Err(RegistryError::EmptyName);
    }
    Ok(())
}
