use serde::{Deserialize, Serialize};

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

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Euclidean norm of the vector.
    pub fn norm(&self) -> f32 {
        self.values.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// Return a unit-length copy. A zero vector is returned unchanged.
    pub fn normalized(&self) -> Embedding {
        let norm = self.norm();
        let values = if norm > 0.0 {
            self.values.iter().map(|x| x / norm).collect()
        } else {
            self.values.clone()
        };
        Embedding {
            values,
            model_version: self.model_version.clone(),
        }
    }

    /// Squared Euclidean distance. This is the matching metric of the index.
    ///
    /// Only the overlapping prefix is compared; callers check dimensions first.
    pub fn squared_l2(&self, other: &Embedding) -> f32 {
        squared_l2(&self.values, &other.values)
    }

    /// Element-wise mean of several embeddings, L2-normalized.
    ///
    /// Returns `None` for an empty slice or when dimensions disagree.
    pub fn normalized_mean(embeddings: &[Embedding]) -> Option<Embedding> {
        let first = embeddings.first()?;
        let dim = first.dimension();
        if embeddings.iter().any(|e| e.dimension() != dim) {
            return None;
        }

        let mut sum = vec![0.0f32; dim];
        for embedding in embeddings {
            for (acc, v) in sum.iter_mut().zip(&embedding.values) {
                *acc += v;
            }
        }
        let count = embeddings.len() as f32;
        let mean = Embedding {
            values: sum.into_iter().map(|v| v / count).collect(),
            model_version: first.model_version.clone(),
        };
        Some(mean.normalized())
    }
}

/// Squared Euclidean distance between two raw vectors.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
