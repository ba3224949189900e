pub mod detector;
pub mod matcher;

use anyhow::Result;
use image::DynamicImage;

pub use detector::{default_models_dir, BoundingBox, OnnxFaceEncoder};
pub use matcher::{FaceConfig, FaceMatcher};

/// Fixed-length identity vector for one detected face
#[derive(Debug, Clone, PartialEq)]
pub struct FaceEmbedding(Vec<f32>);

impl FaceEmbedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Euclidean distance, `None` when dimensions disagree
    pub fn distance(&self, other: &FaceEmbedding) -> Option<f64> {
        if self.dim() != other.dim() || self.0.is_empty() {
            return None;
        }

        let sum: f64 = self
            .0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| {
                let d = *a as f64 - *b as f64;
                d * d
            })
            .sum();
        Some(sum.sqrt())
    }
}

/// Detects and encodes every face in an image.
///
/// Embeddings are returned in detector order; callers take the first.
pub trait FaceEncoder {
    fn encode(&self, image: &DynamicImage) -> Result<Vec<FaceEmbedding>>;
}
