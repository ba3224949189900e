//! Error taxonomy for the comparison pipelines and the fail-soft boundary
//! that turns every failure into a zero score.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Anything that can stop a single comparison.
#[derive(Debug, Error)]
pub enum MatchError {
    /// File missing, unreadable or in an unsupported format
    #[error("failed to load {}: {reason}", .path.display())]
    Input { path: PathBuf, reason: String },

    /// No face detected in any orientation
    #[error("no face found in {} in any orientation", .0.display())]
    NoFace(PathBuf),

    /// Segmentation produced an empty foreground
    #[error("no contours found in {}", .0.display())]
    NoContours(PathBuf),

    /// Keypoint detector produced nothing to match
    #[error("no keypoint descriptors in {}", .0.display())]
    NoDescriptors(PathBuf),

    /// Feature extraction failed after the file was loaded
    #[error("feature extraction failed for {}: {reason}", .path.display())]
    Extraction { path: PathBuf, reason: String },

    /// Model loading or inference failed
    #[error("model error: {0}")]
    Model(String),

    /// Unexpected numeric failure while scoring
    #[error("computation failed: {0}")]
    Computation(String),
}

impl MatchError {
    pub fn input(path: &Path, reason: impl ToString) -> Self {
        MatchError::Input {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }

    pub fn extraction(path: &Path, reason: impl ToString) -> Self {
        MatchError::Extraction {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

/// Clamp a raw confidence into [0, 1]. NaN collapses to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Run a comparison pipeline and resolve it to a confidence score.
///
/// Errors and panics are logged and reported as 0.0 so that an
/// inconclusive comparison can never look like a match.
pub fn fail_soft<F>(operation: &str, pipeline: F) -> f64
where
    F: FnOnce() -> Result<f64, MatchError>,
{
    match panic::catch_unwind(AssertUnwindSafe(pipeline)) {
        Ok(Ok(score)) => {
            let score = clamp_unit(score);
            tracing::info!(operation, score, "Comparison finished");
            score
        }
        Ok(Err(e)) => {
            tracing::warn!(operation, error = %e, "Comparison failed, reporting zero confidence");
            0.0
        }
        Err(_) => {
            tracing::error!(operation, "Comparison panicked, reporting zero confidence");
            0.0
        }
    }
}
